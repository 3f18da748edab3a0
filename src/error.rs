//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source path is empty.
    #[snafu(display("Source path cannot be empty"))]
    EmptySourcePath,

    /// Sink path is empty.
    #[snafu(display("Sink path cannot be empty"))]
    EmptySinkPath,

    /// Nothing could ever be staged.
    #[snafu(display("source.max_staged must be at least 1"))]
    ZeroMaxStaged,

    /// Script command is empty.
    #[snafu(display("Script command must name a program"))]
    EmptyScriptCommand,

    /// Source and sink point at the same directory.
    #[snafu(display("Source and sink must be different directories: {}", path.display()))]
    SourceIsSink { path: PathBuf },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Transform Errors ============

/// Errors returned by a transformation run.
///
/// The processing stage treats every variant the same way: the batch is
/// reported as failed and skipped downstream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// The script process could not be started.
    #[snafu(display("Failed to start {program}: {source}"))]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The script exited unsuccessfully.
    #[snafu(display("{program} exited with {status}: {stderr}"))]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    /// Any other failure reported by a transformation.
    #[snafu(display("{message}"))]
    Failed { message: String },
}

// ============ Stage Errors ============

/// Errors staging one input directory into a working directory.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// The input path has no final component to name the batch after.
    #[snafu(display("{} has no directory name", path.display()))]
    NoBatchName { path: PathBuf },

    /// The working directory could not be created.
    #[snafu(display("Failed to create working directory: {source}"))]
    CreateWorkingDir { source: std::io::Error },

    /// Copying the input into the working directory failed.
    #[snafu(display("Failed to copy {}: {source}", path.display()))]
    CopyInput {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors publishing a processed batch to the sink.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// A batch with the same id was already published.
    #[snafu(display("{} already exists", path.display()))]
    TargetExists { path: PathBuf },

    /// Checking for an existing target or partial directory failed.
    #[snafu(display("Failed to inspect {}: {source}", path.display()))]
    InspectTarget {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stale partial directory could not be removed.
    #[snafu(display("Failed to clear {}: {source}", path.display()))]
    ClearPartial {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to copy to {}: {source}", path.display()))]
    CopyOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The partial directory could not be renamed into place.
    #[snafu(display("Failed to move batch into {}: {source}", path.display()))]
    RenameTarget {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// The metrics address could not be bound.
    #[snafu(display("Failed to bind metrics server to {addr}: {source}"))]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur during Dead Letter Queue operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to create the DLQ directory.
    #[snafu(display("Failed to create DLQ directory {}: {source}", path.display()))]
    DlqCreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write to DLQ.
    #[snafu(display("Failed to write to DLQ {}: {source}", path.display()))]
    DlqWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize failed batch record.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// The source root could not be listed.
    #[snafu(display("Failed to list batches in {}: {source}", path.display()))]
    ListSource {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A consumed input location could not be removed.
    #[snafu(display("Failed to purge input {}: {source}", path.display()))]
    Purge {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// DLQ error.
    #[snafu(display("DLQ error: {source}"))]
    Dlq { source: DlqError },
}
