//! Transformations applied to a batch's working directory.
//!
//! The processing stage only sees the [`Transform`] trait. [`ScriptTransform`]
//! is the implementation used by the CLI: it runs a configured command with
//! the working directory as its last argument and treats a non-zero exit as
//! a failure.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::process::Command;
use tracing::debug;

use crate::config::ScriptConfig;
use crate::error::{ExitStatusSnafu, SpawnSnafu, TransformError};

/// Stderr is truncated to this many bytes in failure causes.
const MAX_STDERR_BYTES: usize = 4096;

/// An opaque operation run on a batch's working directory.
///
/// The transformation consumes the downloaded inputs and leaves its outputs
/// in the same directory.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(&self, working_dir: &Path) -> Result<(), TransformError>;
}

/// Runs an external program on the working directory.
#[derive(Debug, Clone)]
pub struct ScriptTransform {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl ScriptTransform {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Build from config. The command is validated non-empty at load time.
    pub fn from_config(config: &ScriptConfig) -> Self {
        let mut parts = config.command.iter().cloned();
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect()).with_env(config.env.clone())
    }
}

#[async_trait]
impl Transform for ScriptTransform {
    async fn run(&self, working_dir: &Path) -> Result<(), TransformError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(working_dir)
            .current_dir(working_dir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program, dir = %working_dir.display(), "Running script");

        let output = command.output().await.context(SpawnSnafu {
            program: self.program.clone(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if stderr.is_empty() {
                "(no stderr output)".to_string()
            } else {
                truncate(stderr, MAX_STDERR_BYTES)
            };
            return ExitStatusSnafu {
                program: self.program.clone(),
                status: output.status,
                stderr,
            }
            .fail();
        }

        Ok(())
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("...");
    text
}
