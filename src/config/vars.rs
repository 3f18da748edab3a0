//! Environment variable interpolation for config files.
//!
//! Paths and script arguments often differ per host, so the YAML text is
//! interpolated before it is parsed. Supported syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        | \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<default>[^}]*) )? \}
        | \$ (?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("static interpolation pattern is valid")
});

/// How a missing or empty variable falls back.
#[derive(Debug, Clone, Copy)]
enum Fallback<'a> {
    /// No default: a missing variable is an error.
    Required,
    /// `${VAR-default}`: used only when unset.
    IfUnset(&'a str),
    /// `${VAR:-default}`: used when unset or empty.
    IfUnsetOrEmpty(&'a str),
}

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// One message per variable that could not be substituted.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
///
/// Errors are accumulated rather than returned early so every missing
/// variable is reported at once. Unresolvable references are left verbatim.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
                return "$".to_string();
            };
            let fallback = match (caps.name("op"), caps.name("default")) {
                (Some(op), Some(default)) if op.as_str() == ":-" => {
                    Fallback::IfUnsetOrEmpty(default.as_str())
                }
                (Some(_), Some(default)) => Fallback::IfUnset(default.as_str()),
                _ => Fallback::Required,
            };

            match resolve(name.as_str(), fallback) {
                Ok(value) => value,
                Err(message) => {
                    errors.push(message);
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(name: &str, fallback: Fallback<'_>) -> Result<String, String> {
    match (env::var(name), fallback) {
        (Ok(value), _) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        (Ok(value), Fallback::IfUnsetOrEmpty(default)) if value.is_empty() => {
            Ok(default.to_string())
        }
        (Ok(value), _) => Ok(value),
        (Err(_), Fallback::IfUnset(default) | Fallback::IfUnsetOrEmpty(default)) => {
            Ok(default.to_string())
        }
        (Err(_), Fallback::Required) => Err(format!("environment variable '{name}' is not set")),
    }
}
