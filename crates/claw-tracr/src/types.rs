//! Core types shared by the sink, the accumulator and the flusher.
//!
//! This module provides:
//! - [`Severity`]: Label of a buffered line (verbosity or error)
//! - [`ErrorPropagation`]: How per-key flush failures are reported

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TracrError;

/// Placeholder rendered for key/value elements that are not strings.
pub const UNREPRESENTABLE: &str = "<unrep>";

/// Severity of a buffered log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Informational line at the given verbosity (0 is the default level).
    Info(u8),
    /// Error line, optionally carrying the error's text.
    Error(Option<String>),
}

impl Severity {
    /// Returns the label that starts a formatted line.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Info(0) => "INFO".to_string(),
            Self::Info(level) => format!("V[{level}]"),
            Self::Error(None) => "ERROR".to_string(),
            Self::Error(Some(err)) => format!("ERROR {err}"),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// How failures for individual keys during a flush batch are reported.
///
/// Failures never abort a batch; this only decides whether they are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPropagation {
    /// Failures are dropped silently.
    #[default]
    Ignore,
    /// Failures are reported through `tracing`.
    Propagate,
}

impl ErrorPropagation {
    /// Returns the string representation of this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Propagate => "propagate",
        }
    }

    /// Returns true if failures should be reported.
    #[must_use]
    pub const fn reports(&self) -> bool {
        matches!(self, Self::Propagate)
    }
}

impl FromStr for ErrorPropagation {
    type Err = TracrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "propagate" => Ok(Self::Propagate),
            other => Err(TracrError::Config(format!(
                "unknown error propagation mode {other:?}"
            ))),
        }
    }
}

/// Returns the text of a key/value element, if it is representable.
#[must_use]
pub fn as_text(value: &Value) -> Option<&str> {
    value.as_str()
}

/// Renders a key/value element, substituting [`UNREPRESENTABLE`] for non-strings.
#[must_use]
pub fn render(value: &Value) -> &str {
    as_text(value).unwrap_or(UNREPRESENTABLE)
}
