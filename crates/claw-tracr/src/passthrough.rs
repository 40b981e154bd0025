//! Forwarding log calls to `tracing`, filtered by verbosity.
//!
//! [`TracingSink`] is the regular-log leaf that sits next to the buffering
//! [`Demuxer`](crate::Demuxer): informational calls at or below the
//! configured verbosity, and every error, are re-emitted as `tracing` events
//! under [`PASSTHROUGH_TARGET`], whether or not they carry a correlation key.

use std::error::Error as StdError;
use std::sync::Arc;

use serde_json::Value;

use crate::demuxer::NAME_SEPARATOR;
use crate::keyfinder::format_key_values;
use crate::traits::LogSink;

/// Target of forwarded events. [`TracrLayer`](crate::TracrLayer) ignores it.
pub const PASSTHROUGH_TARGET: &str = "claw_tracr::passthrough";

/// A sink forwarding calls to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    verbose: u8,
    name: String,
    values: Vec<Value>,
}

impl TracingSink {
    /// Creates a sink forwarding informational calls up to `verbose`.
    #[must_use]
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    /// Returns the highest forwarded verbosity.
    #[must_use]
    pub const fn verbose(&self) -> u8 {
        self.verbose
    }

    fn render(&self, kv: &[Value]) -> String {
        match (self.values.is_empty(), kv.is_empty()) {
            (true, _) => format_key_values(kv),
            (false, true) => format_key_values(&self.values),
            (false, false) => {
                format!("{} {}", format_key_values(&self.values), format_key_values(kv))
            }
        }
    }
}

impl LogSink for TracingSink {
    fn enabled(&self, level: u8) -> bool {
        level <= self.verbose
    }

    fn info(&self, level: u8, msg: &str, kv: &[Value]) {
        if !self.enabled(level) {
            return;
        }
        let rendered = self.render(kv);
        let kv = rendered.as_str();
        let name = self.name.as_str();
        match level {
            0 => tracing::info!(target: PASSTHROUGH_TARGET, name, kv, "{msg}"),
            1 => tracing::debug!(target: PASSTHROUGH_TARGET, name, kv, "{msg}"),
            _ => tracing::trace!(target: PASSTHROUGH_TARGET, name, kv, v = level, "{msg}"),
        }
    }

    fn error(&self, err: Option<&(dyn StdError + 'static)>, msg: &str, kv: &[Value]) {
        let kv = self.render(kv);
        let error = err.map(ToString::to_string).unwrap_or_default();
        tracing::error!(
            target: PASSTHROUGH_TARGET,
            name = self.name.as_str(),
            kv = kv.as_str(),
            error = error.as_str(),
            "{msg}"
        );
    }

    fn with_name(&self, name: &str) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        if derived.name.is_empty() {
            derived.name = name.to_string();
        } else {
            derived.name = format!("{}{NAME_SEPARATOR}{name}", self.name);
        }
        Arc::new(derived)
    }

    fn with_values(&self, kv: &[Value]) -> Arc<dyn LogSink> {
        let mut derived = self.clone();
        derived.values.extend_from_slice(kv);
        Arc::new(derived)
    }

    // events carry their own callsite
    fn with_call_depth(&self, _depth: usize) -> Arc<dyn LogSink> {
        Arc::new(self.clone())
    }
}
