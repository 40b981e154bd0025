//! Routing of log calls into per-key buffers.
//!
//! This module provides:
//! - [`Demuxer`]: A [`LogSink`] that buffers lines by correlation key
//! - [`DemuxerOptions`]: Key extraction and line formatting options
//!
//! Calls whose key/value list carries no correlation key are dropped here;
//! they may still reach other sinks through a [`Fanout`](crate::Fanout).

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::accumulator::Accumulator;
use crate::keyfinder::{format_key_values, KeyFinder};
use crate::traits::LogSink;
use crate::types::Severity;

/// Separator between the segments added by [`LogSink::with_name`].
pub const NAME_SEPARATOR: &str = ".";

/// Callback invoked with the correlation key after a line was buffered.
pub type MessageDone = Arc<dyn Fn(&str) + Send + Sync>;

/// Options controlling key extraction and line formatting.
#[derive(Debug, Clone, Default)]
pub struct DemuxerOptions {
    /// How the correlation key is located in a call's key/value list.
    pub finder: KeyFinder,
    /// Prefix every line with an RFC 3339 timestamp.
    pub timestamps: bool,
    /// Fall back to the correlation key attached via `with_values`.
    pub key_from_values: bool,
}

impl DemuxerOptions {
    /// Creates options that look for `key_name` anywhere in the list.
    #[must_use]
    pub fn new(key_name: impl Into<String>) -> Self {
        Self {
            finder: KeyFinder::AnyPosition(key_name.into()),
            ..Default::default()
        }
    }

    /// Sets the key extraction strategy.
    #[must_use]
    pub fn with_finder(mut self, finder: KeyFinder) -> Self {
        self.finder = finder;
        self
    }

    /// Enables or disables timestamp prefixes.
    #[must_use]
    pub const fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Enables or disables the `with_values` key fallback.
    #[must_use]
    pub const fn with_key_from_values(mut self, enabled: bool) -> Self {
        self.key_from_values = enabled;
        self
    }
}

/// State shared by a demuxer and every sink derived from it.
struct Shared {
    accumulator: Arc<Accumulator>,
    options: DemuxerOptions,
    on_done: RwLock<Option<MessageDone>>,
}

/// A log sink that appends formatted lines to per-key buffers.
///
/// Derived sinks are views over the same accumulator and callback.
#[derive(Clone)]
pub struct Demuxer {
    shared: Arc<Shared>,
    name: String,
    values: Vec<Value>,
    call_depth: usize,
}

impl fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demuxer")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("call_depth", &self.call_depth)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl Demuxer {
    /// Creates a demuxer buffering into `accumulator`.
    #[must_use]
    pub fn new(accumulator: Arc<Accumulator>, options: DemuxerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                accumulator,
                options,
                on_done: RwLock::new(None),
            }),
            name: String::new(),
            values: Vec::new(),
            call_depth: 0,
        }
    }

    /// Registers the callback run after each buffered line.
    ///
    /// Replaces any previous callback, for this sink and all sinks sharing
    /// its state.
    pub fn register(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.on_done.write() = Some(Arc::new(callback));
    }

    /// Returns the accumulator lines are buffered into.
    #[must_use]
    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.shared.accumulator
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &DemuxerOptions {
        &self.shared.options
    }

    /// Returns the name chain.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the extra frames to skip when locating callers.
    #[must_use]
    pub const fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Formats a single buffered line.
    #[must_use]
    pub fn format_line(&self, severity: &Severity, msg: &str, kv: &[Value]) -> String {
        let mut line = String::new();
        if self.shared.options.timestamps {
            line.push_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
            line.push(' ');
        }
        line.push_str(&severity.label());
        if !self.name.is_empty() {
            line.push(' ');
            line.push_str(&self.name);
        }
        if !msg.is_empty() {
            line.push(' ');
            line.push_str(msg);
        }
        if !self.values.is_empty() {
            line.push(' ');
            line.push_str(&format_key_values(&self.values));
        }
        if !kv.is_empty() {
            line.push(' ');
            line.push_str(&format_key_values(kv));
        }
        line.push('\n');
        line
    }

    fn correlation_key<'a>(&'a self, kv: &'a [Value]) -> Option<&'a str> {
        let finder = &self.shared.options.finder;
        finder.find(kv).or_else(|| {
            if self.shared.options.key_from_values {
                finder.find(&self.values)
            } else {
                None
            }
        })
    }

    fn write_line(&self, severity: &Severity, msg: &str, kv: &[Value]) {
        let Some(key) = self.correlation_key(kv) else {
            return;
        };

        let line = self.format_line(severity, msg, kv);
        if let Err(e) = self.shared.accumulator.append(key, &line) {
            tracing::debug!(target: "claw_tracr", key, error = %e, "dropping line");
            return;
        }

        let on_done = self.shared.on_done.read().clone();
        if let Some(on_done) = on_done {
            on_done(key);
        }
    }

    fn derive(&self, name: String, values: Vec<Value>, call_depth: usize) -> Arc<dyn LogSink> {
        Arc::new(Self {
            shared: Arc::clone(&self.shared),
            name,
            values,
            call_depth,
        })
    }
}

impl LogSink for Demuxer {
    fn enabled(&self, _level: u8) -> bool {
        // filtering happens on the correlation key, not on verbosity
        true
    }

    fn info(&self, level: u8, msg: &str, kv: &[Value]) {
        self.write_line(&Severity::Info(level), msg, kv);
    }

    fn error(&self, err: Option<&(dyn StdError + 'static)>, msg: &str, kv: &[Value]) {
        self.write_line(&Severity::Error(err.map(ToString::to_string)), msg, kv);
    }

    fn with_name(&self, name: &str) -> Arc<dyn LogSink> {
        let name = if self.name.is_empty() {
            name.to_string()
        } else {
            format!("{}{NAME_SEPARATOR}{name}", self.name)
        };
        self.derive(name, self.values.clone(), self.call_depth)
    }

    fn with_values(&self, kv: &[Value]) -> Arc<dyn LogSink> {
        let mut values = self.values.clone();
        values.extend_from_slice(kv);
        self.derive(self.name.clone(), values, self.call_depth)
    }

    fn with_call_depth(&self, depth: usize) -> Arc<dyn LogSink> {
        self.derive(self.name.clone(), self.values.clone(), self.call_depth + depth)
    }
}
