//! Traits at the engine's seams.
//!
//! This module provides:
//! - [`LogSink`]: the structured logging sink contract the engine plugs into
//! - [`BufferStore`]: buffer access used by the flusher
//! - [`FlushTarget`]: where flushed buffers are persisted

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::accumulator::AccumulatorEntry;
use crate::error::Result;

/// A structured logging sink.
///
/// Calls carry a message and an alternating key/value list. Derived sinks
/// (`with_name`, `with_values`, `with_call_depth`) return new handles that
/// carry the extra context while sharing the underlying state.
pub trait LogSink: Send + Sync {
    /// Returns true if calls at the given verbosity are accepted.
    fn enabled(&self, level: u8) -> bool;

    /// Logs an informational message at the given verbosity.
    fn info(&self, level: u8, msg: &str, kv: &[Value]);

    /// Logs an error message.
    fn error(&self, err: Option<&(dyn StdError + 'static)>, msg: &str, kv: &[Value]);

    /// Returns a sink whose name has `name` appended as a new segment.
    fn with_name(&self, name: &str) -> Arc<dyn LogSink>;

    /// Returns a sink that attaches `kv` to every subsequent call.
    fn with_values(&self, kv: &[Value]) -> Arc<dyn LogSink>;

    /// Returns a sink that skips `depth` extra frames when locating callers.
    fn with_call_depth(&self, depth: usize) -> Arc<dyn LogSink>;
}

/// Access to per-key buffered text, as needed by the flusher.
pub trait BufferStore: Send + Sync {
    /// Returns a copy of the buffered text without removing it.
    fn peek(&self, key: &str) -> Option<String>;

    /// Removes and returns the buffered text.
    fn pop(&self, key: &str) -> Option<String>;

    /// Atomically removes and returns every entry idle for at least
    /// `max_idle` whose key satisfies `pred`.
    fn pop_expired_where(
        &self,
        now: Instant,
        max_idle: Duration,
        pred: &dyn Fn(&str) -> bool,
    ) -> Vec<AccumulatorEntry>;
}

/// Destination of flushed buffers.
pub trait FlushTarget: Send + Sync {
    /// Persists the text buffered for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text could not be persisted.
    fn write(&self, key: &str, text: &str) -> Result<()>;

    /// Returns false if this target drops everything it is given.
    fn persists(&self) -> bool {
        true
    }
}
