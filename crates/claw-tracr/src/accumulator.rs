//! In-memory, per-key accumulation of formatted log text.
//!
//! This module provides:
//! - [`Accumulator`]: Thread-safe map from correlation key to buffered text
//! - [`AccumulatorEntry`]: One key's buffer and last-write instant
//! - Implementation of [`BufferStore`] for the flusher

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::clock::SharedClock;
use crate::error::{Result, TracrError};
use crate::traits::BufferStore;

/// Configuration for the accumulator.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorConfig {
    /// Maximum number of bytes buffered per key (`None` means unbounded).
    pub max_entry_bytes: Option<usize>,
}

impl AccumulatorConfig {
    /// Sets the per-key byte cap.
    #[must_use]
    pub const fn with_max_entry_bytes(mut self, limit: usize) -> Self {
        self.max_entry_bytes = Some(limit);
        self
    }
}

/// Buffered text for one correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorEntry {
    /// The correlation key
    pub key: String,
    /// Concatenated text, in append order
    pub data: String,
    /// When text was last appended
    pub last_write: Instant,
}

impl AccumulatorEntry {
    /// Returns true if the entry has been idle for at least `max_idle`.
    #[must_use]
    pub fn is_expired(&self, now: Instant, max_idle: Duration) -> bool {
        now.saturating_duration_since(self.last_write) >= max_idle
    }
}

/// Thread-safe store of per-key text buffers.
///
/// All mutations take a single store-wide lock, held only for map
/// operations.
pub struct Accumulator {
    config: AccumulatorConfig,
    entries: Mutex<HashMap<String, AccumulatorEntry>>,
    clock: SharedClock,
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Accumulator {
    /// Creates an empty accumulator with no per-key cap.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_config(AccumulatorConfig::default(), clock)
    }

    /// Creates an empty accumulator with the given configuration.
    #[must_use]
    pub fn with_config(config: AccumulatorConfig, clock: SharedClock) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Appends text to the buffer for `key`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`TracrError::CapacityExceeded`] if the append would grow the
    /// buffer beyond the configured cap. The buffer is left unchanged.
    pub fn append(&self, key: &str, text: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let now = self.clock.now();

        let buffered = entries.get(key).map_or(0, |e| e.data.len());
        if let Some(limit) = self.config.max_entry_bytes {
            if buffered + text.len() > limit {
                return Err(TracrError::CapacityExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| AccumulatorEntry {
                key: key.to_string(),
                data: String::new(),
                last_write: now,
            });
        entry.data.push_str(text);
        entry.last_write = entry.last_write.max(now);
        Ok(())
    }

    /// Returns a copy of the text buffered for `key`.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|e| e.data.clone())
    }

    /// Removes the entry for `key` and returns its text.
    pub fn pop(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key).map(|e| e.data)
    }

    /// Atomically removes and returns every entry idle for at least `max_idle`.
    pub fn pop_expired(&self, now: Instant, max_idle: Duration) -> Vec<AccumulatorEntry> {
        self.pop_expired_where(now, max_idle, &|_| true)
    }

    /// Like [`pop_expired`](Self::pop_expired), restricted to keys matching `pred`.
    pub fn pop_expired_where(
        &self,
        now: Instant,
        max_idle: Duration,
        pred: &dyn Fn(&str) -> bool,
    ) -> Vec<AccumulatorEntry> {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .values()
            .filter(|e| e.is_expired(now, max_idle) && pred(&e.key))
            .map(|e| e.key.clone())
            .collect();
        expired
            .iter()
            .filter_map(|key| entries.remove(key))
            .collect()
    }

    /// Returns the last-write instant of `key`.
    #[must_use]
    pub fn last_write(&self, key: &str) -> Option<Instant> {
        self.entries.lock().get(key).map(|e| e.last_write)
    }

    /// Returns the number of buffered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &AccumulatorConfig {
        &self.config
    }
}

impl BufferStore for Accumulator {
    fn peek(&self, key: &str) -> Option<String> {
        Accumulator::peek(self, key)
    }

    fn pop(&self, key: &str) -> Option<String> {
        Accumulator::pop(self, key)
    }

    fn pop_expired_where(
        &self,
        now: Instant,
        max_idle: Duration,
        pred: &dyn Fn(&str) -> bool,
    ) -> Vec<AccumulatorEntry> {
        Accumulator::pop_expired_where(self, now, max_idle, pred)
    }
}
