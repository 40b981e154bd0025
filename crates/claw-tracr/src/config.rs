//! Engine configuration.
//!
//! This module provides:
//! - [`TracrConfig`]: Correlation key, flush interval, target directory, verbosity
//! - Loading from `CLAW_TRACR_*` environment variables

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::demuxer::DemuxerOptions;
use crate::error::{Result, TracrError};
use crate::flusher::FlusherConfig;
use crate::keyfinder::{KeyFinder, DEFAULT_KEY_NAME};
use crate::types::ErrorPropagation;

/// Directory flushed buffers are written to (required).
pub const DUMP_DIR_ENV: &str = "CLAW_TRACR_DUMP_DIR";
/// Flush interval, e.g. `10s`, `1m30s`, `500ms` (required).
pub const DUMP_INTERVAL_ENV: &str = "CLAW_TRACR_DUMP_INTERVAL";
/// Correlation key name (optional, defaults to `logID`).
pub const KEY_ENV: &str = "CLAW_TRACR_KEY";
/// Error propagation mode, `ignore` or `propagate` (optional).
pub const ERRORS_ENV: &str = "CLAW_TRACR_ERRORS";
/// Highest verbosity forwarded to `tracing` (optional, defaults to `0`).
pub const VERBOSE_ENV: &str = "CLAW_TRACR_VERBOSE";

/// Configuration for the log buffering engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracrConfig {
    /// Name of the key carrying the correlation value.
    pub key_name: String,
    /// How often idle keys are flushed.
    pub flush_interval: Duration,
    /// Directory flushed buffers are appended to.
    pub base_directory: PathBuf,
    /// How per-key flush failures are reported.
    pub errors: ErrorPropagation,
    /// Prefix buffered lines with a timestamp.
    pub timestamps: bool,
    /// Highest informational verbosity forwarded to `tracing`.
    pub verbose: u8,
}

impl Default for TracrConfig {
    fn default() -> Self {
        Self {
            key_name: DEFAULT_KEY_NAME.to_string(),
            flush_interval: Duration::from_secs(10),
            base_directory: PathBuf::from("logs"),
            errors: ErrorPropagation::Ignore,
            timestamps: false,
            verbose: 0,
        }
    }
}

impl TracrConfig {
    /// Creates a config flushing into `base_directory`.
    #[must_use]
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            ..Default::default()
        }
    }

    /// Sets the correlation key name.
    #[must_use]
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the error propagation mode.
    #[must_use]
    pub const fn with_errors(mut self, errors: ErrorPropagation) -> Self {
        self.errors = errors;
        self
    }

    /// Enables or disables line timestamps.
    #[must_use]
    pub const fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Sets the highest verbosity forwarded to `tracing`.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`TracrError::Config`] if a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps variable names
    /// to values.
    ///
    /// # Errors
    ///
    /// Returns [`TracrError::Config`] if a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_directory = lookup(DUMP_DIR_ENV)
            .ok_or_else(|| TracrError::Config(format!("missing env var {DUMP_DIR_ENV:?}")))?;
        if base_directory.is_empty() {
            return Err(TracrError::Config(format!(
                "missing content for env var {DUMP_DIR_ENV:?}"
            )));
        }

        let raw_interval = lookup(DUMP_INTERVAL_ENV)
            .ok_or_else(|| TracrError::Config(format!("missing env var {DUMP_INTERVAL_ENV:?}")))?;
        let flush_interval = parse_duration(&raw_interval)?;

        let mut config = Self::new(base_directory).with_flush_interval(flush_interval);
        if let Some(key_name) = lookup(KEY_ENV).filter(|k| !k.is_empty()) {
            config.key_name = key_name;
        }
        if let Some(errors) = lookup(ERRORS_ENV) {
            config.errors = errors.parse()?;
        }
        if let Some(verbose) = lookup(VERBOSE_ENV) {
            config.verbose = verbose.trim().parse().map_err(|_| {
                TracrError::Config(format!("cannot parse the content of env var {VERBOSE_ENV:?}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TracrError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.key_name.is_empty() {
            return Err(TracrError::Config("empty correlation key name".to_string()));
        }
        if self.flush_interval.is_zero() {
            return Err(TracrError::Config("zero flush interval".to_string()));
        }
        Ok(())
    }

    /// Returns the demuxer options described by this configuration.
    #[must_use]
    pub fn demuxer_options(&self) -> DemuxerOptions {
        DemuxerOptions::default()
            .with_finder(KeyFinder::AnyPosition(self.key_name.clone()))
            .with_timestamps(self.timestamps)
    }

    /// Returns the flusher configuration described by this configuration.
    #[must_use]
    pub const fn flusher_config(&self) -> FlusherConfig {
        FlusherConfig::for_interval(self.flush_interval).with_errors(self.errors)
    }

    /// Serializes the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parses durations such as `10s`, `1m30s`, `1.5h` or `250ms`.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns [`TracrError::Config`] if the text is not a valid duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TracrError::Config("empty duration".to_string()));
    }

    let invalid = || TracrError::Config(format!("cannot parse interval from {s:?}"));
    let mut total_ms = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "" | "s" => 1_000.0,
            "ms" => 1.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total_ms += value * scale;
    }

    Ok(Duration::from_millis(total_ms.round() as u64))
}
