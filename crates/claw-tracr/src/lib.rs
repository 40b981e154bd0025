//! # claw-tracr
//!
//! Correlation-keyed log buffering for Clawbernetes services.
//!
//! Log lines carrying a correlation key (by default `logID`) are held in
//! memory per key and written to `<base_dir>/<key>.log` once the key has
//! been idle for a full flush interval. Lines without a key are dropped.
//!
//! This crate provides:
//!
//! - [`Accumulator`]: Per-key text buffers with last-write times
//! - [`Demuxer`]: A [`LogSink`] routing lines to buffers by correlation key
//! - [`Flusher`]: Idle tracking and flush batches
//! - [`FileTarget`] / [`DiscardTarget`]: Flush destinations
//! - [`TracrHandle`]: Control of the background flush loop
//! - [`TracrLayer`]: A `tracing_subscriber` layer feeding a sink
//! - [`Fanout`]: Broadcasting to several sinks
//! - [`TracingSink`]: Forwarding to `tracing` up to a verbosity
//! - [`TracrConfig`]: Configuration, loadable from `CLAW_TRACR_*` variables
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claw_tracr::{system_clock, Accumulator, Demuxer, DemuxerOptions, LogSink};
//! use serde_json::json;
//!
//! let accumulator = Arc::new(Accumulator::new(system_clock()));
//! let sink = Demuxer::new(Arc::clone(&accumulator), DemuxerOptions::default());
//!
//! sink.info(0, "request received", &[json!("logID"), json!("abc")]);
//! sink.info(0, "no key, dropped", &[]);
//!
//! assert_eq!(
//!     accumulator.peek("abc").as_deref(),
//!     Some("INFO request received logID abc\n")
//! );
//! assert_eq!(accumulator.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accumulator;
pub mod clock;
pub mod config;
pub mod demuxer;
pub mod error;
pub mod fanout;
pub mod file_target;
pub mod flusher;
pub mod keyfinder;
pub mod layer;
pub mod passthrough;
pub mod runner;
pub mod setup;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use accumulator::{Accumulator, AccumulatorConfig, AccumulatorEntry};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{parse_duration, TracrConfig};
pub use demuxer::{Demuxer, DemuxerOptions};
pub use error::{Result, TracrError};
pub use fanout::{chain, tee, Fanout};
pub use file_target::{open_target, sanitize_key, DiscardTarget, FileTarget};
pub use flusher::{idle_threshold, Flusher, FlusherConfig};
pub use keyfinder::{find_key, KeyFinder, DEFAULT_KEY_NAME};
pub use layer::TracrLayer;
pub use passthrough::{TracingSink, PASSTHROUGH_TARGET};
pub use runner::{spawn, TracrHandle};
pub use setup::{start, start_with_clock, Tracr};
pub use traits::{BufferStore, FlushTarget, LogSink};
pub use types::{ErrorPropagation, Severity};
