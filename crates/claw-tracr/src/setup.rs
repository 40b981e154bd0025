//! Wiring the engine together.
//!
//! [`start`] builds the accumulator, the flush target, the flusher and the
//! demuxing sink, connects the sink's message-done callback to the flusher
//! and spawns the background flush loop. The returned sink tees every call
//! into the demuxer and into a [`TracingSink`] bounded by the configured
//! verbosity.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::accumulator::Accumulator;
use crate::clock::{system_clock, SharedClock};
use crate::config::TracrConfig;
use crate::demuxer::Demuxer;
use crate::error::Result;
use crate::fanout::tee;
use crate::file_target::open_target;
use crate::flusher::Flusher;
use crate::layer::TracrLayer;
use crate::passthrough::TracingSink;
use crate::runner::{self, TracrHandle};
use crate::traits::LogSink;

/// A running engine.
pub struct Tracr {
    sink: Arc<dyn LogSink>,
    demuxer: Demuxer,
    accumulator: Arc<Accumulator>,
    flusher: Arc<Flusher>,
    handle: TracrHandle,
}

impl Tracr {
    /// Returns the sink: the demuxer teed into the `tracing` pass-through.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Returns a clone of [`Tracr::sink`].
    #[must_use]
    pub fn shared_sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Returns the demuxing sink alone.
    #[must_use]
    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    /// Returns a tracing layer feeding this engine.
    ///
    /// The layer writes into the demuxer only, since its events have already
    /// been seen by the rest of the subscriber stack.
    #[must_use]
    pub fn layer(&self) -> TracrLayer {
        TracrLayer::new(Arc::new(self.demuxer.clone()))
    }

    /// Returns the accumulator.
    #[must_use]
    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.accumulator
    }

    /// Returns the flusher.
    #[must_use]
    pub fn flusher(&self) -> &Arc<Flusher> {
        &self.flusher
    }

    /// Returns the flush loop handle.
    #[must_use]
    pub fn handle(&self) -> &TracrHandle {
        &self.handle
    }

    /// Stops the flush loop after a final drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

impl fmt::Debug for Tracr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracr")
            .field("demuxer", &self.demuxer)
            .field("accumulator", &self.accumulator)
            .field("flusher", &self.flusher)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Starts the engine on the current tokio runtime.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn start(config: &TracrConfig) -> Result<Tracr> {
    start_with_clock(config, system_clock())
}

/// Starts the engine with an explicit clock.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn start_with_clock(config: &TracrConfig, clock: SharedClock) -> Result<Tracr> {
    config.validate()?;
    info!(target: "claw_tracr", config = %config.to_json()?, "starting");

    let accumulator = Arc::new(Accumulator::new(Arc::clone(&clock)));
    let target = open_target(&config.base_directory);
    let flusher = Arc::new(Flusher::new(
        config.flusher_config(),
        accumulator.clone(),
        target,
        Arc::clone(&clock),
    ));

    let demuxer = Demuxer::new(Arc::clone(&accumulator), config.demuxer_options());
    let done = Arc::clone(&flusher);
    demuxer.register(move |key| done.message_done(key));
    let sink = tee(
        Arc::new(demuxer.clone()),
        Some(Arc::new(TracingSink::new(config.verbose))),
    );

    let handle = runner::spawn(Arc::clone(&flusher), config.flush_interval, clock)?;

    Ok(Tracr {
        sink,
        demuxer,
        accumulator,
        flusher,
        handle,
    })
}
