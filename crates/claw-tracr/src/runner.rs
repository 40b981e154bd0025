//! The background flush loop.
//!
//! One task waits on three triggers and services exactly one per wake-up:
//! - the periodic ticker runs an aged flush followed by an orphan sweep;
//! - [`TracrHandle::flush_now`] runs a bulk flush;
//! - cancellation runs a final bulk flush and ends the task.
//!
//! Flush batches do blocking file I/O, so they run on the blocking pool and
//! the loop awaits them; a batch always completes before the next trigger is
//! observed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{Result, TracrError};
use crate::flusher::Flusher;

/// Control handle for a running flush loop.
#[derive(Debug)]
pub struct TracrHandle {
    cancel: CancellationToken,
    flush_now: Arc<Notify>,
    task: JoinHandle<()>,
}

impl TracrHandle {
    /// Asks the loop to flush every tracked key as soon as it is idle.
    ///
    /// Requests made while a batch is running are coalesced into one.
    pub fn flush_now(&self) {
        self.flush_now.notify_one();
    }

    /// Asks the loop to drain and stop. Does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once the loop has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the loop and waits for its final drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await?;
        Ok(())
    }
}

/// Spawns the flush loop on the current tokio runtime.
///
/// The first tick fires one `interval` after spawning.
///
/// # Errors
///
/// Returns [`TracrError::Config`] if `interval` is zero.
pub fn spawn(flusher: Arc<Flusher>, interval: Duration, clock: SharedClock) -> Result<TracrHandle> {
    if interval.is_zero() {
        return Err(TracrError::Config("zero flush interval".to_string()));
    }
    let cancel = CancellationToken::new();
    let flush_now = Arc::new(Notify::new());
    let task = tokio::spawn(run(
        flusher,
        interval,
        clock,
        cancel.clone(),
        Arc::clone(&flush_now),
    ));
    Ok(TracrHandle {
        cancel,
        flush_now,
        task,
    })
}

async fn run(
    flusher: Arc<Flusher>,
    interval: Duration,
    clock: SharedClock,
    cancel: CancellationToken,
    flush_now: Arc<Notify>,
) {
    info!(
        target: "claw_tracr",
        interval_ms = interval.as_millis() as u64,
        max_age_ms = flusher.config().max_age.as_millis() as u64,
        stored = flusher.persists(),
        "starting flush loop"
    );

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let flushed = in_background(&flusher, |f| f.flush_all().len()).await;
                info!(target: "claw_tracr", flushed, "flush loop stopped");
                break;
            }
            () = flush_now.notified() => {
                let flushed = in_background(&flusher, |f| f.flush_all().len()).await;
                debug!(target: "claw_tracr", flushed, "flushed on request");
            }
            _ = ticker.tick() => {
                let now = clock.now();
                in_background(&flusher, move |f| {
                    f.flush(now);
                    f.sweep(now);
                })
                .await;
            }
        }
    }
}

/// Runs a flush batch on the blocking pool.
async fn in_background<T, F>(flusher: &Arc<Flusher>, batch: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&Flusher) -> T + Send + 'static,
{
    let flusher = Arc::clone(flusher);
    match tokio::task::spawn_blocking(move || batch(&flusher)).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: "claw_tracr", error = %e, "flush batch failed");
            None
        }
    }
}
