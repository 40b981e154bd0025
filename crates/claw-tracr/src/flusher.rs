//! Aging out and persisting idle correlation keys.
//!
//! This module provides:
//! - [`Flusher`]: Tracks per-key ages and flushes buffers to a target
//! - [`FlusherConfig`]: Idle threshold and error reporting mode
//!
//! The flusher keeps its own age map, refreshed by
//! [`Flusher::message_done`], so it can pick idle keys without holding the
//! accumulator's lock. Neither lock is ever held across I/O.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::clock::SharedClock;
use crate::error::TracrError;
use crate::traits::{BufferStore, FlushTarget};
use crate::types::ErrorPropagation;

/// Slack subtracted from the flush interval to get the idle threshold.
///
/// Keeps a key written just before a tick from looking idle due to timer
/// jitter.
pub const FLUSH_SLACK: Duration = Duration::from_millis(10);

/// Returns the idle threshold for a flush interval.
#[must_use]
pub const fn idle_threshold(interval: Duration) -> Duration {
    interval.saturating_sub(FLUSH_SLACK)
}

/// Configuration for the flusher.
#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// Minimum time since the last write before a key is flushed.
    pub max_age: Duration,
    /// How per-key failures are reported.
    pub errors: ErrorPropagation,
}

impl FlusherConfig {
    /// Creates a config for the given flush interval.
    #[must_use]
    pub const fn for_interval(interval: Duration) -> Self {
        Self {
            max_age: idle_threshold(interval),
            errors: ErrorPropagation::Ignore,
        }
    }

    /// Sets the error reporting mode.
    #[must_use]
    pub const fn with_errors(mut self, errors: ErrorPropagation) -> Self {
        self.errors = errors;
        self
    }
}

/// Flushes idle buffers to a [`FlushTarget`].
pub struct Flusher {
    config: FlusherConfig,
    buffers: Arc<dyn BufferStore>,
    target: Arc<dyn FlushTarget>,
    /// key -> instant of the last completed append
    ages: Mutex<HashMap<String, Instant>>,
    clock: SharedClock,
}

impl fmt::Debug for Flusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flusher")
            .field("config", &self.config)
            .field("tracked", &self.tracked_len())
            .field("persists", &self.persists())
            .finish_non_exhaustive()
    }
}

impl Flusher {
    /// Creates a flusher reading from `buffers` and writing to `target`.
    #[must_use]
    pub fn new(
        config: FlusherConfig,
        buffers: Arc<dyn BufferStore>,
        target: Arc<dyn FlushTarget>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            buffers,
            target,
            ages: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Records that a line for `key` was just buffered.
    pub fn message_done(&self, key: &str) {
        let now = self.clock.now();
        let mut ages = self.ages.lock();
        let age = ages.entry(key.to_string()).or_insert(now);
        *age = (*age).max(now);
    }

    /// Writes every tracked key's buffer without removing it.
    ///
    /// Used on demand and at shutdown. Afterwards the age of every attempted
    /// key is reset to the start of the flush, so a failing key is not retried
    /// on the very next tick. Returns the keys written successfully.
    pub fn flush_all(&self) -> Vec<String> {
        let now = self.clock.now();
        let keys: Vec<String> = self.ages.lock().keys().cloned().collect();

        let mut written = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(text) = self.buffers.peek(key) else {
                self.report_missing(key);
                continue;
            };
            match self.target.write(key, &text) {
                Ok(()) => written.push(key.clone()),
                Err(e) => self.report_write_error(key, &e),
            }
        }

        let mut ages = self.ages.lock();
        for key in &keys {
            if let Some(age) = ages.get_mut(key) {
                *age = (*age).max(now);
            }
        }
        drop(ages);

        tracing::debug!(
            target: "claw_tracr",
            attempted = keys.len(),
            written = written.len(),
            stored = self.target.persists(),
            "flushed all logs"
        );
        written
    }

    /// Flushes every key idle for at least the configured age.
    ///
    /// Buffers are popped before being written, and text whose write fails
    /// is dropped so memory stays bounded. Once all writes were
    /// attempted, each key is checked again: if a line arrived meanwhile the
    /// key stays tracked, otherwise tracking ends. Returns the keys flushed
    /// and no longer tracked.
    pub fn flush(&self, now: Instant) -> Vec<String> {
        let elapsed: Vec<String> = {
            let ages = self.ages.lock();
            ages.iter()
                .filter(|(_, age)| self.is_expired(**age, now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut written = Vec::with_capacity(elapsed.len());
        let mut vanished = Vec::new();
        for key in elapsed {
            let Some(text) = self.buffers.pop(&key) else {
                self.report_missing(&key);
                vanished.push(key);
                continue;
            };
            match self.target.write(&key, &text) {
                Ok(()) => written.push(key),
                // the text is dropped; the key stays tracked for the next cycle
                Err(e) => self.report_write_error(&key, &e),
            }
        }

        let mut ages = self.ages.lock();
        // a late line may have refreshed the age while we were writing
        let mut flushed = Vec::with_capacity(written.len());
        for key in written {
            if self.finalize(&mut ages, &key, now) {
                flushed.push(key);
            }
        }
        for key in vanished {
            self.finalize(&mut ages, &key, now);
        }
        drop(ages);

        if !flushed.is_empty() {
            tracing::debug!(
                target: "claw_tracr",
                entries = flushed.len(),
                stored = self.target.persists(),
                "processed logs"
            );
        }
        flushed
    }

    /// Evicts expired buffers whose keys are not tracked.
    ///
    /// Covers text appended without a [`message_done`](Self::message_done)
    /// signal, so memory stays bounded. Returns the number of evicted keys.
    pub fn sweep(&self, now: Instant) -> usize {
        let tracked: HashSet<String> = self.ages.lock().keys().cloned().collect();
        let orphans = self
            .buffers
            .pop_expired_where(now, self.config.max_age, &|key| !tracked.contains(key));

        for entry in &orphans {
            if let Err(e) = self.target.write(&entry.key, &entry.data) {
                self.report_write_error(&entry.key, &e);
            }
        }
        if !orphans.is_empty() {
            tracing::debug!(
                target: "claw_tracr",
                entries = orphans.len(),
                stored = self.target.persists(),
                "swept untracked logs"
            );
        }
        orphans.len()
    }

    /// Returns true if `key` is tracked.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        self.ages.lock().contains_key(key)
    }

    /// Returns the recorded age of `key`.
    #[must_use]
    pub fn age_of(&self, key: &str) -> Option<Instant> {
        self.ages.lock().get(key).copied()
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.ages.lock().len()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FlusherConfig {
        &self.config
    }

    /// Returns false if flushed text is discarded.
    #[must_use]
    pub fn persists(&self) -> bool {
        self.target.persists()
    }

    fn is_expired(&self, age: Instant, now: Instant) -> bool {
        now.saturating_duration_since(age) >= self.config.max_age
    }

    /// Stops tracking `key` unless it was refreshed after `now`'s decision.
    fn finalize(&self, ages: &mut HashMap<String, Instant>, key: &str, now: Instant) -> bool {
        match ages.get(key) {
            Some(age) if !self.is_expired(*age, now) => false,
            _ => {
                ages.remove(key);
                true
            }
        }
    }

    fn report_missing(&self, key: &str) {
        if self.config.errors.reports() {
            let err = TracrError::MissingBuffer(key.to_string());
            tracing::warn!(target: "claw_tracr", key, error = %err, "skipping key");
        }
    }

    fn report_write_error(&self, key: &str, err: &TracrError) {
        if self.config.errors.reports() {
            tracing::error!(target: "claw_tracr", key, error = %err, "cannot store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;
    use crate::clock::{Clock, ManualClock};
    use crate::error::Result;
    use crate::test_support::EventCapture;
    use std::sync::Weak;
    use test_case::test_case;
    use tracing::Level;

    type WriteHook = Box<dyn Fn(&str) + Send + Sync>;

    /// Records writes; fails for selected keys; optionally runs a hook mid-write.
    #[derive(Default)]
    struct RecordingTarget {
        written: Mutex<Vec<(String, String)>>,
        failing: Mutex<HashSet<String>>,
        hook: Mutex<Option<WriteHook>>,
    }

    impl RecordingTarget {
        fn fail(&self, key: &str) {
            self.failing.lock().insert(key.to_string());
        }

        fn heal(&self) {
            self.failing.lock().clear();
        }

        fn text_for(&self, key: &str) -> String {
            self.written
                .lock()
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, t)| t.as_str())
                .collect()
        }
    }

    impl FlushTarget for RecordingTarget {
        fn write(&self, key: &str, text: &str) -> Result<()> {
            if let Some(hook) = self.hook.lock().as_ref() {
                hook(key);
            }
            if self.failing.lock().contains(key) {
                return Err(std::io::Error::other("disk on fire").into());
            }
            self.written.lock().push((key.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        accumulator: Arc<Accumulator>,
        target: Arc<RecordingTarget>,
        flusher: Arc<Flusher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_errors(ErrorPropagation::Propagate)
        }

        fn with_errors(errors: ErrorPropagation) -> Self {
            let clock = Arc::new(ManualClock::new());
            let accumulator = Arc::new(Accumulator::new(clock.clone()));
            let target = Arc::new(RecordingTarget::default());
            let flusher = Arc::new(Flusher::new(
                FlusherConfig::for_interval(Duration::from_secs(10)).with_errors(errors),
                accumulator.clone(),
                target.clone(),
                clock.clone(),
            ));
            Self {
                clock,
                accumulator,
                target,
                flusher,
            }
        }

        fn log(&self, key: &str, text: &str) {
            assert!(self.accumulator.append(key, text).is_ok());
            self.flusher.message_done(key);
        }
    }

    #[test]
    fn idle_threshold_subtracts_slack() {
        assert_eq!(idle_threshold(Duration::from_secs(10)), Duration::from_millis(9_990));
        assert_eq!(idle_threshold(Duration::from_millis(5)), Duration::ZERO);
    }

    #[test]
    fn flush_writes_and_forgets_idle_keys() {
        let fx = Fixture::new();
        fx.log("abc", "one\n");
        fx.log("abc", "two\n");
        fx.clock.advance(Duration::from_secs(15));

        let flushed = fx.flusher.flush(fx.clock.now());
        assert_eq!(flushed, vec!["abc".to_string()]);
        assert_eq!(fx.target.text_for("abc"), "one\ntwo\n");
        assert!(!fx.flusher.is_tracked("abc"));
        assert!(fx.accumulator.is_empty());
    }

    #[test]
    fn flush_leaves_fresh_keys_alone() {
        let fx = Fixture::new();
        fx.log("old", "o\n");
        fx.clock.advance(Duration::from_secs(8));
        fx.log("new", "n\n");
        fx.clock.advance(Duration::from_secs(3));

        let flushed = fx.flusher.flush(fx.clock.now());
        assert_eq!(flushed, vec!["old".to_string()]);
        assert!(fx.flusher.is_tracked("new"));
        assert_eq!(fx.accumulator.peek("new").as_deref(), Some("n\n"));
    }

    #[test]
    fn flush_threshold_is_inclusive() {
        let fx = Fixture::new();
        fx.log("k", "x\n");
        let max_age = fx.flusher.config().max_age;

        fx.clock.advance(max_age - Duration::from_millis(1));
        assert!(fx.flusher.flush(fx.clock.now()).is_empty());

        fx.clock.advance(Duration::from_millis(1));
        assert_eq!(fx.flusher.flush(fx.clock.now()), vec!["k".to_string()]);
    }

    #[test]
    fn late_write_during_flush_stays_tracked() {
        let fx = Fixture::new();
        fx.log("k", "early\n");
        fx.clock.advance(Duration::from_secs(15));
        let decided_at = fx.clock.now();

        let accumulator = Arc::clone(&fx.accumulator);
        let flusher: Weak<Flusher> = Arc::downgrade(&fx.flusher);
        let clock = Arc::clone(&fx.clock);
        *fx.target.hook.lock() = Some(Box::new(move |key| {
            // a caller logs to the same key while its old buffer is being written
            clock.advance(Duration::from_millis(5));
            let _ = accumulator.append(key, "late\n");
            if let Some(flusher) = flusher.upgrade() {
                flusher.message_done(key);
            }
        }));

        let flushed = fx.flusher.flush(decided_at);
        *fx.target.hook.lock() = None;

        assert!(flushed.is_empty());
        assert!(fx.flusher.is_tracked("k"));
        assert_eq!(fx.target.text_for("k"), "early\n");
        assert_eq!(fx.accumulator.peek("k").as_deref(), Some("late\n"));

        fx.clock.advance(Duration::from_secs(15));
        assert_eq!(fx.flusher.flush(fx.clock.now()), vec!["k".to_string()]);
        assert_eq!(fx.target.text_for("k"), "early\nlate\n");
        assert!(!fx.flusher.is_tracked("k"));
    }

    #[test]
    fn write_failure_is_isolated_and_drops_text() {
        let fx = Fixture::new();
        fx.log("bad", "b\n");
        fx.log("good", "g\n");
        fx.target.fail("bad");
        fx.clock.advance(Duration::from_secs(15));

        let flushed = fx.flusher.flush(fx.clock.now());
        assert_eq!(flushed, vec!["good".to_string()]);
        assert!(fx.flusher.is_tracked("bad"));
        assert!(fx.accumulator.peek("bad").is_none());

        // later lines for the key go out once the target recovers
        fx.target.heal();
        fx.log("bad", "b2\n");
        fx.clock.advance(Duration::from_secs(15));
        let flushed = fx.flusher.flush(fx.clock.now());
        assert_eq!(flushed, vec!["bad".to_string()]);
        assert_eq!(fx.target.text_for("bad"), "b2\n");
        assert!(!fx.flusher.is_tracked("bad"));
    }

    #[test]
    fn failing_target_keeps_memory_bounded() {
        let fx = Fixture::new();
        for key in ["a", "b", "c"] {
            fx.target.fail(key);
        }

        for _ in 0..4 {
            for key in ["a", "b", "c"] {
                fx.log(key, "some line\n");
            }
            fx.clock.advance(Duration::from_secs(25));
            fx.flusher.flush(fx.clock.now());
            fx.flusher.sweep(fx.clock.now());
            assert!(fx.accumulator.is_empty());
        }

        // keys with nothing new buffered are forgotten on the next cycle
        fx.clock.advance(Duration::from_secs(25));
        fx.flusher.flush(fx.clock.now());
        assert_eq!(fx.flusher.tracked_len(), 0);
        assert!(fx.target.text_for("a").is_empty());
    }

    #[test]
    fn sweep_drops_orphans_that_fail_to_write() {
        let fx = Fixture::new();
        assert!(fx.accumulator.append("orphan", "o\n").is_ok());
        fx.target.fail("orphan");
        fx.clock.advance(Duration::from_secs(15));

        assert_eq!(fx.flusher.sweep(fx.clock.now()), 1);
        assert!(fx.accumulator.is_empty());
        assert!(fx.target.text_for("orphan").is_empty());
    }

    #[test]
    fn missing_buffer_is_skipped_and_forgotten() {
        let fx = Fixture::new();
        fx.flusher.message_done("ghost");
        fx.log("real", "r\n");
        fx.clock.advance(Duration::from_secs(15));

        let flushed = fx.flusher.flush(fx.clock.now());
        assert_eq!(flushed, vec!["real".to_string()]);
        assert!(!fx.flusher.is_tracked("ghost"));
        assert!(fx.target.text_for("ghost").is_empty());
    }

    #[test]
    fn flush_all_writes_without_removing() {
        let fx = Fixture::new();
        fx.log("abc", "a\n");
        fx.log("xyz", "x\n");
        fx.clock.advance(Duration::from_secs(15));

        let mut written = fx.flusher.flush_all();
        written.sort();
        assert_eq!(written, vec!["abc".to_string(), "xyz".to_string()]);
        assert_eq!(fx.accumulator.peek("abc").as_deref(), Some("a\n"));
        assert_eq!(fx.flusher.tracked_len(), 2);

        // ages were reset, so nothing is idle right after a bulk flush
        assert_eq!(fx.flusher.age_of("abc"), Some(fx.clock.now()));
        assert!(fx.flusher.flush(fx.clock.now()).is_empty());
    }

    #[test]
    fn flush_all_resets_failed_keys_too() {
        let fx = Fixture::new();
        fx.log("bad", "b\n");
        fx.flusher.message_done("ghost");
        fx.target.fail("bad");
        fx.clock.advance(Duration::from_secs(15));

        assert!(fx.flusher.flush_all().is_empty());
        assert_eq!(fx.flusher.age_of("bad"), Some(fx.clock.now()));
        assert_eq!(fx.flusher.age_of("ghost"), Some(fx.clock.now()));
    }

    #[test]
    fn sweep_evicts_only_untracked_keys() {
        let fx = Fixture::new();
        assert!(fx.accumulator.append("orphan", "o\n").is_ok());
        fx.log("tracked", "t\n");
        fx.clock.advance(Duration::from_secs(15));

        assert_eq!(fx.flusher.sweep(fx.clock.now()), 1);
        assert_eq!(fx.target.text_for("orphan"), "o\n");
        assert_eq!(fx.accumulator.peek("tracked").as_deref(), Some("t\n"));
        assert_eq!(fx.accumulator.len(), 1);
    }

    #[test]
    fn message_done_never_moves_age_backwards() {
        let fx = Fixture::new();
        let start = fx.clock.now();
        fx.clock.advance(Duration::from_secs(5));
        fx.flusher.message_done("k");
        let recorded = fx.flusher.age_of("k");

        fx.clock.set(start);
        fx.flusher.message_done("k");
        assert_eq!(fx.flusher.age_of("k"), recorded);
    }

    /// Runs an aged flush over one missing and one failing key.
    fn flush_with_failures(errors: ErrorPropagation) -> EventCapture {
        let fx = Fixture::with_errors(errors);
        fx.flusher.message_done("ghost");
        fx.log("bad", "b\n");
        fx.target.fail("bad");
        fx.clock.advance(Duration::from_secs(15));

        let capture = EventCapture::default();
        capture.run(|| fx.flusher.flush(fx.clock.now()));
        capture
    }

    #[test]
    fn propagate_reports_each_failure() {
        let capture = flush_with_failures(ErrorPropagation::Propagate);
        let events = capture.with_target("claw_tracr");

        let missing: Vec<_> = events.iter().filter(|e| e.level == Level::WARN).collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].message, "skipping key");
        assert_eq!(missing[0].fields.get("key").map(String::as_str), Some("ghost"));

        let failed: Vec<_> = events.iter().filter(|e| e.level == Level::ERROR).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].message, "cannot store");
        assert_eq!(failed[0].fields.get("key").map(String::as_str), Some("bad"));
        assert!(failed[0].fields.get("error").is_some_and(|e| e.contains("disk on fire")));
    }

    #[test_case(ErrorPropagation::Ignore, 0 ; "ignore is silent")]
    #[test_case(ErrorPropagation::Propagate, 2 ; "propagate reports")]
    fn failure_reports_follow_mode(errors: ErrorPropagation, expected: usize) {
        let capture = flush_with_failures(errors);
        let reports = capture
            .with_target("claw_tracr")
            .into_iter()
            .filter(|e| e.level == Level::WARN || e.level == Level::ERROR)
            .count();
        assert_eq!(reports, expected);
    }

    #[test]
    fn bulk_flush_failures_follow_mode() {
        for (errors, expected) in [(ErrorPropagation::Ignore, 0), (ErrorPropagation::Propagate, 2)] {
            let fx = Fixture::with_errors(errors);
            fx.flusher.message_done("ghost");
            fx.log("bad", "b\n");
            fx.target.fail("bad");

            let capture = EventCapture::default();
            capture.run(|| fx.flusher.flush_all());
            let reports = capture
                .with_target("claw_tracr")
                .into_iter()
                .filter(|e| e.level == Level::WARN || e.level == Level::ERROR)
                .count();
            assert_eq!(reports, expected);
        }
    }
}
