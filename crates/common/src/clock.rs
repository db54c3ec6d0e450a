//! Clock and timing utilities for recording duration accounting.
//!
//! Elapsed recording time excludes paused wall-clock time. The time source
//! is abstracted behind [`Clock`] so the accounting can be driven by a
//! manual clock in tests and by a runtime clock in production.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A monotonic millisecond time source.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Tracks active recording time across pause/resume cycles.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    started_at_ms: u64,
    paused_accum_ms: u64,
    paused_since_ms: Option<u64>,

    /// Wall-clock time at start (RFC 3339).
    started_wall: String,
}

impl RecordingClock {
    /// Start a clock anchored to `clock`'s current time.
    pub fn start(clock: &dyn Clock) -> Self {
        Self {
            started_at_ms: clock.now_ms(),
            paused_accum_ms: 0,
            paused_since_ms: None,
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Mark the beginning of a pause. No-op if already paused.
    pub fn pause(&mut self, clock: &dyn Clock) {
        if self.paused_since_ms.is_none() {
            self.paused_since_ms = Some(clock.now_ms());
        }
    }

    /// End a pause, folding its length into the accumulated offset.
    pub fn resume(&mut self, clock: &dyn Clock) {
        if let Some(since) = self.paused_since_ms.take() {
            self.paused_accum_ms += clock.now_ms().saturating_sub(since);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since_ms.is_some()
    }

    /// Active (non-paused) milliseconds since start.
    pub fn active_ms(&self, clock: &dyn Clock) -> u64 {
        let now = self.paused_since_ms.unwrap_or_else(|| clock.now_ms());
        now.saturating_sub(self.started_at_ms)
            .saturating_sub(self.paused_accum_ms)
    }

    /// Active whole seconds since start.
    pub fn active_secs(&self, clock: &dyn Clock) -> u64 {
        self.active_ms(clock) / 1000
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Total paused time folded in so far (excludes an in-progress pause).
    pub fn paused_accum_ms(&self) -> u64 {
        self.paused_accum_ms
    }

    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }
}

/// Rate limiter for periodic work such as debug snapshots.
#[derive(Debug)]
pub struct RateController {
    target_interval_ms: u64,
    last_tick_ms: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self::with_interval_ms(1000 / target_hz.max(1) as u64)
    }

    pub fn with_interval_ms(interval_ms: u64) -> Self {
        Self {
            target_interval_ms: interval_ms,
            last_tick_ms: None,
        }
    }

    /// Returns true (and records the tick) if the interval has elapsed.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ms: u64) -> bool {
        match self.last_tick_ms {
            None => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            Some(last) if current_ms >= last + self.target_interval_ms => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.last_tick_ms = None;
    }

    pub fn interval_ms(&self) -> u64 {
        self.target_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_excluded_from_active_time() {
        let clock = ManualClock::new();
        let mut rec = RecordingClock::start(&clock);

        clock.advance(Duration::from_secs(10));
        rec.pause(&clock);
        clock.advance(Duration::from_secs(5));
        assert_eq!(rec.active_secs(&clock), 10);
        rec.resume(&clock);
        clock.advance(Duration::from_secs(10));

        assert_eq!(rec.active_secs(&clock), 20);
        assert_eq!(rec.paused_accum_ms(), 5_000);
    }

    #[test]
    fn test_double_pause_is_noop() {
        let clock = ManualClock::new();
        let mut rec = RecordingClock::start(&clock);
        clock.advance(Duration::from_secs(1));
        rec.pause(&clock);
        clock.advance(Duration::from_secs(1));
        rec.pause(&clock);
        clock.advance(Duration::from_secs(1));
        rec.resume(&clock);
        assert_eq!(rec.paused_accum_ms(), 2_000);
        assert_eq!(rec.active_ms(&clock), 1_000);
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::with_interval_ms(200);
        assert!(ctrl.should_tick(0));
        assert!(!ctrl.should_tick(150));
        assert!(ctrl.should_tick(200));
        ctrl.reset();
        assert!(ctrl.should_tick(201));
    }

    #[test]
    fn test_rate_controller_from_hz() {
        assert_eq!(RateController::new(10).interval_ms(), 100);
    }
}
