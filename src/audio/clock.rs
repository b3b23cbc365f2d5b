//! Playback clock for CCPlayer
//!
//! The clock measures media time elapsed since playback started, scaled by
//! the playback speed. It is rebased on start, resume and seek, and on every
//! speed change so that elapsed time never jumps.

use crate::utils::error::{CCPlayerError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic time for a [`Clock`]
pub trait TimeSource: Send + Sync {
    /// Get current time in microseconds
    fn now_micros(&self) -> i64;
}

/// Monotonic system time
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_micros(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Time source advanced by hand, for deterministic tests
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, micros: i64) {
        self.now.fetch_add(micros, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    /// Source time at the last rebase
    source_micros: i64,

    /// Elapsed media time at the last rebase
    elapsed_micros: f64,
}

struct ClockState {
    anchor: Option<Anchor>,
    speed: f64,
}

/// Speed-scalable elapsed-time source
pub struct Clock {
    source: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl Clock {
    /// Create a clock on system time
    pub fn new() -> Self {
        Self::with_source(Arc::new(SystemTimeSource::new()))
    }

    /// Create a clock on a custom time source
    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            state: Mutex::new(ClockState {
                anchor: None,
                speed: 1.0,
            }),
        }
    }

    /// Start or rebase the clock
    ///
    /// # Arguments
    ///
    /// * `time_shift_micros` - Elapsed time reported right after the call
    pub fn start(&self, time_shift_micros: i64) {
        let now = self.source.now_micros();
        self.state.lock().anchor = Some(Anchor {
            source_micros: now,
            elapsed_micros: time_shift_micros as f64,
        });
    }

    /// Elapsed media time in microseconds
    ///
    /// # Returns
    ///
    /// Fails if the clock was never started
    pub fn elapsed_micros(&self) -> Result<i64> {
        let state = self.state.lock();
        let anchor = state
            .anchor
            .ok_or_else(|| CCPlayerError::Internal("Clock queried before start".to_string()))?;
        Ok(Self::elapsed_at(anchor, state.speed, self.source.now_micros()) as i64)
    }

    /// Change the speed factor without a discontinuity
    ///
    /// # Arguments
    ///
    /// * `factor` - Speed factor, must be positive
    pub fn set_playback_speed(&self, factor: f64) -> Result<()> {
        if !(factor > 0.0) || !factor.is_finite() {
            return Err(CCPlayerError::InvalidArgument(format!(
                "Playback speed must be positive, got {}",
                factor
            )));
        }

        let now = self.source.now_micros();
        let mut state = self.state.lock();
        if let Some(anchor) = state.anchor {
            state.anchor = Some(Anchor {
                source_micros: now,
                elapsed_micros: Self::elapsed_at(anchor, state.speed, now),
            });
        }
        state.speed = factor;
        Ok(())
    }

    pub fn playback_speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().anchor.is_some()
    }

    fn elapsed_at(anchor: Anchor, speed: f64, now: i64) -> f64 {
        anchor.elapsed_micros + (now - anchor.source_micros) as f64 * speed
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
