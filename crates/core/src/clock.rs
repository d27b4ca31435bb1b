use std::time::Instant;

/// Control-side view of the engine clock.
///
/// The authoritative clock lives in the audio callback (frames rendered over
/// sample rate) and reaches the control side as `Status::Clock` observations.
/// Between observations `now()` extrapolates with a monotonic `Instant`, so
/// the clock keeps advancing even when status polling happens at a coarse,
/// display-refresh-like cadence. The extrapolation can disagree with the
/// stream clock by up to one poll interval; the metronome's look-ahead
/// horizon absorbs that.
#[derive(Debug)]
pub struct EngineClock {
    base: f64,
    observed_at: Instant,
}

impl EngineClock {
    pub fn new() -> Self {
        Self {
            base: 0.0,
            observed_at: Instant::now(),
        }
    }

    /// Record a clock observation from the audio callback. Observations that
    /// would move the base backwards are ignored.
    pub fn observe(&mut self, reported: f64) {
        if reported >= self.base {
            self.base = reported;
            self.observed_at = Instant::now();
        }
    }

    /// Engine-clock seconds, extrapolated from the latest observation.
    pub fn now(&self) -> f64 {
        self.base + self.observed_at.elapsed().as_secs_f64()
    }
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}
