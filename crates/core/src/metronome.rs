/// How far ahead of the engine clock clicks are committed. Click generation
/// must be precise; the tick cadence driving it may be coarse and jittery,
/// so each tick commits every click falling inside this horizon.
pub const LOOKAHEAD_SECS: f64 = 0.1;

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;

/// Look-ahead click scheduler.
///
/// An explicit state object the host drives through [`Metronome::tick`] at
/// whatever cadence its scheduling primitive offers. Emitting a click per
/// tick would drift under scheduling jitter; instead each tick walks
/// `next_click` forward through the look-ahead window and the audio side
/// renders the clicks at their committed timestamps.
///
/// `start` while already running is a full restart from `now`, never a
/// no-op, so tempo changes take effect immediately.
#[derive(Debug)]
pub struct Metronome {
    bpm: f64,
    active: bool,
    next_click: f64,
    volume: f32,
}

impl Metronome {
    pub fn new() -> Self {
        Self {
            bpm: 120.0,
            active: false,
            next_click: 0.0,
            volume: 0.5,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Seconds between clicks at the current tempo.
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Start (or fully restart) clicking at `bpm`, with the first click due
    /// at `now`. Out-of-range tempos clamp to [40, 240].
    pub fn start(&mut self, bpm: f64, now: f64) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.active = true;
        self.next_click = now;
    }

    /// Stop scheduling. Clicks whose envelope has already begun finish
    /// naturally on the audio side; no new clicks are committed.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Change tempo. If running this is a restart from `now` at the new
    /// tempo, not a ramp.
    pub fn update_bpm(&mut self, bpm: f64, now: f64) {
        if self.active {
            self.start(bpm, now);
        } else {
            self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        }
    }

    /// Commit every click due inside the look-ahead window and return their
    /// engine-clock timestamps. Returns nothing once stopped, even for
    /// timestamps that were computable before the stop.
    pub fn tick(&mut self, now: f64) -> Vec<f64> {
        let mut clicks = Vec::new();
        if !self.active {
            return clicks;
        }
        while self.next_click < now + LOOKAHEAD_SECS {
            clicks.push(self.next_click);
            self.next_click += self.beat_interval();
        }
        clicks
    }
}

impl Default for Metronome {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beat_interval_at_120_is_half_second() {
        let mut m = Metronome::new();
        m.start(120.0, 0.0);
        assert_eq!(m.beat_interval(), 0.5);
    }

    #[test]
    fn bpm_clamps_to_valid_range() {
        let mut m = Metronome::new();
        m.start(10.0, 0.0);
        assert_eq!(m.bpm(), 40.0);
        m.start(999.0, 0.0);
        assert_eq!(m.bpm(), 240.0);
    }

    #[test]
    fn ten_seconds_at_120_yields_twenty_clicks() {
        let mut m = Metronome::new();
        m.start(120.0, 0.0);

        // Drive the scheduler at a deliberately irregular, display-like
        // cadence and count clicks committed for the first 10 seconds.
        let mut clicks: Vec<f64> = Vec::new();
        let mut now = 0.0;
        let mut step = 0;
        while now < 10.0 {
            clicks.extend(m.tick(now));
            // Alternate between 12 ms and 31 ms tick spacing
            now += if step % 2 == 0 { 0.012 } else { 0.031 };
            step += 1;
        }
        let in_window = clicks.iter().filter(|&&t| t < 10.0).count();
        assert!(
            (19..=21).contains(&in_window),
            "expected 20 +/- 1 clicks in 10 s, got {in_window}"
        );
    }

    #[test]
    fn clicks_are_spaced_by_beat_interval() {
        let mut m = Metronome::new();
        m.start(90.0, 2.0);
        let mut clicks = Vec::new();
        for i in 0..40 {
            clicks.extend(m.tick(2.0 + i as f64 * 0.1));
        }
        assert!(clicks.len() >= 2);
        assert_eq!(clicks[0], 2.0, "first click lands at start time");
        for pair in clicks.windows(2) {
            assert!((pair[1] - pair[0] - 60.0 / 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn update_bpm_before_first_click_uses_new_tempo() {
        let mut m = Metronome::new();
        m.start(90.0, 0.0);
        // Tempo changes before any tick has fired
        m.update_bpm(150.0, 0.0);

        let clicks = m.tick(0.5);
        assert!(clicks.len() >= 2);
        let spacing = clicks[1] - clicks[0];
        assert!(
            (spacing - 60.0 / 150.0).abs() < 1e-9,
            "spacing must reflect 60/150, got {spacing}"
        );
    }

    #[test]
    fn update_bpm_while_stopped_only_stores_tempo() {
        let mut m = Metronome::new();
        m.update_bpm(150.0, 0.0);
        assert!(!m.is_active());
        assert_eq!(m.bpm(), 150.0);
        assert!(m.tick(1.0).is_empty());
    }

    #[test]
    fn no_clicks_after_stop() {
        let mut m = Metronome::new();
        m.start(120.0, 0.0);
        assert!(!m.tick(0.0).is_empty());
        m.stop();
        assert!(m.tick(1.0).is_empty());
        assert!(m.tick(2.0).is_empty());
    }

    #[test]
    fn start_while_running_restarts_from_now() {
        let mut m = Metronome::new();
        m.start(120.0, 0.0);
        let _ = m.tick(0.0);
        // Restart later; the next click must land at the new start time, not
        // on the old grid
        m.start(120.0, 3.3);
        let clicks = m.tick(3.3);
        assert_eq!(clicks[0], 3.3);
    }

    #[test]
    fn next_click_is_never_rearmed_in_the_past() {
        let mut m = Metronome::new();
        m.start(60.0, 5.0);
        let clicks = m.tick(5.0);
        // Everything committed lies inside [now, now + lookahead)
        for t in clicks {
            assert!(t >= 5.0);
            assert!(t < 5.0 + LOOKAHEAD_SECS);
        }
    }

    #[test]
    fn volume_clamps() {
        let mut m = Metronome::new();
        m.set_volume(1.5);
        assert_eq!(m.volume(), 1.0);
        m.set_volume(-0.5);
        assert_eq!(m.volume(), 0.0);
    }
}
