//! The audio-callback state as a plain struct, testable without a device.

use stemset_transport::{Command, DecodedAudio, TrackAudio, TrackId};

/// Seconds a gain or pan change takes to ramp full scale. Parameter steps are
/// smoothed so mute/volume changes land without zipper noise.
const GAIN_RAMP_SECS: f32 = 0.010;

/// Click transient length.
const CLICK_SECS: f32 = 0.05;
const CLICK_HIGH_HZ: f32 = 1600.0;
const CLICK_LOW_HZ: f32 = 800.0;
const CLICK_ONSET_AMP: f32 = 0.5;
const CLICK_FLOOR_AMP: f32 = 0.01;

/// Equal-power stereo pan: -1 is hard left, 0 center, 1 hard right.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// A parameter that moves toward its target over a short linear ramp.
#[derive(Debug, Clone, Copy)]
struct Smoothed {
    current: f32,
    target: f32,
    step: f32,
}

impl Smoothed {
    fn new(value: f32, sample_rate: u32) -> Self {
        Self {
            current: value,
            target: value,
            step: 1.0 / (sample_rate as f32 * GAIN_RAMP_SECS),
        }
    }

    fn set(&mut self, target: f32) {
        self.target = target;
    }

    fn next(&mut self) -> f32 {
        if self.current < self.target {
            self.current = (self.current + self.step).min(self.target);
        } else if self.current > self.target {
            self.current = (self.current - self.step).max(self.target);
        }
        self.current
    }
}

/// One stem's playback state inside the callback. The control side never
/// touches this directly; it arrives at it through commands and snapshots.
struct Voice {
    id: TrackId,
    audio: DecodedAudio,
    frame: usize,
    playing: bool,
    gain: Smoothed,
    pan: f32,
}

impl Voice {
    fn new(id: TrackId, audio: DecodedAudio, sample_rate: u32) -> Self {
        Self {
            id,
            audio,
            frame: 0,
            playing: false,
            gain: Smoothed::new(1.0, sample_rate),
            pan: 0.0,
        }
    }
}

/// A scheduled metronome click: a 1600 Hz + 800 Hz transient with an
/// exponential decay from onset amplitude to near-silence over 50 ms.
struct Click {
    onset_frame: u64,
}

impl Click {
    fn sample_at(&self, frame: u64, sample_rate: u32) -> Option<f32> {
        if frame < self.onset_frame {
            return None;
        }
        let t = (frame - self.onset_frame) as f32 / sample_rate as f32;
        if t >= CLICK_SECS {
            return None;
        }
        let env = CLICK_ONSET_AMP * (CLICK_FLOOR_AMP / CLICK_ONSET_AMP).powf(t / CLICK_SECS);
        let tau = 2.0 * std::f32::consts::PI;
        let tone = (tau * CLICK_HIGH_HZ * t).sin() + (tau * CLICK_LOW_HZ * t).sin();
        Some(env * tone)
    }

    fn finished(&self, frame: u64, sample_rate: u32) -> bool {
        frame >= self.onset_frame + (CLICK_SECS * sample_rate as f32) as u64
    }
}

/// Mixes all playing voices plus the click bus into interleaved output.
///
/// The cpal callback owns one of these; tests construct one directly and
/// call [`Mixer::render`] on plain buffers.
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    frames_rendered: u64,
    voices: Vec<Voice>,
    clicks: Vec<Click>,
    click_gain: Smoothed,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frames_rendered: 0,
            voices: Vec::new(),
            clicks: Vec::new(),
            // Matches the control side's default metronome volume
            click_gain: Smoothed::new(0.5, sample_rate),
        }
    }

    /// Engine clock in seconds: frames rendered since the stream started.
    pub fn clock_secs(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Adopt a new track snapshot, preserving playback state of voices whose
    /// id survives.
    pub fn sync_tracks(&mut self, tracks: &[TrackAudio]) {
        let mut voices = Vec::with_capacity(tracks.len());
        for track in tracks {
            if let Some(idx) = self.voices.iter().position(|v| v.id == track.id) {
                let mut voice = self.voices.swap_remove(idx);
                voice.audio = track.audio.clone();
                voices.push(voice);
            } else {
                voices.push(Voice::new(track.id, track.audio.clone(), self.sample_rate));
            }
        }
        self.voices = voices;
    }

    /// Apply one control command. Unknown ids are ignored; the control side
    /// has already reported them to the caller.
    pub fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::StartTrack { id, offset } => {
                let sample_rate = self.sample_rate;
                if let Some(voice) = self.voice_mut(id) {
                    voice.frame = (offset.max(0.0) * sample_rate as f64) as usize;
                    voice.playing = true;
                }
            }
            Command::StopTrack { id } => {
                if let Some(voice) = self.voice_mut(id) {
                    voice.playing = false;
                }
            }
            Command::SetGain { id, gain } => {
                if let Some(voice) = self.voice_mut(id) {
                    voice.gain.set(gain);
                }
            }
            Command::SetPan { id, pan } => {
                if let Some(voice) = self.voice_mut(id) {
                    voice.pan = pan;
                }
            }
            Command::Click { at } => {
                // A click scheduled in the past starts on the next frame
                let onset = (at * self.sample_rate as f64) as u64;
                self.clicks.push(Click {
                    onset_frame: onset.max(self.frames_rendered),
                });
            }
            Command::SetClickGain { gain } => self.click_gain.set(gain),
        }
    }

    fn voice_mut(&mut self, id: TrackId) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|v| v.id == id)
    }

    /// Render interleaved frames into `out`, advancing the engine clock.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        for frame in out.chunks_mut(channels) {
            frame.fill(0.0);

            for voice in &mut self.voices {
                if !voice.playing {
                    continue;
                }
                if voice.frame >= voice.audio.frames() {
                    voice.playing = false;
                    continue;
                }
                let gain = voice.gain.next();
                let (left, right) = pan_gains(voice.pan);
                let voice_channels = voice.audio.channels() as usize;
                let samples = voice.audio.samples();

                for (ch, slot) in frame.iter_mut().enumerate() {
                    let sample = samples[voice.frame * voice_channels + (ch % voice_channels)];
                    let pan_gain = if channels == 1 {
                        1.0
                    } else {
                        match ch {
                            0 => left,
                            1 => right,
                            _ => 1.0,
                        }
                    };
                    *slot += sample * gain * pan_gain;
                }
                voice.frame += 1;
            }

            let click_gain = self.click_gain.next();
            for click in &self.clicks {
                if let Some(sample) = click.sample_at(self.frames_rendered, self.sample_rate) {
                    for slot in frame.iter_mut() {
                        *slot += sample * click_gain;
                    }
                }
            }

            self.frames_rendered += 1;
        }

        let frames_rendered = self.frames_rendered;
        let sample_rate = self.sample_rate;
        self.clicks
            .retain(|c| !c.finished(frames_rendered, sample_rate));
    }
}
