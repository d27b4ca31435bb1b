use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Shared, immutable decoded PCM.
///
/// `DecodedAudio` stores interleaved samples in an `Arc<[f32]>`, so cloning
/// only bumps a refcount. A stem's sample data is never mutated after decode;
/// the control side and the audio callback can both hold a copy safely.
///
/// # Examples
///
/// ```
/// use stemset_transport::DecodedAudio;
///
/// let audio = DecodedAudio::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// assert_eq!(audio.frames(), 2);
///
/// // Clone is cheap - just bumps the refcount
/// let copy = audio.clone();
/// assert_eq!(copy.frames(), 2);
/// ```
#[derive(Clone)]
pub struct DecodedAudio {
    /// Interleaved samples. For stereo the layout is [L, R, L, R, ...].
    samples: Arc<[f32]>,
    /// Sample rate in Hz (e.g., 44100, 48000)
    sample_rate: u32,
    /// Number of interleaved channels
    channels: u16,
}

impl DecodedAudio {
    /// Create a new `DecodedAudio` from owned sample data.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by
    /// `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    /// Get a slice of all interleaved samples.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Get the sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels.
    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Resample this audio to a target sample rate.
    ///
    /// If the audio is already at the target rate, returns a clone (cheap
    /// refcount bump). Otherwise performs sinc interpolation resampling.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }

        let channels = self.channels as usize;
        let input_frames = self.frames();
        let resample_ratio = target_sample_rate as f64 / self.sample_rate as f64;

        // Convert interleaved samples to per-channel format for rubato
        let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
        for frame_idx in 0..input_frames {
            for ch in 0..channels {
                input_channels[ch].push(self.samples[frame_idx * channels + ch]);
            }
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler =
            SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;

        let output_channels = resampler.process(&input_channels, None)?;

        // Back to interleaved
        let mut output_samples = Vec::with_capacity(output_channels[0].len() * channels);
        for frame_idx in 0..output_channels[0].len() {
            for ch in 0..channels {
                output_samples.push(output_channels[ch][frame_idx]);
            }
        }

        Ok(Self::new(output_samples, target_sample_rate, self.channels))
    }
}

impl std::fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One loaded stem and its user-facing mixer state.
///
/// `playing`, `position` and `started_at` belong to the transport: `position`
/// is authoritative only while the track is stopped, and `started_at` is the
/// shared engine-clock anchor set by the `play()` call that started the
/// track. Mute and solo are user intent; they never stop the underlying
/// voice, they only drive [`Track::effective_gain`].
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub audio: DecodedAudio,
    /// User volume in [0, 1], independent of mute/solo.
    pub volume: f32,
    /// Stereo pan in [-1, 1], 0 is center.
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
    pub playing: bool,
    /// Offset in seconds into the stem; valid while stopped.
    pub position: f64,
    /// Engine-clock time this track's playback is anchored to; Some while
    /// playing.
    pub started_at: Option<f64>,
}

impl Track {
    pub fn new(id: TrackId, name: String, audio: DecodedAudio) -> Self {
        Self {
            id,
            name,
            audio,
            volume: 1.0,
            pan: 0.0,
            muted: false,
            soloed: false,
            playing: false,
            position: 0.0,
            started_at: None,
        }
    }

    /// The final audible gain after applying mute and solo policy on top of
    /// the user volume.
    ///
    /// Mute always wins. Otherwise, if any track in the session is soloed
    /// (`any_solo`) and this one is not, the track is silenced. Solo is a
    /// global policy: the caller recomputes this for every track whenever any
    /// solo flag changes.
    pub fn effective_gain(&self, any_solo: bool) -> f32 {
        if self.muted {
            0.0
        } else if any_solo && !self.soloed {
            0.0
        } else {
            self.volume
        }
    }
}

/// Immutable per-track data handed to the audio callback.
///
/// Snapshots are rebuilt on the control side whenever a track is added and
/// swapped into the callback through a basedrop `Shared`, so the callback
/// never sees a torn track list.
#[derive(Debug, Clone)]
pub struct TrackAudio {
    pub id: TrackId,
    pub audio: DecodedAudio,
}

/// Control-side to audio-callback commands.
///
/// All commands are fire-and-forget graph mutations; none of them block and
/// none of them can fail on the callback side. Times are engine-clock
/// seconds.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    /// Start a voice at `offset` seconds into its stem.
    StartTrack { id: TrackId, offset: f64 },
    StopTrack { id: TrackId },
    /// Set the effective (post mute/solo) gain of a voice.
    SetGain { id: TrackId, gain: f32 },
    SetPan { id: TrackId, pan: f32 },
    /// Render a metronome click whose onset is at `at` on the engine clock.
    /// A timestamp already in the past starts immediately.
    Click { at: f64 },
    SetClickGain { gain: f32 },
}

/// Audio-callback to control-side status.
#[derive(Debug, Clone, Copy)]
pub enum Status {
    /// Engine clock in seconds, derived from the number of frames the stream
    /// has rendered. Published once per callback.
    Clock(f64),
}
