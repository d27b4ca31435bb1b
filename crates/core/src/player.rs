use basedrop::Shared;
use stemset_engine::EngineHandle;
use stemset_transport::{Command, DecodedAudio, Status, Track, TrackId};

use crate::clock::EngineClock;
use crate::metronome::Metronome;
use crate::registry::{TrackAttributes, TrackRegistry};
use crate::PlayerError;

/// The multitrack player: transport, per-track mixer state, and metronome
/// behind one facade.
///
/// The audio output is lazily initialized: the host calls [`Player::activate`]
/// on its first user gesture, and until then operations that need the output
/// (`play`, `start_metronome`) are deterministic no-ops re-checked on the
/// next call. Track loading and mixer-state mutations work either way; a
/// fresh output is primed from the registry on activation.
///
/// All mutations are expected from a single control-flow context. The host
/// drives [`Player::tick`] at whatever cadence its scheduling primitive
/// offers (a display-refresh callback is plenty); ticking pumps the engine
/// clock and the metronome's look-ahead window.
pub struct Player {
    output: Option<EngineHandle>,
    clock: EngineClock,
    registry: TrackRegistry,
    metronome: Metronome,
    resume_metronome: bool,
}

impl Player {
    pub fn new() -> Self {
        Self {
            output: None,
            clock: EngineClock::new(),
            registry: TrackRegistry::new(),
            metronome: Metronome::new(),
            resume_metronome: false,
        }
    }

    /// Bring up the audio output. Idempotent; called on the first user
    /// gesture per platform audio-unlock policy.
    pub fn activate(&mut self) -> anyhow::Result<()> {
        if self.output.is_some() {
            return Ok(());
        }

        let output = stemset_engine::start(Vec::new())?;
        self.registry.resample_all(output.sample_rate)?;
        self.output = Some(output);

        self.publish_tracks();
        let params = self.registry.all_params();
        for command in params {
            self.push(command);
        }
        self.push(Command::SetClickGain {
            gain: self.metronome.volume(),
        });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }

    /// Register a stem the environment already decoded.
    pub fn load_decoded(
        &mut self,
        audio: DecodedAudio,
        name: impl Into<String>,
    ) -> Result<TrackId, PlayerError> {
        let audio = match &self.output {
            Some(output) => audio
                .resample(output.sample_rate)
                .map_err(PlayerError::Decode)?,
            None => audio,
        };
        let id = self.registry.insert(name.into(), audio);
        self.publish_tracks();
        // Prime the new voice's gain and pan
        if let Ok(gain) = self.registry.effective_gain(id) {
            self.push(Command::SetGain { id, gain });
        }
        Ok(id)
    }

    /// Decode raw audio file bytes and register the stem. A failed decode is
    /// terminal for this load; the caller re-supplies the bytes to retry.
    pub fn load_track(
        &mut self,
        bytes: Vec<u8>,
        name: impl Into<String>,
    ) -> Result<TrackId, PlayerError> {
        let audio = stemset_decode::decode_bytes(bytes).map_err(PlayerError::Decode)?;
        self.load_decoded(audio, name)
    }

    /// Start every stopped track from its stored position, all sharing one
    /// clock anchor. Re-entrant: running tracks are untouched. Restarts the
    /// metronome if it was active at the last pause.
    pub fn play(&mut self) {
        if self.output.is_none() {
            log::debug!("play ignored: audio output not initialized");
            return;
        }
        let now = self.clock.now();
        for command in self.registry.play_all(now) {
            self.push(command);
        }
        if self.resume_metronome {
            self.resume_metronome = false;
            let bpm = self.metronome.bpm();
            self.metronome.start(bpm, now);
        }
    }

    /// Stop every playing track, capturing positions. Idempotent. An active
    /// metronome stops with the transport and resumes on the next `play`.
    pub fn pause(&mut self) {
        if self.output.is_none() {
            log::debug!("pause ignored: audio output not initialized");
            return;
        }
        let now = self.clock.now();
        for command in self.registry.pause_all(now) {
            self.push(command);
        }
        if self.metronome.is_active() {
            self.metronome.stop();
            self.resume_metronome = true;
        }
    }

    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<(), PlayerError> {
        let command = self.registry.set_volume(id, volume)?;
        self.push(command);
        Ok(())
    }

    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> Result<(), PlayerError> {
        let command = self.registry.set_pan(id, pan)?;
        self.push(command);
        Ok(())
    }

    /// Toggle mute; returns the new state. Local: only this track's
    /// effective gain changes.
    pub fn toggle_mute(&mut self, id: TrackId) -> Result<bool, PlayerError> {
        let (muted, command) = self.registry.toggle_mute(id)?;
        self.push(command);
        Ok(muted)
    }

    /// Toggle solo; returns the new state. Global: every track's effective
    /// gain is recomputed and re-pushed.
    pub fn toggle_solo(&mut self, id: TrackId) -> Result<bool, PlayerError> {
        let (soloed, commands) = self.registry.toggle_solo(id)?;
        for command in commands {
            self.push(command);
        }
        Ok(soloed)
    }

    /// Start the metronome, restarting from now if it already runs. No-op
    /// until the output is activated.
    pub fn start_metronome(&mut self, bpm: f64) {
        if self.output.is_none() {
            log::debug!("metronome start ignored: audio output not initialized");
            return;
        }
        self.resume_metronome = false;
        let now = self.clock.now();
        self.metronome.start(bpm, now);
    }

    pub fn stop_metronome(&mut self) {
        self.metronome.stop();
        self.resume_metronome = false;
    }

    /// Tempo change; a restart from now when running, never a ramp.
    pub fn update_metronome_bpm(&mut self, bpm: f64) {
        let now = self.clock.now();
        self.metronome.update_bpm(bpm, now);
    }

    pub fn set_metronome_volume(&mut self, volume: f32) {
        self.metronome.set_volume(volume);
        self.push(Command::SetClickGain {
            gain: self.metronome.volume(),
        });
    }

    /// The cooperative pump: drain clock observations, commit metronome
    /// clicks inside the look-ahead window, and let the collector reclaim
    /// retired track snapshots.
    pub fn tick(&mut self) {
        let Some(output) = &mut self.output else {
            return;
        };
        while let Ok(status) = output.status.pop() {
            match status {
                Status::Clock(secs) => self.clock.observe(secs),
            }
        }
        let now = self.clock.now();
        for at in self.metronome.tick(now) {
            if output.commands.push(Command::Click { at }).is_err() {
                log::warn!("command ring full, dropping click at {at:.3}");
            }
        }
        output.collector.collect();
    }

    // --- pull-based state queries ---

    pub fn tracks(&self) -> &[Track] {
        self.registry.tracks()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.registry.get(id)
    }

    pub fn is_playing(&self, id: TrackId) -> Result<bool, PlayerError> {
        self.registry
            .get(id)
            .map(|t| t.playing)
            .ok_or(PlayerError::UnknownTrack(id))
    }

    pub fn position(&self, id: TrackId) -> Result<f64, PlayerError> {
        self.registry.position(id, self.clock.now())
    }

    pub fn effective_gain(&self, id: TrackId) -> Result<f32, PlayerError> {
        self.registry.effective_gain(id)
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    /// Flat id -> attributes mapping for an external store.
    pub fn attributes(&self) -> std::collections::BTreeMap<u64, TrackAttributes> {
        self.registry.attributes()
    }

    fn publish_tracks(&mut self) {
        let Some(output) = &mut self.output else {
            return;
        };
        let snapshot = Shared::new(&output.handle, self.registry.snapshot_audio());
        if output.tracks.push(snapshot).is_err() {
            log::warn!("track snapshot ring full, snapshot dropped");
        }
    }

    fn push(&mut self, command: Command) {
        let Some(output) = &mut self.output else {
            return;
        };
        if output.commands.push(command).is_err() {
            log::warn!("command ring full, dropping {command:?}");
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}
