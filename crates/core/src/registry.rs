//! The track registry and its transport state machine, kept free of any
//! audio-device dependency so every transition is testable with a synthetic
//! clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stemset_transport::{Command, DecodedAudio, Track, TrackAudio, TrackId};

use crate::PlayerError;

/// Owned, arena-style collection of tracks keyed by a stable, monotonically
/// assigned integer id. Mutation is always by id lookup; no component holds a
/// reference into the registry.
///
/// Transport mutations return the [`Command`]s the audio callback needs to
/// mirror the change. The caller (the `Player`) forwards them when an output
/// exists and drops them otherwise.
#[derive(Debug)]
pub struct TrackRegistry {
    tracks: Vec<Track>,
    next_id: u64,
}

/// Per-track user attributes as a serializable flat record, for an external
/// store. The registry itself persists nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAttributes {
    pub name: String,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a decoded stem and assign it the next id.
    pub fn insert(&mut self, name: String, audio: DecodedAudio) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(Track::new(id, name, audio));
        id
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: TrackId) -> Result<&mut Track, PlayerError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(PlayerError::UnknownTrack(id))
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.soloed)
    }

    /// The final audible gain of a track under the current mute/solo policy.
    pub fn effective_gain(&self, id: TrackId) -> Result<f32, PlayerError> {
        let any_solo = self.any_solo();
        self.get(id)
            .map(|t| t.effective_gain(any_solo))
            .ok_or(PlayerError::UnknownTrack(id))
    }

    /// Playback offset in seconds: live while playing, stored while stopped.
    pub fn position(&self, id: TrackId, now: f64) -> Result<f64, PlayerError> {
        let track = self.get(id).ok_or(PlayerError::UnknownTrack(id))?;
        Ok(match track.started_at {
            Some(started_at) if track.playing => (now - started_at).max(0.0),
            _ => track.position,
        })
    }

    /// Start every track that is not already in motion, all anchored to the
    /// same `now` so tracks started by one call are phase-aligned with each
    /// other and with anything already playing. Muted tracks start too -
    /// mute is a gain override, not a transport override, so unmuting later
    /// needs no resync.
    pub fn play_all(&mut self, now: f64) -> Vec<Command> {
        let mut commands = Vec::new();
        for track in &mut self.tracks {
            if track.playing {
                continue;
            }
            track.started_at = Some(now - track.position);
            track.playing = true;
            commands.push(Command::StartTrack {
                id: track.id,
                offset: track.position,
            });
        }
        commands
    }

    /// Stop every playing track, capturing its position relative to the
    /// shared clock anchor. Idempotent: a second call finds nothing playing.
    pub fn pause_all(&mut self, now: f64) -> Vec<Command> {
        let mut commands = Vec::new();
        for track in &mut self.tracks {
            if !track.playing {
                continue;
            }
            if let Some(started_at) = track.started_at {
                track.position = (now - started_at).max(0.0);
            }
            track.started_at = None;
            track.playing = false;
            commands.push(Command::StopTrack { id: track.id });
        }
        commands
    }

    /// Clamp and store a user volume, returning the gain update for the
    /// callback (volume feeds through the mute/solo policy).
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<Command, PlayerError> {
        let track = self.get_mut(id)?;
        track.volume = volume.clamp(0.0, 1.0);
        Ok(Command::SetGain {
            id,
            gain: self.effective_gain(id)?,
        })
    }

    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> Result<Command, PlayerError> {
        let track = self.get_mut(id)?;
        track.pan = pan.clamp(-1.0, 1.0);
        Ok(Command::SetPan { id, pan: track.pan })
    }

    /// Toggle mute. Mute is local: only this track's effective gain changes.
    /// Returns the new mute state and the gain update.
    pub fn toggle_mute(&mut self, id: TrackId) -> Result<(bool, Command), PlayerError> {
        let track = self.get_mut(id)?;
        track.muted = !track.muted;
        let muted = track.muted;
        Ok((
            muted,
            Command::SetGain {
                id,
                gain: self.effective_gain(id)?,
            },
        ))
    }

    /// Toggle solo. Solo is a global policy: every track's effective gain is
    /// recomputed. Returns the new solo state and one gain update per track.
    pub fn toggle_solo(&mut self, id: TrackId) -> Result<(bool, Vec<Command>), PlayerError> {
        let track = self.get_mut(id)?;
        track.soloed = !track.soloed;
        let soloed = track.soloed;

        let any_solo = self.any_solo();
        let commands = self
            .tracks
            .iter()
            .map(|t| Command::SetGain {
                id: t.id,
                gain: t.effective_gain(any_solo),
            })
            .collect();
        Ok((soloed, commands))
    }

    /// One gain and one pan update per track, used to (re)prime a freshly
    /// started audio callback.
    pub fn all_params(&self) -> Vec<Command> {
        let any_solo = self.any_solo();
        let mut commands = Vec::with_capacity(self.tracks.len() * 2);
        for track in &self.tracks {
            commands.push(Command::SetGain {
                id: track.id,
                gain: track.effective_gain(any_solo),
            });
            commands.push(Command::SetPan {
                id: track.id,
                pan: track.pan,
            });
        }
        commands
    }

    /// The immutable audio snapshot handed to the callback.
    pub fn snapshot_audio(&self) -> Vec<TrackAudio> {
        self.tracks
            .iter()
            .map(|t| TrackAudio {
                id: t.id,
                audio: t.audio.clone(),
            })
            .collect()
    }

    /// Resample every stem to the output rate. Called once when the output
    /// comes up; stems loaded afterwards are resampled on insert.
    pub fn resample_all(&mut self, sample_rate: u32) -> anyhow::Result<()> {
        for track in &mut self.tracks {
            track.audio = track.audio.resample(sample_rate)?;
        }
        Ok(())
    }

    /// Flat id -> attributes mapping for external persistence.
    pub fn attributes(&self) -> BTreeMap<u64, TrackAttributes> {
        self.tracks
            .iter()
            .map(|t| {
                (
                    t.id.0,
                    TrackAttributes {
                        name: t.name.clone(),
                        volume: t.volume,
                        pan: t.pan,
                        muted: t.muted,
                        soloed: t.soloed,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_stem(secs: f64) -> DecodedAudio {
        DecodedAudio::new(vec![0.0; (44100.0 * secs) as usize], 44100, 1)
    }

    fn registry_with(names: &[&str]) -> (TrackRegistry, Vec<TrackId>) {
        let mut registry = TrackRegistry::new();
        let ids = names
            .iter()
            .map(|n| registry.insert(n.to_string(), silent_stem(10.0)))
            .collect();
        (registry, ids)
    }

    #[test]
    fn ids_are_monotonic_and_stable() {
        let (registry, ids) = registry_with(&["a", "b", "c"]);
        assert_eq!(ids, vec![TrackId(1), TrackId(2), TrackId(3)]);
        assert_eq!(registry.get(TrackId(2)).unwrap().name, "b");
    }

    #[test]
    fn unknown_id_is_reported_not_fatal() {
        let (mut registry, _) = registry_with(&["a"]);
        assert!(matches!(
            registry.toggle_mute(TrackId(99)),
            Err(PlayerError::UnknownTrack(TrackId(99)))
        ));
        // The registry still works afterwards
        assert!(registry.toggle_mute(TrackId(1)).is_ok());
    }

    #[test]
    fn play_then_pause_captures_elapsed_position() {
        let (mut registry, ids) = registry_with(&["a", "b"]);
        registry.play_all(10.0);
        assert!(registry.tracks().iter().all(|t| t.playing));

        registry.pause_all(12.5);
        for &id in &ids {
            let position = registry.position(id, 12.5).unwrap();
            assert!((position - 2.5).abs() < 1e-9, "got {position}");
        }
    }

    #[test]
    fn pause_is_idempotent() {
        let (mut registry, ids) = registry_with(&["a"]);
        registry.play_all(0.0);
        registry.pause_all(3.0);
        let first = registry.position(ids[0], 3.0).unwrap();

        let commands = registry.pause_all(7.0);
        assert!(commands.is_empty(), "nothing left to stop");
        assert_eq!(registry.position(ids[0], 7.0).unwrap(), first);
    }

    #[test]
    fn resume_preserves_alignment_across_tracks() {
        let (mut registry, ids) = registry_with(&["a", "b"]);
        registry.play_all(0.0);
        registry.pause_all(2.0);
        // Resume; both tracks anchor to the same clock again
        let commands = registry.play_all(5.0);
        assert_eq!(commands.len(), 2);
        for &id in &ids {
            assert!((registry.position(id, 6.0).unwrap() - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn reentrant_play_does_not_restart_running_tracks() {
        let (mut registry, _) = registry_with(&["a", "b"]);
        registry.play_all(0.0);
        let commands = registry.play_all(4.0);
        assert!(commands.is_empty(), "tracks already in motion stay put");
    }

    #[test]
    fn muted_track_still_plays_silently() {
        let (mut registry, ids) = registry_with(&["a", "b"]);
        let (muted, _) = registry.toggle_mute(ids[0]).unwrap();
        assert!(muted);

        let commands = registry.play_all(0.0);
        assert_eq!(commands.len(), 2, "muted tracks start too");
        assert!(registry.get(ids[0]).unwrap().playing);
        assert_eq!(registry.effective_gain(ids[0]).unwrap(), 0.0);
    }

    #[test]
    fn mute_during_playback_keeps_transport_state() {
        let (mut registry, ids) = registry_with(&["a", "b"]);
        registry.play_all(0.0);

        let (_, command) = registry.toggle_mute(ids[0]).unwrap();
        assert!(matches!(command, Command::SetGain { gain, .. } if gain == 0.0));
        assert_eq!(registry.effective_gain(ids[1]).unwrap(), 1.0);
        assert!(registry.tracks().iter().all(|t| t.playing));

        registry.pause_all(1.5);
        let a = registry.position(ids[0], 1.5).unwrap();
        let b = registry.position(ids[1], 1.5).unwrap();
        assert!(a >= 0.0 && b >= 0.0);
        assert!((a - b).abs() < 1e-9);
        assert!((a - 1.5).abs() < 1e-9);
    }

    #[test]
    fn solo_silences_everyone_else() {
        let (mut registry, ids) = registry_with(&["a", "b", "c"]);
        registry.set_volume(ids[1], 0.7).unwrap();

        let (soloed, commands) = registry.toggle_solo(ids[0]).unwrap();
        assert!(soloed);
        assert_eq!(commands.len(), 3, "solo recompute is global");
        assert_eq!(registry.effective_gain(ids[0]).unwrap(), 1.0);
        assert_eq!(registry.effective_gain(ids[1]).unwrap(), 0.0);
        assert_eq!(registry.effective_gain(ids[2]).unwrap(), 0.0);
    }

    #[test]
    fn solo_round_trip_restores_gains() {
        let (mut registry, ids) = registry_with(&["a", "b"]);
        registry.set_volume(ids[1], 0.6).unwrap();
        registry.toggle_mute(ids[1]).unwrap();

        let before: Vec<f32> = ids
            .iter()
            .map(|&id| registry.effective_gain(id).unwrap())
            .collect();

        registry.toggle_solo(ids[0]).unwrap();
        let (soloed, _) = registry.toggle_solo(ids[0]).unwrap();
        assert!(!soloed);

        let after: Vec<f32> = ids
            .iter()
            .map(|&id| registry.effective_gain(id).unwrap())
            .collect();
        assert_eq!(before, after);
        // The independently muted track stays muted
        assert_eq!(after[1], 0.0);
        assert_eq!(after[0], 1.0);
    }

    #[test]
    fn volume_and_pan_clamp_instead_of_failing() {
        let (mut registry, ids) = registry_with(&["a"]);
        registry.set_volume(ids[0], 1.7).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().volume, 1.0);
        registry.set_volume(ids[0], -0.3).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().volume, 0.0);

        registry.set_pan(ids[0], 2.0).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().pan, 1.0);
        registry.set_pan(ids[0], -2.0).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().pan, -1.0);
    }

    #[test]
    fn attributes_round_trip_through_serde() {
        let (mut registry, ids) = registry_with(&["drums", "bass"]);
        registry.set_volume(ids[1], 0.4).unwrap();
        registry.toggle_solo(ids[1]).unwrap();

        let attributes = registry.attributes();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[&1].name, "drums");
        assert!(attributes[&2].soloed);
        assert_eq!(attributes[&2].volume, 0.4);
    }
}
