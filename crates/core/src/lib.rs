pub mod clock;
pub mod metronome;
pub mod player;
pub mod registry;

pub use clock::EngineClock;
pub use metronome::{LOOKAHEAD_SECS, Metronome};
pub use player::Player;
pub use registry::{TrackAttributes, TrackRegistry};

pub use stemset_decode::{decode_bytes, decode_file};
pub use stemset_transport::{Command, DecodedAudio, Status, Track, TrackAudio, TrackId};

/// Failures reported to the immediate caller. None of these propagate into
/// the audio callback or the metronome scheduler; the player keeps operating
/// on the remaining valid tracks.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// An operation referenced a track id that does not exist. Reported as a
    /// no-op failure, never fatal.
    #[error("unknown track id {0}")]
    UnknownTrack(TrackId),

    /// The supplied audio data could not be decoded (or prepared for the
    /// output rate). Terminal for that load; the caller re-supplies the data
    /// if it wants to retry.
    #[error("failed to decode audio: {0}")]
    Decode(#[source] anyhow::Error),
}
