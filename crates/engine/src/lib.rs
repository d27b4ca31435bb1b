use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use stemset_transport::{Command, Status, TrackAudio};

pub mod mixer;

pub use mixer::Mixer;

pub type SharedTracks = Shared<Vec<TrackAudio>>;

/// Control-side handle to the running output stream.
///
/// All interaction with the audio callback goes through the lock-free rings:
/// discrete graph mutations through `commands`, whole track-list snapshots
/// through `tracks`, and clock observations back through `status`. Dropped
/// snapshots are reclaimed by the basedrop collector so the callback never
/// frees memory.
pub struct EngineHandle {
    pub commands: rtrb::Producer<Command>,
    pub status: rtrb::Consumer<Status>,
    pub tracks: rtrb::Producer<SharedTracks>,
    pub collector: Collector,
    pub handle: Handle,
    pub sample_rate: u32,
    pub channels: u16,
    _stream: cpal::Stream,
}

/// Open the default output device and start rendering.
///
/// Fails if there is no output device or its format is unsupported; the
/// caller treats that as "output not yet available" and retries on the next
/// activation, it is not fatal to the rest of the player.
pub fn start(tracks: Vec<TrackAudio>) -> anyhow::Result<EngineHandle> {
    let collector = Collector::new();
    let handle = collector.handle();

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(256);
    let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(64);
    let (tracks_tx, tracks_rx) = rtrb::RingBuffer::<SharedTracks>::new(4);

    let initial_tracks = Shared::new(&handle, tracks);

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(
            &device,
            &config.into(),
            initial_tracks,
            command_rx,
            tracks_rx,
            status_tx,
        )?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;

    Ok(EngineHandle {
        commands: command_tx,
        status: status_rx,
        tracks: tracks_tx,
        collector,
        handle,
        sample_rate,
        channels,
        _stream: stream,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    initial_tracks: SharedTracks,
    mut command_rx: rtrb::Consumer<Command>,
    mut tracks_rx: rtrb::Consumer<SharedTracks>,
    mut status_tx: rtrb::Producer<Status>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let mut mixer = Mixer::new(sample_rate, output_channels);
    mixer.sync_tracks(&initial_tracks);

    let mut current_tracks = initial_tracks;
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Swap in new track snapshots if available (lock-free)
            while let Ok(new_tracks) = tracks_rx.pop() {
                current_tracks = new_tracks;
                mixer.sync_tracks(&current_tracks);
            }

            while let Ok(cmd) = command_rx.pop() {
                mixer.apply(cmd);
            }

            scratch.resize(data.len(), 0.0);
            mixer.render(&mut scratch);
            for (sample, &value) in data.iter_mut().zip(scratch.iter()) {
                *sample = T::from_sample(value);
            }

            let _ = status_tx.push(Status::Clock(mixer.clock_secs()));
        },
        |err| log::error!("audio stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
