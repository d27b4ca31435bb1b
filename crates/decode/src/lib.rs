use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use stemset_transport::DecodedAudio;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode an in-memory audio file (wav, flac, mp3, ...) into PCM.
///
/// This is the entry point matching the engine's inbound interface: the
/// caller hands over the raw file bytes it obtained however it likes, and a
/// failed decode is terminal for those bytes - the caller decides whether to
/// re-supply them.
pub fn decode_bytes(bytes: Vec<u8>) -> anyhow::Result<DecodedAudio> {
    decode_source(Box::new(Cursor::new(bytes)), Hint::new())
}

/// Decode an audio file from disk, using the file extension as a format hint.
pub fn decode_file(path: &Path) -> anyhow::Result<DecodedAudio> {
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_source(Box::new(file), hint)
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> anyhow::Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        anyhow::bail!("decoded no audio samples");
    }

    Ok(DecodedAudio::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, frames: usize, sample_rate: u32, channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decode_wav_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 4410, 44100, 2);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.sample_rate(), 44100);
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), 4410);
    }

    #[test]
    fn decode_wav_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 2205, 48000, 1);

        let bytes = std::fs::read(&path).unwrap();
        let audio = decode_bytes(bytes).unwrap();
        assert_eq!(audio.sample_rate(), 48000);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.frames(), 2205);
    }

    #[test]
    fn decode_garbage_fails() {
        let result = decode_bytes(vec![0u8; 64]);
        assert!(result.is_err(), "corrupt data must not decode");
    }

    #[test]
    fn decode_missing_file_fails() {
        let result = decode_file(Path::new("does/not/exist.wav"));
        assert!(result.is_err());
    }
}
