//! WAV helpers: probing uploaded reference voices and encoding rendered audio.
use std::io::Cursor;
use std::path::Path;

use serde::Serialize;

use crate::error::SynthesisError;

/// Header facts about a reference voice sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceSampleInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub duration_ms: u64,
}

/// Read and fully decode a WAV reference sample.
///
/// Decoding every sample catches truncated uploads whose header promises more
/// data than the file holds. Blocking; call from `spawn_blocking`.
pub fn inspect_voice_sample(path: &Path) -> Result<VoiceSampleInfo, SynthesisError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| SynthesisError::invalid_voice_sample(format!("unreadable WAV: {e}")))?;
    let spec = reader.spec();

    let frames = reader.duration();
    if frames == 0 || spec.sample_rate == 0 {
        return Err(SynthesisError::invalid_voice_sample(
            "voice sample contains no audio",
        ));
    }

    let decoded = match spec.sample_format {
        hound::SampleFormat::Int => reader.samples::<i32>().try_fold(0usize, |n, s| s.map(|_| n + 1)),
        hound::SampleFormat::Float => reader.samples::<f32>().try_fold(0usize, |n, s| s.map(|_| n + 1)),
    }
    .map_err(|e| SynthesisError::invalid_voice_sample(format!("corrupt WAV data: {e}")))?;

    let expected = frames as usize * spec.channels as usize;
    if decoded < expected {
        return Err(SynthesisError::invalid_voice_sample(format!(
            "truncated WAV data ({decoded} of {expected} samples)"
        )));
    }

    Ok(VoiceSampleInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        duration_ms: frames as u64 * 1000 / spec.sample_rate as u64,
    })
}

/// Encode mono f32 samples in [-1.0, 1.0] as a complete 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // 44 byte header + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}
