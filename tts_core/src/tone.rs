//! Model-free engine for development and tests.
//!
//! Each phrase of the input becomes one WAV segment: a short tone whose length
//! follows the phrase length, followed by the pause the phrase's punctuation
//! calls for. Output uses the reference voice's sample rate so clients see the
//! same format a cloning engine would return.
use std::f32::consts::PI;
use std::path::Path;

use async_stream::stream;
use tracing::debug;

use crate::error::SynthesisError;
use crate::segment::AudioSegment;
use crate::text::{pause_after_ms, split_phrases};
use crate::wav::{encode_wav, inspect_voice_sample};
use crate::{SegmentStream, SynthesisJob, Synthesizer};

const MIN_SAMPLE_RATE: u32 = 8_000;
const MAX_SAMPLE_RATE: u32 = 48_000;
const MS_PER_CHAR: u32 = 45;
const MIN_TONE_MS: u32 = 120;
const FADE_MS: u32 = 10;

#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    base_frequency: f32,
    amplitude: f32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            base_frequency: 220.0,
            amplitude: 0.3,
        }
    }
}

impl ToneSynthesizer {
    pub fn new(base_frequency: f32, amplitude: f32) -> Self {
        Self {
            base_frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    fn render_phrase(&self, phrase: &str, index: usize, sample_rate: u32) -> Vec<f32> {
        let speakable = phrase.chars().filter(|c| !c.is_whitespace()).count() as u32;
        let tone_ms = (speakable * MS_PER_CHAR).max(MIN_TONE_MS);
        let tone_len = (tone_ms as u64 * sample_rate as u64 / 1000) as usize;
        let pause_len = (pause_after_ms(phrase) as u64 * sample_rate as u64 / 1000) as usize;
        let fade_len = ((FADE_MS as u64 * sample_rate as u64 / 1000) as usize).min(tone_len / 2);

        // small pitch step per phrase so segment boundaries are audible
        let frequency = self.base_frequency * (1.0 + (index % 4) as f32 * 0.125);
        let step = 2.0 * PI * frequency / sample_rate as f32;

        let mut samples = Vec::with_capacity(tone_len + pause_len);
        for n in 0..tone_len {
            let envelope = if n < fade_len {
                n as f32 / fade_len as f32
            } else if n >= tone_len - fade_len {
                (tone_len - n) as f32 / fade_len as f32
            } else {
                1.0
            };
            samples.push((n as f32 * step).sin() * self.amplitude * envelope);
        }
        samples.resize(tone_len + pause_len, 0.0);
        samples
    }
}

impl Synthesizer for ToneSynthesizer {
    fn name(&self) -> &'static str {
        "tone"
    }

    /// Only WAV references are usable; the output follows their sample rate.
    fn check_voice_sample(&self, path: &Path) -> Result<(), SynthesisError> {
        let info = inspect_voice_sample(path)?;
        debug!(
            sample_rate = info.sample_rate,
            channels = info.channels,
            duration_ms = info.duration_ms,
            "voice sample accepted"
        );
        Ok(())
    }

    fn synthesize(&self, job: SynthesisJob) -> SegmentStream {
        let engine = self.clone();

        Box::pin(stream! {
            let voice_path = job.voice_sample.clone();
            let info = match tokio::task::spawn_blocking(move || inspect_voice_sample(&voice_path)).await {
                Ok(Ok(info)) => info,
                Ok(Err(e)) => {
                    yield Err(e);
                    return;
                }
                Err(e) => {
                    yield Err(SynthesisError::inference(format!("voice inspection task failed: {e}")));
                    return;
                }
            };
            let sample_rate = info.sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);

            let phrases = split_phrases(&job.text);
            if phrases.is_empty() {
                yield Err(SynthesisError::invalid_text("text contains nothing to speak"));
                return;
            }

            for (index, phrase) in phrases.iter().enumerate() {
                let samples = engine.render_phrase(phrase, index, sample_rate);
                match encode_wav(&samples, sample_rate) {
                    Ok(bytes) => {
                        debug!(segment = index, bytes = bytes.len(), "tone segment rendered");
                        yield Ok(AudioSegment::buffer(index, bytes));
                    }
                    Err(e) => {
                        yield Err(SynthesisError::inference(format!("encoding failed: {e}")));
                        return;
                    }
                }
            }
        })
    }
}
