//! Engine side of the voice-clone TTS server.
//!
//! A [`Synthesizer`] turns text plus a reference voice sample into a lazy,
//! ordered stream of [`AudioSegment`]s. Two engines ship with the crate:
//! [`CommandSynthesizer`] drives an external model process and
//! [`ToneSynthesizer`] renders placeholder audio in-process.
mod error;
mod segment;
mod text;
mod wav;

pub mod command;
pub mod tone;

use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures_core::Stream;

pub use command::{CommandConfig, CommandSynthesizer};
pub use error::{SynthesisError, SynthesisErrorKind};
pub use segment::{AudioSegment, SegmentPayload};
pub use text::{pause_after_ms, split_phrases};
pub use tone::ToneSynthesizer;
pub use wav::{encode_wav, inspect_voice_sample, VoiceSampleInfo};

/// Lazy sequence of segments produced by one synthesis run.
///
/// Nothing is computed until the stream is polled. Dropping it abandons the
/// run; engines that can cancel their backing computation do so on drop.
pub type SegmentStream = Pin<Box<dyn Stream<Item = Result<AudioSegment, SynthesisError>> + Send>>;

/// Inputs for one synthesis run.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub text: String,
    /// Staged reference voice sample.
    pub voice_sample: PathBuf,
    /// Request-exclusive directory the engine may write intermediate files into.
    pub work_dir: PathBuf,
}

/// A loaded synthesis engine, shared process-wide.
///
/// Callers serialize access themselves; implementations may assume they are
/// driven by at most as many concurrent runs as the server grants slots.
pub trait Synthesizer: Send + Sync {
    /// Short engine name for logs and metrics.
    fn name(&self) -> &'static str;

    /// MIME type of the concatenated segment bytes.
    fn content_type(&self) -> &'static str {
        "audio/wav"
    }

    /// Reject a staged voice sample this engine cannot use.
    ///
    /// Runs before the caller takes a synthesis slot and may block on file
    /// I/O. The default accepts anything and leaves decoding to the engine.
    fn check_voice_sample(&self, _path: &Path) -> Result<(), SynthesisError> {
        Ok(())
    }

    /// Start a fresh, independent run. The returned stream is not restartable.
    fn synthesize(&self, job: SynthesisJob) -> SegmentStream;

    /// Release engine resources at process shutdown.
    fn shutdown(&self) {}
}
