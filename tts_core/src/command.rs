//! Drives an external voice-cloning program as the synthesis engine.
//!
//! The program receives its inputs through argument placeholders (`{text}`,
//! `{voice}`, `{out_dir}`, `{model_dir}`) and the environment variables
//! `TTS_TEXT`, `TTS_VOICE`, `TTS_OUT_DIR` and `TTS_MODEL_DIR`. It writes each
//! finished segment file into the out dir and prints the file's path, absolute
//! or relative to the out dir, as one line on stdout. Segments are handed out
//! as their lines arrive.
//!
//! Exit status 0 ends the stream normally. Non-zero statuses map to error
//! kinds: 2 invalid text, 3 invalid voice sample, 75 (`EX_TEMPFAIL`) resource
//! exhausted, anything else inference failure. The child is killed when the
//! stream is dropped.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_stream::stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{SynthesisError, SynthesisErrorKind};
use crate::segment::AudioSegment;
use crate::{SegmentStream, SynthesisJob, Synthesizer};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub program: PathBuf,
    /// Argument template; placeholders are substituted per job.
    pub args: Vec<String>,
    /// Model location handed to the program.
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    config: CommandConfig,
}

impl CommandSynthesizer {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    fn spawn(&self, job: &SynthesisJob) -> Result<Child, SynthesisError> {
        let voice = job.voice_sample.to_string_lossy();
        let out_dir = job.work_dir.to_string_lossy();
        let model_dir = self.config.model_dir.to_string_lossy();

        let args = self.config.args.iter().map(|arg| {
            arg.replace("{text}", &job.text)
                .replace("{voice}", &voice)
                .replace("{out_dir}", &out_dir)
                .replace("{model_dir}", &model_dir)
        });

        Command::new(&self.config.program)
            .args(args)
            .env("TTS_TEXT", &job.text)
            .env("TTS_VOICE", &job.voice_sample)
            .env("TTS_OUT_DIR", &job.work_dir)
            .env("TTS_MODEL_DIR", &self.config.model_dir)
            .current_dir(&job.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SynthesisError::inference(format!(
                    "failed to launch {}: {e}",
                    self.config.program.display()
                ))
            })
    }
}

impl Synthesizer for CommandSynthesizer {
    fn name(&self) -> &'static str {
        "command"
    }

    fn synthesize(&self, job: SynthesisJob) -> SegmentStream {
        let engine = self.clone();

        Box::pin(stream! {
            let mut child = match engine.spawn(&job) {
                Ok(child) => child,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let pid = child.id();
            debug!(?pid, "synthesizer process started");

            let stderr_tail = child.stderr.take().map(|stderr| {
                tokio::spawn(async move {
                    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Vec::from(tail).join("\n")
                })
            });

            let Some(stdout) = child.stdout.take() else {
                yield Err(SynthesisError::inference("synthesizer stdout unavailable"));
                return;
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut index = 0usize;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match resolve_segment_path(&job.work_dir, line).await {
                            Ok(path) => {
                                yield Ok(AudioSegment::file(index, path));
                                index += 1;
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(SynthesisError::inference(format!("reading synthesizer output: {e}")));
                        return;
                    }
                }
            }

            let status = child.wait().await;
            let tail = match stderr_tail {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            match status {
                Ok(status) if status.success() => {
                    debug!(?pid, segments = index, "synthesizer process finished");
                }
                Ok(status) => {
                    warn!(?pid, %status, "synthesizer process failed");
                    yield Err(exit_error(status, &tail));
                }
                Err(e) => {
                    yield Err(SynthesisError::inference(format!("waiting for synthesizer: {e}")));
                }
            }
        })
    }
}

/// Resolve a reported segment path and confine it to the work directory.
async fn resolve_segment_path(work_dir: &Path, reported: &str) -> Result<PathBuf, SynthesisError> {
    let candidate = Path::new(reported);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        work_dir.join(candidate)
    };

    let root = tokio::fs::canonicalize(work_dir)
        .await
        .map_err(|e| SynthesisError::inference(format!("work directory unavailable: {e}")))?;
    let resolved = tokio::fs::canonicalize(&candidate).await.map_err(|e| {
        SynthesisError::inference(format!("segment file {reported} not readable: {e}"))
    })?;

    if !resolved.starts_with(&root) {
        return Err(SynthesisError::inference(format!(
            "segment file {reported} lies outside the work directory"
        )));
    }
    if !resolved.is_file() {
        return Err(SynthesisError::inference(format!(
            "segment path {reported} is not a file"
        )));
    }
    Ok(resolved)
}

fn exit_error(status: ExitStatus, stderr_tail: &str) -> SynthesisError {
    let kind = match status.code() {
        Some(2) => SynthesisErrorKind::InvalidText,
        Some(3) => SynthesisErrorKind::InvalidVoiceSample,
        Some(75) => SynthesisErrorKind::ResourceExhausted,
        _ => SynthesisErrorKind::Inference,
    };
    let message = if stderr_tail.is_empty() {
        format!("synthesizer exited with {status}")
    } else {
        format!("synthesizer exited with {status}: {stderr_tail}")
    };
    SynthesisError::new(kind, message)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::segment::SegmentPayload;
    use futures_util::StreamExt;

    fn shell(script: &str) -> CommandSynthesizer {
        CommandSynthesizer::new(CommandConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            model_dir: PathBuf::from("models"),
        })
    }

    fn job(dir: &tempfile::TempDir) -> SynthesisJob {
        SynthesisJob {
            text: "Hello world".to_string(),
            voice_sample: dir.path().join("reference.wav"),
            work_dir: dir.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_segments_follow_stdout_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell(
            "printf one > \"$TTS_OUT_DIR/a.wav\"; echo a.wav; \
             printf two > \"$TTS_OUT_DIR/b.wav\"; echo \"$TTS_OUT_DIR/b.wav\"",
        );

        let segments: Vec<_> = engine.synthesize(job(&dir)).collect().await;
        assert_eq!(segments.len(), 2);

        let first = segments[0].as_ref().unwrap();
        let second = segments[1].as_ref().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        let SegmentPayload::File(path) = &second.payload else {
            panic!("expected file payload");
        };
        assert_eq!(std::fs::read(path).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_placeholders_are_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandSynthesizer::new(CommandConfig {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "printf '%s' \"$1\" > \"$2/out.wav\"; echo out.wav".to_string(),
                "synth".to_string(),
                "{text}".to_string(),
                "{out_dir}".to_string(),
            ],
            model_dir: PathBuf::from("models"),
        });

        let segments: Vec<_> = engine.synthesize(job(&dir)).collect().await;
        let SegmentPayload::File(path) = &segments[0].as_ref().unwrap().payload else {
            panic!("expected file payload");
        };
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn test_path_outside_work_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let engine = shell(&format!("echo {}", outside.path().display()));

        let mut stream = engine.synthesize(job(&dir));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.message().contains("outside"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exit_code_maps_to_kind() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell("echo 'cannot decode reference' >&2; exit 3");

        let mut stream = engine.synthesize(job(&dir));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), SynthesisErrorKind::InvalidVoiceSample);
        assert!(err.message().contains("cannot decode reference"));
    }

    #[tokio::test]
    async fn test_failure_after_segments_is_reported_last() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell("printf x > \"$TTS_OUT_DIR/a.wav\"; echo a.wav; exit 1");

        let segments: Vec<_> = engine.synthesize(job(&dir)).collect().await;
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_ok());
        assert_eq!(
            segments[1].as_ref().unwrap_err().kind(),
            SynthesisErrorKind::Inference
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandSynthesizer::new(CommandConfig {
            program: PathBuf::from("/nonexistent/synthesizer"),
            args: Vec::new(),
            model_dir: PathBuf::from("models"),
        });

        let mut stream = engine.synthesize(job(&dir));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.message().contains("failed to launch"));
    }
}
