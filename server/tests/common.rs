//! Common utilities for integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    body::Body,
    http::{header, Request},
    Router,
};
use server::config::ServerConfig;
use server::{app, AppState};
use tempfile::TempDir;
use tts_core::{
    AudioSegment, SegmentStream, SynthesisError, SynthesisErrorKind, SynthesisJob, Synthesizer,
};

pub const BOUNDARY: &str = "tts-test-boundary";

/// Shared counters a test inspects after driving a [`ScriptedSynthesizer`].
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    pub runs: Arc<AtomicUsize>,
    pub produced: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicUsize>,
}

impl RunTracker {
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

/// Tracks one run; a run dropped before it finished counts as cancelled.
struct RunGuard {
    tracker: RunTracker,
    finished: bool,
}

impl RunGuard {
    fn enter(tracker: RunTracker) -> Self {
        tracker.runs.fetch_add(1, Ordering::SeqCst);
        let active = tracker.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracker.max_active.fetch_max(active, Ordering::SeqCst);
        Self {
            tracker,
            finished: false,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.tracker.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Engine that yields canned segments on a schedule.
#[derive(Debug, Clone)]
pub struct ScriptedSynthesizer {
    segments: Vec<Vec<u8>>,
    first_delay: Duration,
    delay: Duration,
    fail_at: Option<(usize, SynthesisErrorKind)>,
    pub tracker: RunTracker,
}

impl ScriptedSynthesizer {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            segments: segments.into_iter().map(|s| s.as_ref().to_vec()).collect(),
            first_delay: Duration::ZERO,
            delay: Duration::ZERO,
            fail_at: None,
            tracker: RunTracker::default(),
        }
    }

    /// Wait this long before every segment after the first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    /// Yield an error instead of segment `index`.
    pub fn failing_at(mut self, index: usize, kind: SynthesisErrorKind) -> Self {
        self.fail_at = Some((index, kind));
        self
    }
}

impl Synthesizer for ScriptedSynthesizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    /// Same acceptance rule as the tone engine: a decodable WAV.
    fn check_voice_sample(&self, path: &Path) -> Result<(), SynthesisError> {
        tts_core::inspect_voice_sample(path).map(|_| ())
    }

    fn synthesize(&self, _job: SynthesisJob) -> SegmentStream {
        let script = self.clone();
        Box::pin(stream! {
            let mut guard = RunGuard::enter(script.tracker.clone());
            for (index, bytes) in script.segments.into_iter().enumerate() {
                let wait = if index == 0 { script.first_delay } else { script.delay };
                tokio::time::sleep(wait).await;

                if let Some((at, kind)) = script.fail_at {
                    if at == index {
                        yield Err(SynthesisError::new(kind, format!("scripted failure at segment {index}")));
                        break;
                    }
                }

                script.tracker.produced.fetch_add(1, Ordering::SeqCst);
                yield Ok(AudioSegment::buffer(index, bytes));
            }
            guard.finished = true;
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    scratch_root: TempDir,
}

impl TestApp {
    pub fn scratch_root(&self) -> &Path {
        self.scratch_root.path()
    }

    /// Number of scratch areas currently on disk.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch_root.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Create a test app instance around `synthesizer`.
pub fn create_test_app(
    synthesizer: Arc<dyn Synthesizer>,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestApp {
    let scratch_root = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        scratch_dir: scratch_root.path().to_path_buf(),
        admission_timeout_ms: 5_000,
        segment_timeout_secs: 5,
        ..ServerConfig::default()
    };
    configure(&mut config);

    let state = AppState::new(config.normalized(), synthesizer);
    TestApp {
        router: app(state.clone()),
        state,
        scratch_root,
    }
}

/// A valid 16-bit mono WAV of `millis` milliseconds.
pub fn voice_wav(millis: u32, sample_rate: u32) -> Vec<u8> {
    let frames = (sample_rate as u64 * millis as u64 / 1000) as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin() * 0.2)
        .collect();
    tts_core::encode_wav(&samples, sample_rate).unwrap()
}

/// Builds `multipart/form-data` requests for `/tts`.
#[derive(Default)]
pub struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn voice(self, bytes: &[u8]) -> Self {
        self.file("voice_file", "voice.wav", "audio/wav", bytes)
    }

    pub fn build(self) -> Request<Body> {
        self.build_for("/tts")
    }

    pub fn build_for(self, uri: &str) -> Request<Body> {
        let body = self.finish();
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type())
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    /// The encoded body, closing boundary included.
    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

pub fn content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// The usual request: `text` plus a short valid voice sample.
pub fn tts_request(text: &str) -> Request<Body> {
    MultipartBuilder::new()
        .text("text", text)
        .voice(&voice_wav(500, 16_000))
        .build()
}

/// Poll `condition` for up to two seconds.
pub async fn wait_for(condition: impl FnMut() -> bool) -> bool {
    wait_within(Duration::from_secs(2), condition).await
}

/// Poll `condition` every 10 ms until `limit` has passed.
pub async fn wait_within(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
