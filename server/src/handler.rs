//! `POST /tts`: validate, stage, admit, synthesize and relay.
//!
//! The handler owns a request until its first audio segment exists. Anything
//! that fails before that point is answered with a status code. After that
//! the response is committed and a relay task owns the slot, the scratch area
//! and the rest of the segment stream until the body ends.
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use tts_core::{
    AudioSegment, SegmentPayload, SegmentStream, SynthesisError, SynthesisJob,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::gate::SynthesisSlot;
use crate::scratch::{ResourceError, ScratchArea};
use crate::stream::{StreamFailure, StreamOutcome, StreamSession, StreamWriter};
use crate::validation::{validate_synthesis_request, validate_text, SynthesisRequest, VoiceUpload};
use crate::{AppState, REQUEST_ID_HEADER};

pub async fn tts_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    match handle(&state, request_id, multipart).await {
        Ok(response) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            state.metrics.tts.record_request(latency_ms);
            info!(%request_id, latency_ms, "first segment ready, streaming");
            Ok(response)
        }
        Err(e) => {
            state.metrics.tts.record_error();
            Err(e)
        }
    }
}

async fn handle(
    state: &AppState,
    request_id: Uuid,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let request = read_request(multipart).await?;
    info!(
        %request_id,
        text_chars = request.text.chars().count(),
        voice_bytes = request.voice.bytes.len(),
        "synthesis request validated"
    );

    let scratch = state.scratch.acquire(request_id).await?;
    let (slot, segments, first) = match start_synthesis(state, &scratch, request).await {
        Ok(started) => started,
        Err(e) => {
            scratch.release().await;
            return Err(e);
        }
    };

    let (writer, body) = StreamWriter::channel(
        state.config.stream_chunk_bytes,
        state.config.stream_write_timeout(),
    );
    let session = writer.begin_stream(request_id);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, state.synthesizer.content_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::InternalError(format!("failed to build response: {e}")))?;

    state.metrics.streams.record_started();
    tokio::spawn(relay(
        state.clone(),
        writer,
        session,
        scratch,
        slot,
        segments,
        first,
    ));

    Ok(response)
}

/// Collect the `text` and `voice_file` fields. Unknown fields are skipped.
async fn read_request(mut multipart: Multipart) -> Result<SynthesisRequest, ApiError> {
    let mut text = None;
    let mut voice = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("text") => {
                let value = field.text().await.map_err(multipart_error)?;
                validate_text(&value)?;
                text = Some(value);
            }
            Some("voice_file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                voice = Some(VoiceUpload {
                    filename,
                    content_type,
                    bytes,
                });
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    validate_synthesis_request(text, voice)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ResourceError::Truncated(e.body_text()).into()
    }
}

/// Stage the voice sample, take a slot and wait for the first segment.
async fn start_synthesis(
    state: &AppState,
    scratch: &ScratchArea,
    request: SynthesisRequest,
) -> Result<(SynthesisSlot, SegmentStream, AudioSegment), ApiError> {
    let voice_path = scratch
        .persist(&request.voice.stored_filename(), &request.voice.bytes)
        .await?;

    // the engine decides which formats it can clone from
    let synthesizer = Arc::clone(&state.synthesizer);
    let sample_path = voice_path.clone();
    tokio::task::spawn_blocking(move || synthesizer.check_voice_sample(&sample_path))
        .await
        .map_err(|e| ApiError::InternalError(format!("voice inspection task failed: {e}")))??;
    debug!(request_id = %scratch.request_id(), "voice sample staged");

    let slot = state.gate.acquire().await?;
    let mut segments = state.synthesizer.synthesize(SynthesisJob {
        text: request.text,
        voice_sample: voice_path,
        work_dir: scratch.path().to_path_buf(),
    });

    match next_segment(&mut segments, state.config.segment_timeout()).await? {
        Some(first) => Ok((slot, segments, first)),
        None => Err(SynthesisError::inference("synthesizer produced no audio").into()),
    }
}

async fn next_segment(
    segments: &mut SegmentStream,
    timeout: Duration,
) -> Result<Option<AudioSegment>, SynthesisError> {
    match tokio::time::timeout(timeout, segments.next()).await {
        Ok(Some(Ok(segment))) => Ok(Some(segment)),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Ok(None),
        Err(_) => Err(SynthesisError::timeout(format!(
            "no segment within {} s",
            timeout.as_secs_f32()
        ))),
    }
}

async fn relay(
    state: AppState,
    writer: StreamWriter,
    mut session: StreamSession,
    scratch: ScratchArea,
    slot: SynthesisSlot,
    mut segments: SegmentStream,
    first: AudioSegment,
) {
    let timeout = state.config.segment_timeout();
    let outcome = pump(&writer, &mut session, &mut segments, first, timeout).await;

    // stop the engine before giving the slot back
    drop(segments);
    drop(slot);

    state.metrics.streams.record_finished(&session, &outcome);
    writer.end_stream(session, outcome).await;
    scratch.release().await;
}

async fn pump(
    writer: &StreamWriter,
    session: &mut StreamSession,
    segments: &mut SegmentStream,
    first: AudioSegment,
    timeout: Duration,
) -> StreamOutcome {
    let mut current = first;
    loop {
        let written = writer.write_segment(session, &current).await;
        discard(session.request_id(), &current).await;
        if let Err(failure) = written {
            return StreamOutcome::Failed(failure);
        }

        let next = tokio::select! {
            biased;
            _ = writer.closed() => {
                return StreamOutcome::Failed(StreamFailure::Transport(
                    "client disconnected while waiting for the next segment".to_string(),
                ));
            }
            next = next_segment(segments, timeout) => next,
        };

        match next {
            Ok(Some(segment)) => current = segment,
            Ok(None) => return StreamOutcome::Completed,
            Err(e) => return StreamOutcome::Failed(e.into()),
        }
    }
}

/// Remove a relayed file segment so long runs don't accumulate on disk.
async fn discard(request_id: Uuid, segment: &AudioSegment) {
    if let SegmentPayload::File(path) = &segment.payload {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(%request_id, segment = segment.index, "failed to remove relayed segment: {e}");
        }
    }
}
