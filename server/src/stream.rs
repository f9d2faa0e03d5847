//! Relays audio segments into a chunked HTTP response body.
//!
//! Chunks travel through a channel of capacity 1 into the response body, so
//! a slow client suspends the writer instead of piling up audio in memory.
//! A client that stops reading altogether fails the write after the write
//! deadline, so it cannot pin the synthesis slot.
//! A failed stream ends with an error item, which makes the HTTP layer abort
//! the response instead of terminating it cleanly.
use std::io;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tts_core::{AudioSegment, SegmentPayload, SynthesisError};
use uuid::Uuid;

pub type BodyChunk = Result<Bytes, io::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Streaming,
    Completed,
    Failed,
}

/// Why a stream ended early.
#[derive(Debug, Error)]
pub enum StreamFailure {
    #[error("synthesis failed mid-stream: {0}")]
    Synthesis(#[from] SynthesisError),

    /// The client went away (TransportError).
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug)]
pub enum StreamOutcome {
    Completed,
    Failed(StreamFailure),
}

/// Live state of one response.
#[derive(Debug)]
pub struct StreamSession {
    request_id: Uuid,
    segments_written: usize,
    bytes_written: u64,
    state: SessionState,
    started: Instant,
}

impl StreamSession {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Index of the next segment this session accepts.
    pub fn next_segment(&self) -> usize {
        self.segments_written
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

pub struct StreamWriter {
    tx: mpsc::Sender<BodyChunk>,
    chunk_size: usize,
    write_timeout: Duration,
}

impl StreamWriter {
    /// A writer plus the body stream it feeds.
    /// `write_timeout` bounds how long one chunk may wait for the client.
    pub fn channel(chunk_size: usize, write_timeout: Duration) -> (Self, ReceiverStream<BodyChunk>) {
        let (tx, rx) = mpsc::channel(1);
        let writer = Self {
            tx,
            chunk_size: chunk_size.max(1),
            write_timeout,
        };
        (writer, ReceiverStream::new(rx))
    }

    pub fn begin_stream(&self, request_id: Uuid) -> StreamSession {
        StreamSession {
            request_id,
            segments_written: 0,
            bytes_written: 0,
            state: SessionState::Pending,
            started: Instant::now(),
        }
    }

    /// Resolves once the response body has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Write every byte of `segment` before returning.
    pub async fn write_segment(
        &self,
        session: &mut StreamSession,
        segment: &AudioSegment,
    ) -> Result<(), StreamFailure> {
        if segment.index != session.segments_written {
            return Err(SynthesisError::inference(format!(
                "segment {} arrived out of order (expected {})",
                segment.index, session.segments_written
            ))
            .into());
        }
        session.state = SessionState::Streaming;

        match &segment.payload {
            SegmentPayload::Buffer(bytes) => {
                for chunk in bytes.chunks(self.chunk_size) {
                    self.send(session, Bytes::copy_from_slice(chunk)).await?;
                }
            }
            SegmentPayload::File(path) => {
                let mut file = tokio::fs::File::open(path).await.map_err(|e| {
                    SynthesisError::inference(format!(
                        "segment {} unreadable: {e}",
                        segment.index
                    ))
                })?;
                let mut buf = vec![0u8; self.chunk_size];
                loop {
                    let n = file.read(&mut buf).await.map_err(|e| {
                        SynthesisError::inference(format!(
                            "segment {} read failed: {e}",
                            segment.index
                        ))
                    })?;
                    if n == 0 {
                        break;
                    }
                    self.send(session, Bytes::copy_from_slice(&buf[..n])).await?;
                }
            }
        }

        session.segments_written += 1;
        Ok(())
    }

    async fn send(&self, session: &mut StreamSession, chunk: Bytes) -> Result<(), StreamFailure> {
        let len = chunk.len() as u64;
        match tokio::time::timeout(self.write_timeout, self.tx.send(Ok(chunk))).await {
            Ok(Ok(())) => {
                session.bytes_written += len;
                Ok(())
            }
            Ok(Err(_)) => Err(StreamFailure::Transport(
                "client disconnected during write".to_string(),
            )),
            Err(_) => Err(StreamFailure::Transport(format!(
                "client stopped reading for {} ms",
                self.write_timeout.as_millis()
            ))),
        }
    }

    /// Finish the response. Consumes the writer, so a session ends once.
    pub async fn end_stream(self, mut session: StreamSession, outcome: StreamOutcome) -> StreamSession {
        let elapsed_ms = session.started.elapsed().as_millis() as u64;
        match outcome {
            StreamOutcome::Completed => {
                session.state = SessionState::Completed;
                info!(
                    request_id = %session.request_id,
                    segments = session.segments_written,
                    bytes = session.bytes_written,
                    elapsed_ms,
                    "stream completed"
                );
            }
            StreamOutcome::Failed(failure) => {
                session.state = SessionState::Failed;
                warn!(
                    request_id = %session.request_id,
                    segments = session.segments_written,
                    bytes = session.bytes_written,
                    elapsed_ms,
                    "stream aborted: {failure}"
                );
                // abort the response; nothing to signal if the client is gone
                if let StreamFailure::Synthesis(_) = failure {
                    let abort = self.tx.send(Err(io::Error::other(failure.to_string())));
                    let _ = tokio::time::timeout(self.write_timeout, abort).await;
                }
            }
        }
        session
    }
}
