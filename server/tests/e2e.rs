//! End-to-end tests over a real socket: multipart upload in, chunked audio out.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tts_core::SynthesisErrorKind;

use common::*;

async fn spawn_server(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn post_tts(addr: SocketAddr, text: &str) -> TcpStream {
    let body = MultipartBuilder::new()
        .text("text", text)
        .voice(&voice_wav(300, 16_000))
        .finish();
    let head = format!(
        "POST /tts HTTP/1.1\r\nHost: {addr}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content_type(),
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    stream
}

/// Read until the peer closes. A reset after an aborted body is expected.
async fn read_all(mut stream: TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return raw,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
}

fn split_response(raw: &[u8]) -> (String, &[u8]) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
    (head, &raw[end + 4..])
}

/// Decode a chunked body. The flag says whether the terminating chunk arrived.
fn dechunk(mut body: &[u8]) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    loop {
        let Some(line_end) = body.windows(2).position(|w| w == b"\r\n") else {
            return (out, false);
        };
        let size_line = std::str::from_utf8(&body[..line_end]).unwrap();
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
        body = &body[line_end + 2..];
        if size == 0 {
            return (out, true);
        }
        if body.len() < size + 2 {
            out.extend_from_slice(&body[..size.min(body.len())]);
            return (out, false);
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

#[tokio::test]
async fn test_complete_tts_pipeline_is_chunked() {
    let synth = ScriptedSynthesizer::new(["one-", "two-", "three"]).with_delay(Duration::from_millis(10));
    let app = create_test_app(Arc::new(synth), |_| {});
    let addr = spawn_server(&app).await;

    let raw = read_all(post_tts(addr, "Hello").await).await;
    let (head, body) = split_response(&raw);

    assert!(head.starts_with("http/1.1 200"), "{head}");
    assert!(head.contains("transfer-encoding: chunked"));
    assert!(head.contains("content-type: audio/wav"));
    assert!(head.contains("x-request-id: "));

    let (audio, terminated) = dechunk(body);
    assert_eq!(audio, b"one-two-three");
    assert!(terminated);

    assert!(wait_for(|| app.scratch_entries() == 0).await);
}

#[tokio::test]
async fn test_mid_stream_failure_has_no_terminating_chunk() {
    let synth = ScriptedSynthesizer::new(["first", "second"])
        .with_delay(Duration::from_millis(10))
        .failing_at(1, SynthesisErrorKind::Inference);
    let app = create_test_app(Arc::new(synth), |_| {});
    let addr = spawn_server(&app).await;

    let raw = read_all(post_tts(addr, "Hello").await).await;
    let (head, body) = split_response(&raw);
    assert!(head.starts_with("http/1.1 200"), "{head}");

    let (audio, terminated) = dechunk(body);
    assert_eq!(audio, b"first");
    assert!(!terminated);

    assert!(wait_for(|| app.scratch_entries() == 0).await);
    let gate = app.state.gate.snapshot();
    assert_eq!(gate.acquired_total, gate.released_total);
}

#[tokio::test]
async fn test_socket_close_releases_resources() {
    let segments: Vec<String> = (0..20).map(|i| format!("s{i:02}")).collect();
    let synth = ScriptedSynthesizer::new(segments).with_delay(Duration::from_millis(100));
    let tracker = synth.tracker.clone();
    let app = create_test_app(Arc::new(synth), |_| {});
    let addr = spawn_server(&app).await;

    let mut stream = post_tts(addr, "Hello").await;
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    while !raw.windows(3).any(|w| w == b"s00") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before the first segment");
        raw.extend_from_slice(&buf[..n]);
    }
    drop(stream);

    assert!(wait_for(|| app.state.gate.snapshot().released_total == 1).await);
    assert!(wait_for(|| app.scratch_entries() == 0).await);
    assert!(tracker.produced() < 20);
    assert_eq!(tracker.cancelled(), 1);
}
