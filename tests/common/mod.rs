#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use codechat::Args;
use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// In-process stand-in for the status and chat endpoints.
pub struct MockUpstream {
    pub status_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub seen_tokens: Mutex<Vec<String>>,
    pub seen_bodies: Mutex<Vec<serde_json::Value>>,
    /// Token values handed out by successive status calls; empty means no header.
    pub issued_tokens: Vec<String>,
    /// Chat calls answered with 401 before the stream is served.
    pub reject_first: usize,
    pub chat_status: StatusCode,
    pub rotated_token: Option<String>,
    pub sse_body: String,
}

impl MockUpstream {
    pub fn streaming(sse_body: impl Into<String>) -> Self {
        Self {
            status_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            seen_bodies: Mutex::new(Vec::new()),
            issued_tokens: vec!["tok-1".into(), "tok-2".into(), "tok-3".into()],
            reject_first: 0,
            chat_status: StatusCode::OK,
            rotated_token: None,
            sse_body: sse_body.into(),
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        match self.seen_tokens.lock() {
            Ok(t) => t.clone(),
            Err(e) => panic!("lock poisoned: {}", e),
        }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        match self.seen_bodies.lock() {
            Ok(b) => b.clone(),
            Err(e) => panic!("lock poisoned: {}", e),
        }
    }
}

async fn status(State(mock): State<Arc<MockUpstream>>, headers: HeaderMap) -> Response {
    let call = mock.status_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(
        headers.get("x-vqd-accept").and_then(|v| v.to_str().ok()),
        Some("1")
    );
    match mock.issued_tokens.get(call) {
        Some(token) => (StatusCode::OK, [("x-vqd-4", token.clone())], "").into_response(),
        None => (StatusCode::OK, "").into_response(),
    }
}

async fn chat(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let call = mock.chat_calls.fetch_add(1, Ordering::SeqCst);
    let token = headers
        .get("x-vqd-4")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if let Ok(mut seen) = mock.seen_tokens.lock() {
        seen.push(token);
    }
    if let Ok(mut bodies) = mock.seen_bodies.lock() {
        bodies.push(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null));
    }

    if call < mock.reject_first {
        return (StatusCode::UNAUTHORIZED, "expired").into_response();
    }
    if mock.chat_status != StatusCode::OK {
        return (mock.chat_status, "upstream refused").into_response();
    }

    let mut response = (
        StatusCode::OK,
        [("content-type", "text/event-stream")],
        mock.sse_body.clone(),
    )
        .into_response();
    if let Some(rotated) = &mock.rotated_token {
        if let Ok(value) = rotated.parse() {
            response.headers_mut().insert("x-vqd-4", value);
        }
    }
    response
}

/// Serves the mock on an ephemeral port and returns its base URL.
pub async fn spawn_upstream(mock: Arc<MockUpstream>) -> String {
    let app = Router::new()
        .route("/status", get(status))
        .route("/chat", post(chat))
        .with_state(mock);
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {}", e),
    };
    let addr = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => panic!("no local addr: {}", e),
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

pub fn args_for(base: &str, extra: &[&str]) -> Arc<Args> {
    args_with_urls(&format!("{}/status", base), &format!("{}/chat", base), extra)
}

pub fn args_with_urls(status_url: &str, chat_url: &str, extra: &[&str]) -> Arc<Args> {
    let mut argv = vec![
        "codechat",
        "--status-url",
        status_url,
        "--chat-url",
        chat_url,
        "--max-retries",
        "2",
    ];
    argv.extend_from_slice(extra);
    Arc::new(Args::parse_from(argv))
}

/// Formats `message` frames followed by the end marker.
pub fn sse_frames(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        let frame = serde_json::json!({ "role": "assistant", "message": part, "model": "mock" });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// One chat connection served byte by byte over chunked encoding.
pub struct ChatScript {
    /// `(delay before the chunk in ms, chunk)` pairs.
    pub chunks: Vec<(u64, String)>,
    /// Whether the terminating zero-length chunk is sent before closing.
    pub complete: bool,
}

impl ChatScript {
    pub fn complete(body: impl Into<String>) -> Self {
        Self {
            chunks: vec![(0, body.into())],
            complete: true,
        }
    }

    pub fn cut_after(chunk: impl Into<String>) -> Self {
        Self {
            chunks: vec![(0, chunk.into())],
            complete: false,
        }
    }

    pub fn paced(chunks: Vec<(u64, String)>) -> Self {
        Self { chunks, complete: true }
    }
}

/// Raw TCP chat endpoint: one script per connection, then the port is closed.
pub async fn spawn_scripted_chat(scripts: Vec<ChatScript>) -> String {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) => panic!("bind failed: {}", e),
    };
    let addr = match listener.local_addr() {
        Ok(a) => a,
        Err(e) => panic!("no local addr: {}", e),
    };
    tokio::spawn(async move {
        let mut listener = Some(listener);
        let total = scripts.len();
        for (served, script) in scripts.into_iter().enumerate() {
            let accepted = match &listener {
                Some(l) => l.accept().await,
                None => break,
            };
            if served + 1 == total {
                // Later connection attempts are refused.
                listener = None;
            }
            if let Ok((socket, _)) = accepted {
                serve_script(socket, script).await;
            }
        }
        drop(listener);
    });
    format!("http://{}/chat", addr)
}

async fn serve_script(mut socket: TcpStream, script: ChatScript) {
    read_request(&mut socket).await;
    let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for (delay_ms, chunk) in script.chunks {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let framed = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
        if socket.write_all(framed.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
    }
    if script.complete {
        let _ = socket.write_all(b"0\r\n\r\n").await;
    }
    let _ = socket.shutdown().await;
}

/// Consumes the request head and its `content-length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + body_len {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}
