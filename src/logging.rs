use crate::types::{ChatMode, DeltaEvent};
use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-codechat-request-id";

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Runs each HTTP request in its own span and echoes the id back to the caller.
pub async fn request_span_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        request_id = %crate::str_utils::prefix_chars(&request_id, 8),
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Ok(val) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

pub fn log_request_summary(model: &str, mode: ChatMode, prompt_chars: usize, history_len: usize) {
    info!(
        target: "flight_recorder",
        "[REQ] Model: {} | Mode: {} | Prompt: {} chars | History: {}",
        model, mode, prompt_chars, history_len
    );
}

pub fn log_turn_summary(text_chars: usize, snippets: usize, fallback: bool) {
    info!(
        target: "flight_recorder",
        "[RES] Text: {} chars | Snippets: {} | Fallback: {}",
        text_chars, snippets, fallback
    );
}

/// Per-stream frame counters, logged once when the stream ends.
#[derive(Default, Debug, Clone)]
pub struct StreamMetric {
    pub frames: usize,
    pub data_deltas: usize,
    pub malformed: usize,
    pub skipped: usize,
    pub text_chars: usize,
    pub done_seen: bool,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, delta: Option<&DeltaEvent>) {
        self.frames += 1;
        match delta {
            Some(DeltaEvent::Data(text)) => {
                self.data_deltas += 1;
                self.text_chars += text.chars().count();
            }
            Some(DeltaEvent::Malformed) => self.malformed += 1,
            Some(DeltaEvent::Done) => self.done_seen = true,
            None => self.skipped += 1,
        }
    }

    pub fn log_summary(&self) {
        info!(
            target: "flight_recorder",
            "[STREAM END] Frames: {} | Deltas: {} | Malformed: {} | Skipped: {} | Text: {} chars | Done: {}",
            self.frames, self.data_deltas, self.malformed, self.skipped, self.text_chars, self.done_seen
        );
    }
}
