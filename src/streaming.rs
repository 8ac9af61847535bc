use crate::constants::{DONE_MARKER, MAX_SSE_LINE_BYTES, MAX_STREAM_LINES};
use crate::logging::StreamMetric;
use crate::types::{ChatError, DeltaEvent, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Classifies the data payload of one wire event.
///
/// Returns `None` for well-formed records that carry no `message`; those are
/// neither text nor damage and are skipped.
pub fn parse_event_data(data: &str) -> Option<DeltaEvent> {
    if data == DONE_MARKER {
        return Some(DeltaEvent::Done);
    }

    let record = match serde_json::from_str::<serde_json::Value>(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(
                "[STREAM] Malformed frame ({}): {}",
                e,
                crate::str_utils::log_preview(data, 200)
            );
            return Some(DeltaEvent::Malformed);
        }
    };

    match record.get("message") {
        Some(serde_json::Value::String(text)) => Some(DeltaEvent::Data(text.clone())),
        Some(other) => {
            tracing::debug!("[STREAM] Non-string message field: {}", other);
            Some(DeltaEvent::Malformed)
        }
        None => {
            if record.get("action").and_then(|a| a.as_str()) == Some("error") {
                tracing::warn!(
                    "[☁️  -> ⚙️ ] Upstream error frame: {}",
                    crate::str_utils::log_preview(data, 200)
                );
            } else {
                tracing::trace!("[STREAM] Frame without message skipped");
            }
            None
        }
    }
}

/// Turns a server-sent event byte stream into [`DeltaEvent`]s.
///
/// Events come out in arrival order, one at a time. The sequence ends after
/// `Done`, after the byte stream ends, or after the first transport error.
pub struct StreamDecoder<R> {
    lines: FramedRead<StreamReader<R, Bytes>, LinesCodec>,
    data_lines: Vec<String>,
    line_count: usize,
    eof: bool,
    finished: bool,
    metrics: StreamMetric,
}

impl StreamDecoder<ByteStream> {
    pub fn from_response(response: reqwest::Response) -> Self {
        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        Self::new(Box::pin(bytes_stream))
    }
}

impl<R> StreamDecoder<R>
where
    R: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    pub fn new(byte_stream: R) -> Self {
        Self {
            lines: FramedRead::new(
                StreamReader::new(byte_stream),
                LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES),
            ),
            data_lines: Vec::new(),
            line_count: 0,
            eof: false,
            finished: false,
            metrics: StreamMetric::new(),
        }
    }

    pub fn metrics(&self) -> &StreamMetric {
        &self.metrics
    }

    pub async fn next_delta(&mut self) -> Option<Result<DeltaEvent>> {
        while !self.finished {
            if self.eof {
                let pending = self.take_event();
                self.finish();
                if let Some(data) = pending {
                    tracing::debug!("[STREAM] Dispatching unterminated event at end of stream");
                    if let Some(delta) = self.dispatch(&data) {
                        return Some(Ok(delta));
                    }
                }
                return None;
            }

            match self.lines.next().await {
                Some(Ok(line)) => {
                    self.line_count += 1;
                    if self.line_count > MAX_STREAM_LINES {
                        tracing::error!(
                            "[☁️  -> ⚙️ ] Stream exceeded max line limit ({})",
                            MAX_STREAM_LINES
                        );
                        self.finish();
                        return Some(Err(ChatError::Internal(
                            "Stream exceeded max line limit".to_string(),
                            tracing_error::SpanTrace::capture(),
                        )
                        .into()));
                    }

                    if line.is_empty() {
                        if let Some(data) = self.take_event() {
                            if let Some(delta) = self.dispatch(&data) {
                                return Some(Ok(delta));
                            }
                        }
                    } else {
                        self.push_field(&line);
                    }
                }
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(line_error(e).into()));
                }
                None => self.eof = true,
            }
        }
        None
    }

    /// Lazy, non-restartable view of the remaining deltas.
    pub fn into_stream(self) -> impl Stream<Item = Result<DeltaEvent>> {
        futures_util::stream::unfold(self, |mut decoder| async move {
            let item = decoder.next_delta().await?;
            Some((item, decoder))
        })
    }

    fn push_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(data)
    }

    fn dispatch(&mut self, data: &str) -> Option<DeltaEvent> {
        let delta = parse_event_data(data);
        self.metrics.record_frame(delta.as_ref());
        if delta == Some(DeltaEvent::Done) {
            tracing::debug!("[☁️  -> ⚙️ ] Stream end marker [DONE] received");
            self.finish();
        }
        delta
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.metrics.log_summary();
        }
    }
}

fn line_error(e: LinesCodecError) -> ChatError {
    tracing::error!("[☁️  -> ⚙️ ] Line Parse Error: {}", e);
    match e {
        LinesCodecError::Io(io) => ChatError::Io(io),
        LinesCodecError::MaxLineLengthExceeded => {
            ChatError::Io(std::io::Error::other("Max line length exceeded"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_done_marker() {
        assert_eq!(parse_event_data("[DONE]"), Some(DeltaEvent::Done));
    }

    #[test]
    fn test_parse_message_frame() {
        let event = parse_event_data(r#"{"role":"assistant","message":"Hel","model":"x"}"#);
        assert_eq!(event, Some(DeltaEvent::Data("Hel".to_string())));
    }

    #[test]
    fn test_parse_frame_without_message_is_skipped() {
        assert_eq!(parse_event_data(r#"{"role":"assistant"}"#), None);
        assert_eq!(
            parse_event_data(r#"{"action":"error","status":429,"type":"ERR_CONVERSATION_LIMIT"}"#),
            None
        );
    }

    #[test]
    fn test_parse_malformed_frames() {
        assert_eq!(parse_event_data("{not json"), Some(DeltaEvent::Malformed));
        assert_eq!(
            parse_event_data(r#"{"message":42}"#),
            Some(DeltaEvent::Malformed)
        );
    }
}
