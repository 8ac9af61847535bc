use crate::constants::{CHAT_PREFIX, DEBUG_PREFIX, EXPLAIN_PREFIX, OPTIMIZE_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SnippetId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TurnId(pub Uuid);

impl SnippetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnippetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SnippetId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        crate::str_utils::prefix_chars(&self.0.to_string(), 8).to_string()
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque bootstrap credential for the chat backend.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep the credential out of Debug output.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken([REDACTED; {} chars])", self.0.len())
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(axum::http::StatusCode, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snippet index {index} out of range (registry holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unknown snippet: {0}")]
    UnknownSnippet(SnippetId),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl ChatError {
    /// Errors that end the in-flight turn but leave the session usable.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Self::TokenUnavailable(_) | Self::Network(_) | Self::Upstream(..) | Self::Io(_)
        )
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ChatError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ChatError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, code) = match &self.inner {
            ChatError::IndexOutOfRange { .. } => (StatusCode::NOT_FOUND, "INDEX_OUT_OF_RANGE"),
            ChatError::UnknownSnippet(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SNIPPET"),
            ChatError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ChatError::TokenUnavailable(_) => (StatusCode::BAD_GATEWAY, "TOKEN_UNAVAILABLE"),
            ChatError::Network(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            ChatError::Upstream(..) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ChatError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            ChatError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR")
            }
            ChatError::Synthesis(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SYNTHESIS_ERROR"),
            ChatError::Internal(..) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        (
            status,
            axum::Json(serde_json::json!({
                "error": self.inner.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Snippets extracted from this message when it was committed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippet_ids: Vec<SnippetId>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            snippet_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, snippet_ids: Vec<SnippetId>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            snippet_ids,
            created_at: Utc::now(),
        }
    }
}

/// A single unit produced by the stream decoder from one wire event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEvent {
    Data(String),
    Done,
    Malformed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Java,
    Csharp,
    Html,
    Css,
    Json,
    Xml,
    Text,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Java => "java",
            Self::Csharp => "csharp",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Text => "text",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Javascript => "js",
            Self::Typescript => "ts",
            Self::Java => "java",
            Self::Csharp => "cs",
            Self::Html => "html",
            Self::Css => "css",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Text => "txt",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeSnippet {
    pub id: SnippetId,
    pub raw_code: String,
    pub language: Language,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

/// Prompt template selector. Rewrites the outgoing prompt only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Chat,
    Explain,
    Debug,
    Optimize,
}

impl ChatMode {
    pub fn render_prompt(&self, prompt: &str) -> String {
        let prefix = match self {
            Self::Chat => CHAT_PREFIX,
            Self::Explain => EXPLAIN_PREFIX,
            Self::Debug => DEBUG_PREFIX,
            Self::Optimize => OPTIMIZE_PREFIX,
        };
        format!("{}{}", prefix, prompt)
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chat => "chat",
            Self::Explain => "explain",
            Self::Debug => "debug",
            Self::Optimize => "optimize",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_mode_prefixes_prompt() {
        let rendered = ChatMode::Chat.render_prompt("what is rust?");
        assert_eq!(
            rendered,
            "provide short and sweet answers for: what is rust?"
        );
        assert!(ChatMode::Debug
            .render_prompt("x = 1/0")
            .ends_with("x = 1/0"));
    }

    #[test]
    fn test_chat_mode_wire_names() {
        let mode: ChatMode = match serde_json::from_str("\"optimize\"") {
            Ok(m) => m,
            Err(e) => panic!("mode should parse: {}", e),
        };
        assert_eq!(mode, ChatMode::Optimize);
        assert_eq!(ChatMode::default(), ChatMode::Chat);
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken("secret-vqd".to_string());
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("secret-vqd"));
    }

    #[test]
    fn test_turn_fatal_classification() {
        assert!(ChatError::TokenUnavailable("x".into()).is_turn_fatal());
        assert!(!ChatError::IndexOutOfRange { index: 3, len: 1 }.is_turn_fatal());
        assert!(!ChatError::Synthesis("x".into()).is_turn_fatal());
    }
}
