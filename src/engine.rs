use crate::accumulator::{Progress, ResponseAccumulator};
use crate::constants::{APOLOGY_MESSAGE, BROWSER_USER_AGENT, TOKEN_REJECTED_STATUS_CODES, VQD_HEADER};
use crate::hardening::RetryPolicy;
use crate::registry::SnippetView;
use crate::session::{CommittedTurn, Session};
use crate::speech::SpeechBridge;
use crate::streaming::StreamDecoder;
use crate::token::{token_from_headers, TokenProvider};
use crate::types::*;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

const RETRY_BASE_DELAY_MS: u64 = 100;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

/// Progress reported to whoever is presenting the turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Full response text so far.
    Live { text: String },
    /// Sent exactly once, after the turn is committed to the session.
    Completed {
        message: ChatMessage,
        snippets: Vec<SnippetView>,
        audio: Option<PathBuf>,
    },
}

impl TurnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Live { .. } => "live",
            Self::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub message: ChatMessage,
    pub snippets: Vec<SnippetView>,
    pub audio: Option<PathBuf>,
    /// True when the reply is the substitute apology.
    pub fallback: bool,
}

/// Client for the streaming chat endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    chat_url: String,
    model: String,
    retry: RetryPolicy,
    /// Bounds the wait for response headers. The streamed body is not capped.
    header_timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(
        client: reqwest::Client,
        chat_url: impl Into<String>,
        model: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            chat_url: chat_url.into(),
            model: model.into(),
            retry: RetryPolicy::new(max_retries, RETRY_BASE_DELAY_MS),
            header_timeout: None,
        }
    }

    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Runs one user turn end to end.
    ///
    /// Always appends an assistant message to the session log: the streamed
    /// reply on success, the apology text when the turn fails.
    pub async fn get_response(
        &self,
        session: &Session,
        speech: &SpeechBridge,
        prompt: &str,
        mode: Option<ChatMode>,
        events: &mpsc::Sender<TurnEvent>,
    ) -> TurnOutcome {
        let turn_id = TurnId::new();
        let span = tracing::info_span!("turn", turn_id = %turn_id.short());

        async move {
            let _gate = session.begin_turn().await;
            let settings = session.settings().await;
            let mode = mode.unwrap_or(settings.mode);
            let history_len = session.message_count().await;
            crate::logging::log_request_summary(
                &self.model,
                mode,
                prompt.chars().count(),
                history_len,
            );

            let (committed, fallback) =
                match self.stream_reply(session.tokens(), mode, prompt, events).await {
                    Ok(reply) => (session.commit_turn(prompt, reply).await, false),
                    Err(e) => {
                        tracing::error!("Turn failed, substituting apology: {}", e);
                        (session.commit_fallback(prompt, APOLOGY_MESSAGE).await, true)
                    }
                };
            let CommittedTurn { message, snippets } = committed;

            let audio = if settings.voice_enabled && !fallback {
                match speech.synthesize(&message.content).await {
                    Some(artifact) => Some(session.replace_audio(artifact).await),
                    None => None,
                }
            } else {
                None
            };

            crate::logging::log_turn_summary(
                message.content.chars().count(),
                snippets.len(),
                fallback,
            );

            let completed = TurnEvent::Completed {
                message: message.clone(),
                snippets: snippets.clone(),
                audio: audio.clone(),
            };
            if events.send(completed).await.is_err() {
                tracing::debug!("Turn listener gone before completion");
            }

            TurnOutcome {
                turn_id,
                message,
                snippets,
                audio,
                fallback,
            }
        }
        .instrument(span)
        .await
    }

    /// Streams the reply for `prompt`, forwarding the growing text as it arrives.
    async fn stream_reply(
        &self,
        tokens: &TokenProvider,
        mode: ChatMode,
        prompt: &str,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<String> {
        let outgoing = mode.render_prompt(prompt);
        let response = self.open_stream(tokens, &outgoing).await?;

        if let Some(token) = token_from_headers(response.headers()) {
            tokens.rotate(token).await;
        }

        let mut decoder = StreamDecoder::from_response(response);
        let mut accumulator = ResponseAccumulator::new();
        let mut listening = true;

        while let Some(item) = decoder.next_delta().await {
            match accumulator.consume(item?) {
                Progress::Live(text) => {
                    if listening {
                        let live = TurnEvent::Live {
                            text: text.to_string(),
                        };
                        if events.send(live).await.is_err() {
                            tracing::debug!("Live listener dropped, continuing turn");
                            listening = false;
                        }
                    }
                }
                Progress::Finished(_) => break,
                Progress::Unchanged(_) => {}
            }
        }

        if !accumulator.is_finished() {
            tracing::warn!(
                "[☁️  -> ⚙️ ] Stream ended without [DONE] after {} deltas, keeping partial text",
                accumulator.delta_count()
            );
        }

        let reply = accumulator.finalize();
        if reply.trim().is_empty() {
            return Err(ChatError::Upstream(
                axum::http::StatusCode::BAD_GATEWAY,
                "stream produced no text".to_string(),
            )
            .into());
        }
        Ok(reply)
    }

    /// Opens the chat stream, re-acquiring the credential once if it is rejected.
    async fn open_stream(&self, tokens: &TokenProvider, prompt: &str) -> Result<reqwest::Response> {
        let token = tokens.acquire_token().await?;
        match self.send_chat(&token, prompt).await {
            Err(e) if is_token_rejection(&e) => {
                tracing::warn!("[☁️  -> ⚙️ ] Credential rejected ({}), refetching once", e.inner);
                tokens.invalidate().await;
                let fresh = tokens.acquire_token().await?;
                self.send_chat(&fresh, prompt).await
            }
            other => other,
        }
    }

    async fn send_chat(&self, token: &SessionToken, prompt: &str) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![WireMessage {
                role: Role::User,
                content: prompt,
            }],
        };

        let body = &body;
        self.retry
            .execute_with_retry(move || async move {
                tracing::debug!("[⚙️  -> ☁️ ] POST {} ({})", self.chat_url, self.model);
                let pending = self
                    .client
                    .post(&self.chat_url)
                    .header("accept", "text/event-stream")
                    .header("user-agent", BROWSER_USER_AGENT)
                    .header(VQD_HEADER, token.as_str())
                    .json(body)
                    .send();
                let sent = match self.header_timeout {
                    Some(limit) => match tokio::time::timeout(limit, pending).await {
                        Ok(sent) => sent,
                        Err(_) => {
                            tracing::error!("[☁️  -> ⚙️ ] No response headers within {:?}", limit);
                            return Err(ObservedError::from(ChatError::Upstream(
                                axum::http::StatusCode::GATEWAY_TIMEOUT,
                                format!("no response within {:?}", limit),
                            )));
                        }
                    },
                    None => pending.await,
                };
                let response = sent.map_err(|e| ObservedError::from(ChatError::Network(e)))?;

                let status = response.status();
                tracing::info!("[☁️  -> ⚙️ ] Status: {}", status);
                if status.is_success() {
                    return Ok(response);
                }

                let error_body = match response.text().await {
                    Ok(text) => text,
                    Err(e) => format!("Upstream error (body unreadable): {}", e),
                };
                tracing::error!(
                    "[☁️  -> ⚙️ ] Upstream Error: {}",
                    crate::str_utils::log_preview(&error_body, 300)
                );
                Err(ObservedError::from(ChatError::Upstream(status, error_body)))
            })
            .await
    }
}

fn is_token_rejection(err: &ObservedError) -> bool {
    matches!(
        &err.inner,
        ChatError::Upstream(status, _) if TOKEN_REJECTED_STATUS_CODES.contains(&status.as_u16())
    )
}
