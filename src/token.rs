use crate::constants::{BROWSER_USER_AGENT, VQD_ACCEPT_HEADER, VQD_HEADER};
use crate::types::{ChatError, Result, SessionToken};
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Cached,
    Fetching,
    Pending,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Cached => "cached",
            TokenState::Fetching => "fetching",
            TokenState::Pending => "pending",
        }
    }
}

/// Obtains and caches the conversation credential for one session.
///
/// The cache is the only trigger for re-acquisition: a token is fetched when
/// none is cached, and reused for every later request until something
/// invalidates or rotates it.
pub struct TokenProvider {
    client: reqwest::Client,
    status_url: String,
    cached: RwLock<Option<SessionToken>>,
    // Serialises bootstrap fetches; the cache lock is never held across one.
    fetch_gate: Mutex<()>,
    request_timeout: Option<Duration>,
}

impl TokenProvider {
    pub fn new(client: reqwest::Client, status_url: impl Into<String>) -> Self {
        Self {
            client,
            status_url: status_url.into(),
            cached: RwLock::new(None),
            fetch_gate: Mutex::new(()),
            request_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub async fn acquire_token(&self) -> Result<SessionToken> {
        if let Some(token) = self.cached.read().await.clone() {
            tracing::trace!("Reusing cached session token");
            return Ok(token);
        }

        let _gate = self.fetch_gate.lock().await;
        // Another caller may have filled the slot while we waited for the gate.
        if let Some(token) = self.cached.read().await.clone() {
            return Ok(token);
        }
        let token = self.fetch().await?;
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }

    async fn fetch(&self) -> Result<SessionToken> {
        tracing::debug!("[⚙️  -> ☁️ ] Fetching session token from {}", self.status_url);
        let mut request = self
            .client
            .get(&self.status_url)
            .header("sec-gpc", "1")
            .header("user-agent", BROWSER_USER_AGENT)
            .header(VQD_ACCEPT_HEADER, "1");
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ChatError::TokenUnavailable(format!("bootstrap request failed: {}", e)))?;

        match token_from_headers(response.headers()) {
            Some(token) => {
                tracing::info!("[☁️  -> ⚙️ ] Session token acquired");
                Ok(token)
            }
            None => {
                tracing::error!(
                    "[☁️  -> ⚙️ ] Bootstrap response (status {}) carried no {} header",
                    response.status(),
                    VQD_HEADER
                );
                Err(ChatError::TokenUnavailable(format!(
                    "bootstrap response has no {} header",
                    VQD_HEADER
                ))
                .into())
            }
        }
    }

    /// Drops the cached token so the next request re-acquires one.
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            tracing::warn!("Session token invalidated");
        }
    }

    /// Overwrites the cache with a credential handed out by the chat endpoint.
    pub async fn rotate(&self, token: SessionToken) {
        let mut slot = self.cached.write().await;
        if slot.as_ref() != Some(&token) {
            tracing::debug!("Session token rotated by chat response");
            *slot = Some(token);
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.read().await.is_some()
    }

    /// Cache state for readiness reporting. Does not wait on an in-flight fetch.
    pub async fn state(&self) -> TokenState {
        if self.is_cached().await {
            TokenState::Cached
        } else if self.fetch_gate.try_lock().is_err() {
            TokenState::Fetching
        } else {
            TokenState::Pending
        }
    }
}

pub fn token_from_headers(headers: &HeaderMap) -> Option<SessionToken> {
    let value = headers.get(VQD_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(SessionToken(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use reqwest::header::HeaderValue;
    use std::sync::Arc;

    #[test]
    fn test_token_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());

        headers.insert("X-Vqd-4", HeaderValue::from_static("4-12345"));
        match token_from_headers(&headers) {
            Some(t) => assert_eq!(t.as_str(), "4-12345"),
            None => panic!("expected token"),
        }
    }

    #[test]
    fn test_blank_header_is_not_a_token() {
        let mut headers = HeaderMap::new();
        headers.insert(VQD_HEADER, HeaderValue::from_static("  "));
        assert!(token_from_headers(&headers).is_none());
    }

    #[tokio::test]
    async fn test_rotate_and_invalidate() {
        let provider = TokenProvider::new(reqwest::Client::new(), "http://127.0.0.1:9/status");
        assert!(!provider.is_cached().await);

        provider.rotate(SessionToken("abc".into())).await;
        assert!(provider.is_cached().await);
        match provider.acquire_token().await {
            Ok(t) => assert_eq!(t.as_str(), "abc"),
            Err(e) => panic!("cached token should be reused: {}", e),
        }

        provider.invalidate().await;
        assert!(!provider.is_cached().await);
    }

    #[tokio::test]
    async fn test_state_reports_fetch_without_waiting() {
        let app = Router::new().route(
            "/status",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                ([(VQD_HEADER, "tok-slow")], "")
            }),
        );
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

        let provider = Arc::new(TokenProvider::new(
            reqwest::Client::new(),
            format!("http://{}/status", addr),
        ));
        assert_eq!(provider.state().await, TokenState::Pending);

        let fetching = provider.clone();
        let handle = tokio::spawn(async move { fetching.acquire_token().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        match tokio::time::timeout(Duration::from_millis(100), provider.state()).await {
            Ok(state) => assert_eq!(state, TokenState::Fetching),
            Err(_) => panic!("state() blocked on the bootstrap fetch"),
        }

        match handle.await {
            Ok(Ok(token)) => assert_eq!(token.as_str(), "tok-slow"),
            other => panic!("fetch should succeed: {:?}", other.map(|r| r.is_ok())),
        }
        assert_eq!(provider.state().await, TokenState::Cached);
    }
}
