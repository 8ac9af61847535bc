use crate::registry::{SnippetRegistry, SnippetView};
use crate::speech::AudioArtifact;
use crate::token::TokenProvider;
use crate::types::{ChatMessage, ChatMode, CodeSnippet, Result, SnippetId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{Mutex, MutexGuard, RwLock};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub mode: ChatMode,
    pub voice_enabled: bool,
}

/// Partial settings update; absent fields keep their value.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct SettingsPatch {
    pub mode: Option<ChatMode>,
    pub voice_enabled: Option<bool>,
}

#[derive(Debug, Default)]
struct SessionState {
    messages: Vec<ChatMessage>,
    snippets: SnippetRegistry,
    settings: SessionSettings,
    audio: Option<AudioArtifact>,
}

/// Result of committing one turn to the log.
#[derive(Debug, Clone)]
pub struct CommittedTurn {
    pub message: ChatMessage,
    pub snippets: Vec<SnippetView>,
}

/// All mutable state of one chat session.
///
/// Turns run one at a time behind `turn_gate`. Reads of the log and the
/// registry only take the state lock, so they never wait for a turn's stream.
pub struct Session {
    tokens: TokenProvider,
    state: RwLock<SessionState>,
    turn_gate: Mutex<()>,
}

impl Session {
    pub fn new(tokens: TokenProvider, settings: SessionSettings) -> Self {
        Self {
            tokens,
            state: RwLock::new(SessionState {
                settings,
                ..SessionState::default()
            }),
            turn_gate: Mutex::new(()),
        }
    }

    pub fn tokens(&self) -> &TokenProvider {
        &self.tokens
    }

    /// Waits for any in-flight turn, then holds the gate until the guard drops.
    pub async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_gate.lock().await
    }

    pub async fn settings(&self) -> SessionSettings {
        self.state.read().await.settings
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> SessionSettings {
        let mut state = self.state.write().await;
        if let Some(mode) = patch.mode {
            state.settings.mode = mode;
        }
        if let Some(voice) = patch.voice_enabled {
            state.settings.voice_enabled = voice;
            if !voice {
                state.audio = None;
            }
        }
        tracing::info!(
            "Settings updated: mode={} voice={}",
            state.settings.mode,
            state.settings.voice_enabled
        );
        state.settings
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// Appends the user prompt and the assistant reply.
    ///
    /// Snippets are extracted from `reply` here and nowhere else, so each
    /// assistant message is scanned exactly once.
    pub async fn commit_turn(&self, prompt: &str, reply: String) -> CommittedTurn {
        let blocks = crate::extract::extract(&reply);
        let mut state = self.state.write().await;

        let ids: Vec<SnippetId> = blocks
            .into_iter()
            .map(|block| state.snippets.add_block(block))
            .collect();
        let snippets = ids
            .iter()
            .filter_map(|id| state.snippets.view(*id))
            .collect();

        let message = ChatMessage::assistant(reply, ids);
        state.messages.push(ChatMessage::user(prompt));
        state.messages.push(message.clone());

        CommittedTurn { message, snippets }
    }

    /// Appends the user prompt with a substitute reply that is not scanned for code.
    pub async fn commit_fallback(&self, prompt: &str, reply: &str) -> CommittedTurn {
        let message = ChatMessage::assistant(reply, Vec::new());
        let mut state = self.state.write().await;
        state.messages.push(ChatMessage::user(prompt));
        state.messages.push(message.clone());
        CommittedTurn {
            message,
            snippets: Vec::new(),
        }
    }

    pub async fn snippet_views(&self) -> Vec<SnippetView> {
        self.state.read().await.snippets.views()
    }

    pub async fn snippet_view(&self, id: SnippetId) -> Option<SnippetView> {
        self.state.read().await.snippets.view(id)
    }

    pub async fn snippet(&self, id: SnippetId) -> Option<CodeSnippet> {
        self.state.read().await.snippets.get_by_id(id).cloned()
    }

    pub async fn all_snippets(&self) -> Vec<CodeSnippet> {
        self.state.read().await.snippets.iter().cloned().collect()
    }

    pub async fn update_snippet(&self, id: SnippetId, code: String) -> Result<SnippetView> {
        let mut state = self.state.write().await;
        state.snippets.update_by_id(id, code)?;
        state
            .snippets
            .view(id)
            .ok_or_else(|| crate::types::ChatError::UnknownSnippet(id).into())
    }

    pub async fn delete_snippet(&self, id: SnippetId) -> Result<CodeSnippet> {
        self.state.write().await.snippets.remove_by_id(id)
    }

    /// Stores the newest audio; the previous artifact's file is removed.
    pub async fn replace_audio(&self, artifact: AudioArtifact) -> PathBuf {
        let path = artifact.path().to_path_buf();
        let previous = self.state.write().await.audio.replace(artifact);
        if let Some(old) = previous {
            tracing::debug!("Releasing previous audio {}", old.path().display());
        }
        path
    }

    pub async fn latest_audio(&self) -> Option<Result<Vec<u8>>> {
        let state = self.state.read().await;
        match &state.audio {
            Some(artifact) => Some(artifact.read().await),
            None => None,
        }
    }
}
