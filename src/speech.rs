use crate::constants::{AUDIO_SUFFIX, SPEECH_TRUNCATION_MARKER};
use crate::types::{ChatError, Result};
use futures_util::future::BoxFuture;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;

lazy_static! {
    static ref FENCED_CODE: Regex = Regex::new(r"(?s)```.*?```").expect("Invalid fence regex");
    static ref MARKDOWN_LINK: Regex =
        Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("Invalid link regex");
    static ref INLINE_CODE: Regex = Regex::new(r"`[^`\n]*`").expect("Invalid inline code regex");
    static ref BARE_URL: Regex =
        Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("Invalid url regex");
    static ref HTML_TAG: Regex = Regex::new(r"</?[A-Za-z][^>]*>").expect("Invalid html regex");
    static ref HEADING: Regex = Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").expect("Invalid heading regex");
    static ref EMPHASIS: Regex = Regex::new(r"[*_~]+").expect("Invalid emphasis regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("Invalid whitespace regex");
}

/// Strips markup that should not be read aloud.
pub fn clean_for_speech(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, " ");
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, " ");
    let text = BARE_URL.replace_all(&text, " ");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = HEADING.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = text.replace('`', " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Cleans and caps `text`. `None` when nothing speakable is left.
pub fn prepare_speech_text(text: &str, char_cap: usize) -> Option<String> {
    let cleaned = clean_for_speech(text);
    if cleaned.is_empty() {
        return None;
    }
    Some(crate::str_utils::truncate_with_marker(&cleaned, char_cap, SPEECH_TRUNCATION_MARKER).into_owned())
}

/// External voice backend: text in, encoded audio out.
pub trait VoiceSynthesizer: Send + Sync {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Posts `{text, voice}` JSON to a TTS service and reads the audio body back.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl HttpSynthesizer {
    async fn request_audio(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text, "voice": voice }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Synthesis(format!(
                "TTS service returned {}: {}",
                status,
                crate::str_utils::log_preview(&body, 200)
            ))
            .into());
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(ChatError::Synthesis("TTS service returned no audio".into()).into());
        }
        Ok(audio.to_vec())
    }
}

impl VoiceSynthesizer for HttpSynthesizer {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.request_audio(text, voice))
    }
}

/// Audio file on disk, removed when the handle is dropped.
#[derive(Debug)]
pub struct AudioArtifact {
    path: TempPath,
    len: usize,
}

impl AudioArtifact {
    pub async fn write(audio: &[u8]) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("codechat-")
            .suffix(AUDIO_SUFFIX)
            .tempfile()?
            .into_temp_path();
        tokio::fs::write(&path, audio).await?;
        Ok(Self {
            path,
            len: audio.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// Turns finished response text into an audio artifact.
///
/// Never fails: empty text, a missing backend, and backend errors all
/// resolve to `None`.
#[derive(Clone)]
pub struct SpeechBridge {
    synthesizer: Option<Arc<dyn VoiceSynthesizer>>,
    voice: String,
    char_cap: usize,
}

impl SpeechBridge {
    pub fn new(
        synthesizer: Option<Arc<dyn VoiceSynthesizer>>,
        voice: impl Into<String>,
        char_cap: usize,
    ) -> Self {
        Self {
            synthesizer,
            voice: voice.into(),
            char_cap,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, crate::constants::DEFAULT_VOICE, crate::constants::SPEECH_CHAR_CAP)
    }

    pub fn is_available(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub async fn synthesize(&self, text: &str) -> Option<AudioArtifact> {
        let synthesizer = match &self.synthesizer {
            Some(s) => s,
            None => {
                tracing::debug!("[SPEECH] No synthesizer configured, voice output skipped");
                return None;
            }
        };

        let spoken = match prepare_speech_text(text, self.char_cap) {
            Some(s) => s,
            None => {
                tracing::debug!("[SPEECH] Nothing speakable after cleaning");
                return None;
            }
        };

        tracing::debug!(
            "[⚙️  -> 🔊] Synthesizing {} chars with voice {}",
            spoken.chars().count(),
            self.voice
        );

        let audio = match synthesizer.synthesize(&spoken, &self.voice).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("[SPEECH] Synthesis failed, voice output omitted: {}", e.inner);
                return None;
            }
        };

        match AudioArtifact::write(&audio).await {
            Ok(artifact) => {
                tracing::info!(
                    "[🔊] Audio ready: {} ({} bytes)",
                    artifact.path().display(),
                    artifact.len()
                );
                Some(artifact)
            }
            Err(e) => {
                tracing::warn!("[SPEECH] Could not store audio artifact: {}", e.inner);
                None
            }
        }
    }
}
