use crate::constants::*;
use crate::engine::ChatClient;
use crate::session::{Session, SessionSettings};
use crate::speech::{HttpSynthesizer, SpeechBridge, VoiceSynthesizer};
use crate::token::TokenProvider;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

pub const TTS_URL_ENV: &str = "CODECHAT_TTS_URL";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,
    #[arg(long, default_value = DUCKCHAT_STATUS_URL)]
    pub status_url: String,
    #[arg(long, default_value = DUCKCHAT_CHAT_URL)]
    pub chat_url: String,
    /// Bounds the token fetch and the wait for chat response headers
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
    #[arg(long, default_value = DEFAULT_VOICE)]
    pub voice: String,
    /// Speech service endpoint; falls back to CODECHAT_TTS_URL
    #[arg(long)]
    pub tts_url: Option<String>,
    #[arg(long, default_value_t = SPEECH_CHAR_CAP)]
    pub speech_char_cap: usize,
    #[arg(long, default_value_t = false)]
    pub voice_enabled: bool,
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value = ".")]
    pub log_dir: String,
}

impl Args {
    pub fn resolved_tts_url(&self) -> Option<String> {
        self.tts_url
            .clone()
            .or_else(|| std::env::var(TTS_URL_ENV).ok())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub args: Arc<Args>,
    pub chat: Arc<ChatClient>,
    pub session: Arc<Session>,
    pub speech: SpeechBridge,
}

impl AppState {
    pub fn new(client: reqwest::Client, args: Arc<Args>) -> Self {
        let synthesizer: Option<Arc<dyn VoiceSynthesizer>> = match args.resolved_tts_url() {
            Some(url) => {
                tracing::info!("Voice output via {}", url);
                let synthesizer: Arc<dyn VoiceSynthesizer> =
                    Arc::new(HttpSynthesizer::new(client.clone(), url));
                Some(synthesizer)
            }
            None => {
                tracing::info!("No speech service configured, voice output unavailable");
                None
            }
        };
        let speech = SpeechBridge::new(synthesizer, args.voice.clone(), args.speech_char_cap);
        Self::with_speech(client, args, speech)
    }

    pub fn with_speech(client: reqwest::Client, args: Arc<Args>, speech: SpeechBridge) -> Self {
        let request_timeout = Duration::from_secs(args.request_timeout_secs);
        let tokens =
            TokenProvider::new(client.clone(), args.status_url.clone()).with_timeout(request_timeout);
        let session = Session::new(
            tokens,
            SessionSettings {
                voice_enabled: args.voice_enabled,
                ..SessionSettings::default()
            },
        );
        let chat = ChatClient::new(
            client.clone(),
            args.chat_url.clone(),
            args.model.clone(),
            args.max_retries,
        )
        .with_header_timeout(request_timeout);
        Self {
            client,
            args,
            chat: Arc::new(chat),
            session: Arc::new(session),
            speech,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["codechat"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.model, DEFAULT_MODEL);
        assert_eq!(args.chat_url, DUCKCHAT_CHAT_URL);
        assert_eq!(args.speech_char_cap, 1000);
        assert!(!args.voice_enabled);
    }

    #[test]
    fn test_explicit_tts_url_wins() {
        let args = Args::parse_from(["codechat", "--tts-url", " http://tts.local/speak "]);
        assert_eq!(args.resolved_tts_url().as_deref(), Some("http://tts.local/speak"));
    }
}
