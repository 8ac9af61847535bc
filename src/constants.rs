pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504, 520];

/// Statuses that mean the session credential was rejected
pub const TOKEN_REJECTED_STATUS_CODES: &[u16] = &[401, 403];

/// DuckDuckGo chat endpoints
pub const DUCKCHAT_STATUS_URL: &str = "https://duckduckgo.com/duckchat/v1/status";
pub const DUCKCHAT_CHAT_URL: &str = "https://duckduckgo.com/duckchat/v1/chat";

pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Session credential header, sent on chat requests and exposed by the status endpoint
pub const VQD_HEADER: &str = "x-vqd-4";
pub const VQD_ACCEPT_HEADER: &str = "x-vqd-accept";

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// SSE end-of-stream sentinel
pub const DONE_MARKER: &str = "[DONE]";

/// Max bytes in a single SSE line
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;
pub const MAX_STREAM_LINES: usize = 100_000;

/// Speech defaults
pub const DEFAULT_VOICE: &str = "en-GB-SoniaNeural";
pub const SPEECH_CHAR_CAP: usize = 1000;
pub const SPEECH_TRUNCATION_MARKER: &str = "... (response truncated)";
pub const AUDIO_SUFFIX: &str = ".mp3";

/// Substituted for the assistant turn when the turn cannot complete
pub const APOLOGY_MESSAGE: &str =
    "I am sorry, I am unable to process your request at the moment. Please try again later.";

/// Outgoing prompt prefixes per conversation mode
pub const CHAT_PREFIX: &str = "provide short and sweet answers for: ";
pub const EXPLAIN_PREFIX: &str = "explain the following code or concept clearly and concisely: ";
pub const DEBUG_PREFIX: &str =
    "find and fix the bugs in the following code, explaining each fix briefly: ";
pub const OPTIMIZE_PREFIX: &str =
    "optimize the following code for performance and readability, then explain the changes: ";
