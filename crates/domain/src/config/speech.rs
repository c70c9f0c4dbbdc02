use serde::{Deserialize, Serialize};

use super::llm::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speech (STT + TTS)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeechConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

/// Speech-to-text via an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_openai_url")]
    pub base_url: String,
    #[serde(default = "d_whisper")]
    pub model: String,
    #[serde(default = "d_stt_auth")]
    pub auth: AuthConfig,
    /// Optional ISO-639-1 hint passed to the provider.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "d_60000u")]
    pub timeout_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: d_openai_url(),
            model: d_whisper(),
            auth: d_stt_auth(),
            language: None,
            timeout_ms: d_60000u(),
        }
    }
}

/// Speech synthesis via the ElevenLabs text-to-speech API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_elevenlabs_url")]
    pub base_url: String,
    #[serde(default = "d_tts_auth")]
    pub auth: AuthConfig,
    /// Voice used when the conversation's persona has none configured.
    #[serde(default)]
    pub default_voice_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default = "d_output_format")]
    pub output_format: String,
    #[serde(default = "d_voice_settings")]
    pub voice: VoiceSettings,
    /// `optimize_streaming_latency` query parameter (0-4).
    #[serde(default = "d_latency")]
    pub optimize_streaming_latency: Option<u8>,
    /// Connect timeout. Streaming reads are unbounded.
    #[serde(default = "d_5000u")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for buffered (eager) synthesis.
    #[serde(default = "d_60000u")]
    pub request_timeout_ms: u64,
    /// Pre-open pooled connections to the provider at startup.
    #[serde(default = "d_true")]
    pub warm_up: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: d_elevenlabs_url(),
            auth: d_tts_auth(),
            default_voice_id: None,
            model_id: None,
            output_format: d_output_format(),
            voice: d_voice_settings(),
            optimize_streaming_latency: d_latency(),
            connect_timeout_ms: d_5000u(),
            request_timeout_ms: d_60000u(),
            warm_up: true,
        }
    }
}

/// Voice settings sent with every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Voice stability (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,
    /// Similarity boost (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,
    /// Style strength (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_openai_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_whisper() -> String {
    "whisper-1".into()
}
fn d_stt_auth() -> AuthConfig {
    AuthConfig::from_env("OPENAI_API_KEY")
}
fn d_elevenlabs_url() -> String {
    "https://api.elevenlabs.io/v1".into()
}
fn d_tts_auth() -> AuthConfig {
    AuthConfig {
        header: Some("xi-api-key".into()),
        prefix: Some(String::new()),
        ..AuthConfig::from_env("ELEVENLABS_API_KEY")
    }
}
fn d_output_format() -> String {
    "mp3_44100_128".into()
}
fn d_voice_settings() -> VoiceSettings {
    VoiceSettings {
        stability: Some(0.45),
        similarity_boost: Some(0.45),
        style: Some(0.0),
        use_speaker_boost: Some(true),
    }
}
fn d_latency() -> Option<u8> {
    Some(3)
}
fn d_5000u() -> u64 {
    5_000
}
fn d_60000u() -> u64 {
    60_000
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
