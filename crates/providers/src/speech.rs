//! Speech adapters: transcription (OpenAI-compatible `/audio/transcriptions`)
//! and synthesis (ElevenLabs `/text-to-speech/{voice_id}`).

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use solace_domain::config::{SttConfig, TtsConfig, VoiceSettings};
use solace_domain::error::{Error, Result};
use solace_domain::stream::BoxStream;

use crate::util::{build_client, from_reqwest, AuthHeader};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one recording. `file_name` carries the container
    /// extension the provider uses to sniff the format.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and return the full encoded audio.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;

    /// Synthesize `text`, yielding encoded audio chunks as they arrive.
    async fn synthesize_stream(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    /// Pre-open pooled connections so the first real request skips the
    /// TLS handshake.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Voice used when the persona has none.
    fn default_voice(&self) -> Option<&str>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Whisper-style transcription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WhisperStt {
    url: String,
    model: String,
    language: Option<String>,
    auth: Option<AuthHeader>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: String,
}

impl WhisperStt {
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        Ok(Self {
            url: format!("{}/audio/transcriptions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            auth: AuthHeader::resolve(&cfg.auth, "Authorization", "Bearer ")?,
            client: build_client(5_000, Some(cfg.timeout_ms))?,
        })
    }
}

#[async_trait::async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio).file_name(file_name.to_string());
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(ref lang) = self.language {
            form = form.text("language", lang.clone());
        }

        let resp = AuthHeader::apply(self.auth.as_ref(), self.client.post(&self.url))
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "stt".into(),
                message: format!("HTTP {} - {}", status.as_u16(), body),
            });
        }

        let body: TranscriptionBody = resp.json().await.map_err(from_reqwest)?;
        Ok(body.text.trim().to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ElevenLabs synthesis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ElevenLabsTts {
    base_url: String,
    auth: Option<AuthHeader>,
    default_voice_id: Option<String>,
    model_id: Option<String>,
    output_format: String,
    voice: VoiceSettings,
    optimize_streaming_latency: Option<u8>,
    /// Whole-request timeout; used for buffered synthesis.
    client: reqwest::Client,
    /// Connect timeout only; used for streamed synthesis.
    stream_client: reqwest::Client,
}

const WARM_UP_HEADS: usize = 3;
const WARM_UP_TIMEOUT: Duration = Duration::from_secs(1);

impl ElevenLabsTts {
    pub fn from_config(cfg: &TtsConfig) -> Result<Self> {
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth: AuthHeader::resolve(&cfg.auth, "xi-api-key", "")?,
            default_voice_id: cfg.default_voice_id.clone(),
            model_id: cfg.model_id.clone(),
            output_format: cfg.output_format.clone(),
            voice: cfg.voice.clone(),
            optimize_streaming_latency: cfg.optimize_streaming_latency,
            client: build_client(cfg.connect_timeout_ms, Some(cfg.request_timeout_ms))?,
            stream_client: build_client(cfg.connect_timeout_ms, None)?,
        })
    }

    fn url(&self, voice_id: &str, stream: bool) -> String {
        let mut url = format!("{}/text-to-speech/{}", self.base_url, voice_id);
        if stream {
            url.push_str("/stream");
        }
        url.push_str(&format!("?output_format={}", self.output_format));
        if stream {
            if let Some(level) = self.optimize_streaming_latency {
                url.push_str(&format!("&optimize_streaming_latency={level}"));
            }
        }
        url
    }

    fn body(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "text": text,
            "voice_settings": self.voice,
        });
        if let Some(ref model) = self.model_id {
            body["model_id"] = json!(model);
        }
        body
    }

    fn accept(&self) -> &'static str {
        if self.output_format.starts_with("mp3") {
            "audio/mpeg"
        } else if self.output_format.starts_with("ulaw") {
            "audio/basic"
        } else {
            "audio/pcm"
        }
    }

    async fn post(
        &self,
        client: &reqwest::Client,
        text: &str,
        voice_id: &str,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let resp = AuthHeader::apply(self.auth.as_ref(), client.post(self.url(voice_id, stream)))
            .header("Content-Type", "application/json")
            .header("Accept", self.accept())
            .json(&self.body(text))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: "tts".into(),
                message: format!("HTTP {} - {}", status.as_u16(), body),
            });
        }
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let resp = self.post(&self.client, text, voice_id, false).await?;
        let bytes = resp.bytes().await.map_err(from_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice_id: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let resp = self.post(&self.stream_client, text, voice_id, true).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(from_reqwest));
        Ok(Box::pin(stream))
    }

    async fn warm_up(&self) -> Result<()> {
        for _ in 0..WARM_UP_HEADS {
            // Any response, even 4xx, means the pooled connection is up.
            let _ = self
                .stream_client
                .head(&self.base_url)
                .timeout(WARM_UP_TIMEOUT)
                .send()
                .await;
        }

        let Some(voice) = self.default_voice_id.clone() else {
            return Ok(());
        };
        let mut stream = self.synthesize_stream(".", &voice).await?;
        let mut total = 0usize;
        while let Some(chunk) = stream.next().await {
            total += chunk?.len();
        }
        tracing::debug!(bytes = total, "tts warm-up synthesis drained");
        Ok(())
    }

    fn default_voice(&self) -> Option<&str> {
        self.default_voice_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solace_domain::config::{AuthConfig, AuthMode};

    fn tts() -> ElevenLabsTts {
        let cfg = TtsConfig {
            auth: AuthConfig {
                mode: AuthMode::None,
                ..Default::default()
            },
            default_voice_id: Some("voice-1".into()),
            model_id: Some("eleven_turbo_v2".into()),
            ..Default::default()
        };
        ElevenLabsTts::from_config(&cfg).unwrap()
    }

    #[test]
    fn stream_url_carries_format_and_latency() {
        let t = tts();
        assert_eq!(
            t.url("abc", true),
            "https://api.elevenlabs.io/v1/text-to-speech/abc/stream?output_format=mp3_44100_128&optimize_streaming_latency=3"
        );
        assert_eq!(
            t.url("abc", false),
            "https://api.elevenlabs.io/v1/text-to-speech/abc?output_format=mp3_44100_128"
        );
    }

    #[test]
    fn body_includes_voice_settings_and_model() {
        let t = tts();
        let body = t.body("Hello.");
        assert_eq!(body["text"], "Hello.");
        assert_eq!(body["model_id"], "eleven_turbo_v2");
        assert_eq!(body["voice_settings"]["use_speaker_boost"], true);
        assert_eq!(t.accept(), "audio/mpeg");
        assert_eq!(t.default_voice(), Some("voice-1"));
    }

    #[test]
    fn whisper_url_is_derived_from_base() {
        let cfg = SttConfig {
            base_url: "http://localhost:9000/v1/".into(),
            auth: AuthConfig {
                mode: AuthMode::None,
                ..Default::default()
            },
            ..Default::default()
        };
        let stt = WhisperStt::from_config(&cfg).unwrap();
        assert_eq!(stt.url, "http://localhost:9000/v1/audio/transcriptions");
        assert_eq!(stt.model, "whisper-1");
    }
}
