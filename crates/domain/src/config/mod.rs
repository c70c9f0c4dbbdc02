mod context;
mod dispatch;
mod llm;
mod observability;
mod reply;
mod server;
mod speech;
mod store;

pub use context::*;
pub use dispatch::*;
pub use llm::*;
pub use observability::*;
pub use reply::*;
pub use server::*;
pub use speech::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub crisis: CrisisConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

/// Split a `provider/model` spec. Returns `None` when either half is empty.
pub fn split_model_spec(spec: &str) -> Option<(&str, &str)> {
    let (provider, model) = spec.split_once('/')?;
    if provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // ── LLM providers ────────────────────────────────────────────
        if self.llm.providers.is_empty() {
            errors.push(ConfigError::warning("llm.providers", "no LLM providers configured"));
        }
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() || provider.id.contains('/') {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    "provider id must be non-empty and must not contain '/'",
                ));
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].base_url"),
                    "provider base_url must not be empty",
                ));
            }
        }

        // ── Model specs must name a configured provider ──────────────
        let specs = [
            ("reply.fast.model", self.reply.fast.model.as_str()),
            ("reply.deep.model", self.reply.deep.model.as_str()),
            ("context.summary_model", self.context.summary_model.as_str()),
            ("summarizer.model", self.summarizer.model.as_str()),
        ];
        for (field, spec) in specs {
            match split_model_spec(spec) {
                None => errors.push(ConfigError::error(
                    field,
                    format!("\"{spec}\" is not of the form provider/model"),
                )),
                Some((provider, _)) => {
                    if !self.llm.providers.iter().any(|p| p.id == provider) {
                        errors.push(ConfigError::warning(
                            field,
                            format!("provider \"{provider}\" is not configured"),
                        ));
                    }
                }
            }
        }

        // ── Store ────────────────────────────────────────────────────
        if self.store.backend == StoreBackend::Supabase && self.store.url.is_empty() {
            errors.push(ConfigError::error(
                "store.url",
                "url is required for the supabase backend",
            ));
        }
        if self.store.signed_url_ttl_secs == 0 {
            errors.push(ConfigError::error(
                "store.signed_url_ttl_secs",
                "signed links must live at least one second",
            ));
        }

        // ── Pipeline ─────────────────────────────────────────────────
        if self.dispatch.workers == 0 {
            errors.push(ConfigError::error("dispatch.workers", "must be greater than 0"));
        }
        if self.dispatch.queue_capacity == 0 {
            errors.push(ConfigError::error(
                "dispatch.queue_capacity",
                "must be greater than 0",
            ));
        }
        if self.dispatch.poll_interval_secs == 0 && !self.dispatch.push {
            errors.push(ConfigError::warning(
                "dispatch",
                "poll and push are both disabled; only the startup sweep will dispatch work",
            ));
        }
        if self.context.window == 0 {
            errors.push(ConfigError::error("context.window", "must be greater than 0"));
        }
        if self.summarizer.min_assistant_turns == 0 {
            errors.push(ConfigError::error(
                "summarizer.min_assistant_turns",
                "must be greater than 0",
            ));
        }
        if self.reaper.enabled && self.reaper.interval_secs == 0 {
            errors.push(ConfigError::error(
                "reaper.interval_secs",
                "must be greater than 0 when the reaper is enabled",
            ));
        }

        // ── Speech ───────────────────────────────────────────────────
        if self.reply.speech == SpeechStrategy::Lazy && self.reply.public_base_url.is_empty() {
            errors.push(ConfigError::error(
                "reply.public_base_url",
                "required to build playback locators for the lazy speech strategy",
            ));
        }
        if self.speech.tts.default_voice_id.is_none() {
            errors.push(ConfigError::warning(
                "speech.tts.default_voice_id",
                "no default voice; voice replies for personas without a voice will fail",
            ));
        }
        if self.crisis.default_hotline.trim().is_empty() {
            errors.push(ConfigError::error(
                "crisis.default_hotline",
                "must not be empty",
            ));
        }

        errors
    }
}
