use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// TCP/TLS connect timeout for provider calls.
    #[serde(default = "d_5000u")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for non-streaming calls. Streaming calls only
    /// use the connect timeout.
    #[serde(default = "d_120000u")]
    pub request_timeout_ms: u64,
    /// Startup policy for LLM providers.
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
    /// Registered LLM providers. Model specs elsewhere in the config use the
    /// form `"provider_id/model_name"`.
    #[serde(default = "d_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: d_5000u(),
            request_timeout_ms: d_120000u(),
            startup_policy: LlmStartupPolicy::AllowNone,
            providers: d_providers(),
        }
    }
}

/// Controls how startup handles LLM providers that fail to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Boot even if no provider initializes. Reply generation marks rows
    /// `error` until credentials are configured.
    #[default]
    AllowNone,
    /// Abort startup if no provider initializes.
    RequireOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    AzureOpenai,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name (e.g. "Authorization", "xi-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for local setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

impl AuthConfig {
    pub fn from_env(var: &str) -> Self {
        Self {
            env: Some(var.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    None,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5000u() -> u64 {
    5_000
}
fn d_120000u() -> u64 {
    120_000
}
fn d_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        id: "openai".into(),
        kind: ProviderKind::OpenaiCompat,
        base_url: "https://api.openai.com/v1".into(),
        auth: AuthConfig::from_env("OPENAI_API_KEY"),
        default_model: Some("gpt-4-turbo".into()),
    }]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
