use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How user text is mapped onto the fast or deep tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TierPolicy {
    /// Long inputs (more than `word_threshold` words) go deep.
    #[default]
    WordCount,
    /// Inputs with `sentence_threshold` or more sentences go deep.
    SentenceCount,
}

/// When assistant audio is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeechStrategy {
    /// Attach a playback locator; synthesize per sentence on request.
    #[default]
    Lazy,
    /// Synthesize the whole reply in the background and upload it.
    Eager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModel {
    /// `provider/model`
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default)]
    pub tier_policy: TierPolicy,
    #[serde(default = "d_6")]
    pub word_threshold: usize,
    #[serde(default = "d_2")]
    pub sentence_threshold: usize,
    #[serde(default = "d_fast")]
    pub fast: TierModel,
    #[serde(default = "d_deep")]
    pub deep: TierModel,
    #[serde(default = "d_07")]
    pub temperature: f32,
    /// Issue one continuation call for truncated replies.
    #[serde(default = "d_true")]
    pub continuation: bool,
    /// Non-voice replies are streamed and persisted progressively.
    #[serde(default = "d_true")]
    pub stream_text: bool,
    /// Minimum gap between progressive overwrites of `assistant_text`.
    #[serde(default = "d_250")]
    pub stream_flush_ms: u64,
    #[serde(default)]
    pub speech: SpeechStrategy,
    /// Externally reachable base URL used to build playback locators.
    #[serde(default = "d_public_base_url")]
    pub public_base_url: String,
    /// Register breathing, empty-chair and role-play exercise tools.
    #[serde(default = "d_true")]
    pub therapeutic_tools: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            tier_policy: TierPolicy::WordCount,
            word_threshold: d_6(),
            sentence_threshold: d_2(),
            fast: d_fast(),
            deep: d_deep(),
            temperature: d_07(),
            continuation: true,
            stream_text: true,
            stream_flush_ms: d_250(),
            speech: SpeechStrategy::Lazy,
            public_base_url: d_public_base_url(),
            therapeutic_tools: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Crisis handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisConfig {
    /// Used when the model supplies no usable hotline number.
    #[serde(default = "d_hotline")]
    pub default_hotline: String,
    #[serde(default = "d_recommendation")]
    pub default_recommendation: String,
    /// Force the crisis reply when the user text matches a self-harm
    /// pattern even if the model did not call the crisis tool.
    #[serde(default = "d_true")]
    pub keyword_safety_net: bool,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            default_hotline: d_hotline(),
            default_recommendation: d_recommendation(),
            keyword_safety_net: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_6() -> usize {
    6
}
fn d_2() -> usize {
    2
}
fn d_07() -> f32 {
    0.7
}
fn d_250() -> u64 {
    250
}
fn d_fast() -> TierModel {
    TierModel {
        model: "openai/gpt-3.5-turbo".into(),
        max_tokens: 120,
    }
}
fn d_deep() -> TierModel {
    TierModel {
        model: "openai/gpt-4-turbo".into(),
        max_tokens: 400,
    }
}
fn d_public_base_url() -> String {
    "http://127.0.0.1:8001".into()
}
fn d_hotline() -> String {
    "988".into()
}
fn d_recommendation() -> String {
    "Please reach out to a licensed therapist in person as soon as you can.".into()
}
