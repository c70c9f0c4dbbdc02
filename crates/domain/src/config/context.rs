use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Prompt assembly and the in-session rolling summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Most recent turns kept verbatim. Older turns are rolled into one
    /// summary turn.
    #[serde(default = "d_10")]
    pub window: usize,
    /// Model spec (`provider/model`) for the rolling summary.
    #[serde(default = "d_fast_model")]
    pub summary_model: String,
    #[serde(default = "d_03")]
    pub summary_temperature: f32,
    #[serde(default = "d_200")]
    pub summary_max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window: d_10(),
            summary_model: d_fast_model(),
            summary_temperature: d_03(),
            summary_max_tokens: d_200(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-session memory summarizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Conversations with fewer assistant turns are not summarized.
    #[serde(default = "d_4")]
    pub min_assistant_turns: usize,
    /// Hard cap on words in the stored topic phrase.
    #[serde(default = "d_12")]
    pub max_words: usize,
    #[serde(default = "d_fast_model")]
    pub model: String,
    #[serde(default = "d_05")]
    pub temperature: f32,
    #[serde(default = "d_30")]
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            min_assistant_turns: d_4(),
            max_words: d_12(),
            model: d_fast_model(),
            temperature: d_05(),
            max_tokens: d_30(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_10() -> usize {
    10
}
fn d_4() -> usize {
    4
}
fn d_12() -> usize {
    12
}
fn d_fast_model() -> String {
    "openai/gpt-3.5-turbo".into()
}
fn d_03() -> f32 {
    0.3
}
fn d_05() -> f32 {
    0.5
}
fn d_200() -> u32 {
    200
}
fn d_30() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_defaults_to_ten() {
        let cfg: ContextConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.window, 10);
        assert_eq!(cfg.summary_max_tokens, 200);
    }

    #[test]
    fn summarizer_threshold_defaults_to_four() {
        let cfg: SummarizerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.min_assistant_turns, 4);
        assert_eq!(cfg.max_words, 12);
        assert_eq!(cfg.max_tokens, 30);
    }
}
