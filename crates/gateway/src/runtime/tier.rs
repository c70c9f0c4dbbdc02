//! Deterministic model-tier selection from the user's text.
//!
//! Pattern rules run first, in order:
//! 1. an "I feel" disclosure goes deep
//! 2. more than one sentence goes deep
//! 3. a definition question ("what is", "define") goes fast
//! 4. a why/how/explain question goes deep
//!
//! Anything else falls through to the configured [`TierPolicy`].

use serde::Serialize;

use solace_domain::config::{ReplyConfig, TierPolicy};

use super::sentences::sentence_count;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fast,
    Deep,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Deep => "deep",
        }
    }
}

/// A tier resolved to a concrete model and output budget.
#[derive(Debug, Clone, PartialEq)]
pub struct TierChoice {
    pub tier: Tier,
    /// `provider/model`
    pub model: String,
    pub max_tokens: u32,
}

const FEELING_CUES: &[&str] = &["i feel", "i'm feeling", "i am feeling", "i’m feeling"];
const DEFINITION_CUES: &[&str] = &["what is ", "what's ", "what’s ", "define "];
const REASONING_CUES: &[&str] = &["why ", "how ", "explain"];

pub fn classify(text: &str, cfg: &ReplyConfig) -> Tier {
    let lower = text.trim().to_lowercase();

    if FEELING_CUES.iter().any(|c| lower.contains(c)) {
        return Tier::Deep;
    }
    let sentences = sentence_count(&lower);
    if sentences > 1 {
        return Tier::Deep;
    }
    if DEFINITION_CUES.iter().any(|c| lower.starts_with(c)) || lower == "define" {
        return Tier::Fast;
    }
    if REASONING_CUES.iter().any(|c| lower.starts_with(c)) {
        return Tier::Deep;
    }

    let deep = match cfg.tier_policy {
        TierPolicy::WordCount => lower.split_whitespace().count() > cfg.word_threshold,
        TierPolicy::SentenceCount => sentences >= cfg.sentence_threshold,
    };
    if deep {
        Tier::Deep
    } else {
        Tier::Fast
    }
}

pub fn choose(text: &str, cfg: &ReplyConfig) -> TierChoice {
    let tier = classify(text, cfg);
    let model = match tier {
        Tier::Fast => &cfg.fast,
        Tier::Deep => &cfg.deep,
    };
    TierChoice {
        tier,
        model: model.model.clone(),
        max_tokens: model.max_tokens,
    }
}
