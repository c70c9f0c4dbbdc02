//! History summarizer: a short topic phrase stored as the conversation's
//! cross-session memory.

use solace_domain::error::{Error, Result};
use solace_domain::records::{ConversationPatch, SenderRole};
use solace_domain::tool::Message;
use solace_domain::trace::TraceEvent;
use solace_providers::ChatRequest;
use solace_store::MessageFilter;

use super::context::history_turns;
use super::prompts;
use crate::state::AppState;

/// Summarize and store. Returns `Ok(None)` when the conversation has too
/// few assistant turns or the model produced nothing usable.
pub async fn summarize_conversation(state: &AppState, conversation_id: &str) -> Result<Option<String>> {
    let cfg = &state.config.summarizer;

    let rows = state
        .store
        .select_messages(&MessageFilter::conversation(conversation_id).visible())
        .await?;
    let assistant_turns = rows
        .iter()
        .filter(|r| r.sender_role == SenderRole::Assistant)
        .count();
    if assistant_turns < cfg.min_assistant_turns {
        tracing::debug!(
            conversation_id,
            assistant_turns,
            "too few assistant turns to summarize"
        );
        return Ok(None);
    }

    let (provider, model) = state.llm.resolve(&cfg.model)?;
    let mut messages = vec![Message::system(prompts::TOPIC_SUMMARIZER)];
    messages.extend(history_turns(&rows));

    let req = ChatRequest {
        messages,
        temperature: Some(cfg.temperature),
        max_tokens: Some(cfg.max_tokens),
        model: Some(model),
        ..Default::default()
    };
    let resp = provider.chat(&req).await?;

    let summary = clean_summary(&resp.content, cfg.max_words);
    if summary.is_empty() {
        tracing::warn!(conversation_id, "summarizer returned no usable text");
        return Ok(None);
    }

    state
        .store
        .update_conversation(
            conversation_id,
            &ConversationPatch {
                memory_summary: Some(Some(summary.clone())),
                ..Default::default()
            },
        )
        .await?;

    TraceEvent::SummaryStored {
        conversation_id: conversation_id.to_owned(),
        assistant_turns,
        summary_chars: summary.len(),
    }
    .emit();
    Ok(Some(summary))
}

/// Like [`summarize_conversation`] but checks the conversation exists
/// first, for callers acting on a client-supplied id.
pub async fn summarize_existing(state: &AppState, conversation_id: &str) -> Result<Option<String>> {
    if state.store.get_conversation(conversation_id).await?.is_none() {
        return Err(Error::NotFound(format!("conversation {conversation_id}")));
    }
    summarize_conversation(state, conversation_id).await
}

const ARTICLES: [&str; 3] = ["the ", "an ", "a "];

/// Normalize model output into a bare topic phrase: no surrounding
/// quotes, no terminal punctuation, no leading article, at most
/// `max_words` words.
pub fn clean_summary(raw: &str, max_words: usize) -> String {
    let quotes: &[char] = &['"', '\'', '`', '“', '”', '‘', '’'];
    let mut s = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    s = s.trim_start_matches(['-', '•', '*', ' ']);
    s = s.trim_matches(quotes).trim();
    s = s.trim_end_matches(['.', '!', '?', ',', ';', ':', '…']).trim_end();
    s = s.trim_matches(quotes).trim();

    let lower = s.to_lowercase();
    if let Some(article) = ARTICLES.iter().find(|a| lower.starts_with(*a)) {
        s = s[article.len()..].trim_start();
    }

    s.split_whitespace()
        .take(max_words.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}
