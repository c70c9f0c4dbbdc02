//! Context builder: the bounded prompt for one reply.
//!
//! Layout: persona + examples, an optional memory line, then the visible
//! history. History longer than the window is split; everything older
//! than the newest `window` turns collapses into one summary turn.

use solace_domain::error::Result;
use solace_domain::records::{ConversationPatch, ConversationRecord, MessageRecord, SenderRole};
use solace_domain::tool::Message;
use solace_domain::trace::TraceEvent;
use solace_providers::ChatRequest;
use solace_store::MessageFilter;

use super::prompts;
use crate::state::AppState;

/// Map stored rows onto prompt turns. Rows without text are skipped.
pub fn history_turns(rows: &[MessageRecord]) -> Vec<Message> {
    rows.iter()
        .filter_map(|row| {
            let text = row.turn_text()?;
            Some(match row.sender_role {
                SenderRole::User => Message::user(text),
                SenderRole::Assistant => Message::assistant(text),
            })
        })
        .collect()
}

/// Split turns into `(older, newest)` where `newest` holds at most
/// `window` turns.
pub fn split_window(turns: &[Message], window: usize) -> (&[Message], &[Message]) {
    let keep_from = turns.len().saturating_sub(window);
    turns.split_at(keep_from)
}

/// Assemble the prompt from its parts.
pub fn assemble(
    voice: bool,
    memory: Option<&str>,
    turns: &[Message],
    window: usize,
    summary: Option<&str>,
) -> Vec<Message> {
    let mut messages = prompts::preamble(voice);
    if let Some(memory) = memory.filter(|m| !m.trim().is_empty()) {
        if turns.is_empty() {
            messages.push(Message::assistant(prompts::memory_line(memory.trim())));
        }
    }

    let (older, newest) = split_window(turns, window);
    if !older.is_empty() {
        if let Some(summary) = summary {
            messages.push(Message::assistant(prompts::summary_turn(summary)));
        }
    }
    messages.extend_from_slice(newest);
    messages
}

/// Build the reply prompt for a conversation.
///
/// A pending re-summarization request discards the stored memory first.
pub async fn build(
    state: &AppState,
    conversation: &ConversationRecord,
    voice: bool,
) -> Result<Vec<Message>> {
    let mut memory = conversation.memory_summary.clone();
    if conversation.needs_resummarization {
        state
            .store
            .update_conversation(
                &conversation.id,
                &ConversationPatch {
                    memory_summary: Some(None),
                    needs_resummarization: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        memory = None;
        tracing::debug!(conversation_id = %conversation.id, "cleared stale memory");
    }

    let rows = state
        .store
        .select_messages(&MessageFilter::conversation(&conversation.id).visible())
        .await?;
    let turns = history_turns(&rows);
    let window = state.config.context.window;

    let (older, _) = split_window(&turns, window);
    let summary = if older.is_empty() {
        None
    } else {
        summarize_older(state, voice, older).await
    };

    let messages = assemble(voice, memory.as_deref(), &turns, window, summary.as_deref());

    TraceEvent::ContextBuilt {
        conversation_id: conversation.id.clone(),
        history_turns: turns.len(),
        rolled_up_turns: older.len(),
        prompt_messages: messages.len(),
        memory_used: memory.is_some() && turns.is_empty(),
    }
    .emit();

    Ok(messages)
}

/// One model call condensing the turns that fall outside the window.
/// Failure drops the older turns instead of failing the reply.
async fn summarize_older(state: &AppState, voice: bool, older: &[Message]) -> Option<String> {
    let cfg = &state.config.context;
    let (provider, model) = match state.llm.resolve(&cfg.summary_model) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "rolling summary model unavailable");
            return None;
        }
    };

    let mut messages = prompts::preamble(voice);
    messages.extend_from_slice(older);
    messages.push(Message::user(prompts::ROLLING_SUMMARY_REQUEST));

    let req = ChatRequest {
        messages,
        temperature: Some(cfg.summary_temperature),
        max_tokens: Some(cfg.summary_max_tokens),
        model: Some(model),
        ..Default::default()
    };
    match provider.chat(&req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Some(resp.content.trim().to_owned()),
        Ok(_) => {
            tracing::warn!("rolling summary came back empty");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "rolling summary failed; older turns dropped");
            None
        }
    }
}
