//! Edit and regenerate: rewind a conversation to one user turn and
//! reply to it again.

use chrono::Utc;

use solace_domain::error::{Error, Result};
use solace_domain::records::{ConversationPatch, MessagePatch, MessageRecord, SenderRole, StageStatus};
use solace_store::MessageFilter;

use super::dispatch::{Job, JobKind};
use crate::state::AppState;

/// Replace a user turn's text and reply to it again.
pub async fn edit_message(state: &AppState, message_id: &str, text: &str) -> Result<MessageRecord> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("transcription must not be empty".into()));
    }
    let row = load_user_row(state, message_id).await?;
    invalidate_later(state, &row).await?;

    state
        .store
        .update_conversation(
            &row.conversation_id,
            &ConversationPatch {
                needs_resummarization: Some(true),
                ..Default::default()
            },
        )
        .await?;

    let patch = MessagePatch {
        transcription: Some(text.to_owned()),
        transcription_status: Some(StageStatus::Done),
        edited_at: Some(Utc::now()),
        ..reset_patch()
    };
    rewind(state, row, patch).await
}

/// Drop every reply after a user turn and generate a fresh one.
pub async fn regenerate(state: &AppState, message_id: &str) -> Result<MessageRecord> {
    let row = load_user_row(state, message_id).await?;
    if row.turn_text().is_none() {
        return Err(Error::InvalidInput(format!("message {message_id} has no text yet")));
    }
    invalidate_later(state, &row).await?;
    rewind(state, row, reset_patch()).await
}

async fn load_user_row(state: &AppState, message_id: &str) -> Result<MessageRecord> {
    let row = state
        .store
        .get_message(message_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    if row.sender_role != SenderRole::User {
        return Err(Error::InvalidInput(format!("message {message_id} is not a user turn")));
    }
    Ok(row)
}

async fn invalidate_later(state: &AppState, row: &MessageRecord) -> Result<()> {
    let filter = MessageFilter::conversation(&row.conversation_id).after(row.created_at);
    let patch = MessagePatch {
        invalidated: Some(true),
        ..Default::default()
    };
    let n = state.store.update_messages(&filter, &patch).await?;
    tracing::debug!(message_id = %row.id, invalidated = n, "later turns invalidated");
    Ok(())
}

/// Clears the claim so the reply stage can run again.
fn reset_patch() -> MessagePatch {
    MessagePatch {
        ai_status: Some(StageStatus::Pending),
        ai_started: Some(false),
        invalidated: Some(false),
        ..Default::default()
    }
}

async fn rewind(state: &AppState, mut row: MessageRecord, patch: MessagePatch) -> Result<MessageRecord> {
    state.store.update_message(&row.id, &patch).await?;
    patch.apply(&mut row);
    tracing::info!(message_id = %row.id, conversation_id = %row.conversation_id, "turn rewound");
    state.jobs.submit(Job::new(JobKind::Reply, row.id.clone()));
    Ok(row)
}
