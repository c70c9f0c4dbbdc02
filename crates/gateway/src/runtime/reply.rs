//! Reply generation: claim the user turn, build the prompt, call the
//! model with tools, and persist exactly one assistant row.

use std::time::{Duration, Instant};

use futures_util::StreamExt;

use solace_domain::config::SpeechStrategy;
use solace_domain::error::{Error, Result};
use solace_domain::records::{
    ConversationRecord, MessagePatch, MessageRecord, NewMessage, SenderRole, StageStatus,
};
use solace_domain::stream::StreamEvent;
use solace_domain::tool::{Message, ToolCall};
use solace_domain::trace::TraceEvent;
use solace_providers::{ChatRequest, ChatResponse, LlmProvider};

use super::dispatch::{Job, JobKind, Outcome};
use super::sentences::ends_with_terminal;
use super::tier;
use super::tools::{self, Rendered};
use super::{context, prompts};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the reply stage for one user row.
pub async fn run(state: &AppState, message_id: &str) -> Outcome {
    let row = match state.store.get_message(message_id).await {
        Ok(Some(row)) => row,
        Ok(None) => return Outcome::Skipped("message gone"),
        Err(e) => {
            tracing::warn!(message_id, error = %e, "reply: load failed");
            return Outcome::Skipped("load failed");
        }
    };
    if !awaiting_reply(&row) {
        return Outcome::Skipped("not awaiting reply");
    }

    // The claim gates everything below, including every external call.
    let won = match state.store.claim_message(message_id).await {
        Ok(won) => won,
        Err(e) => {
            tracing::warn!(message_id, error = %e, "reply: claim failed");
            return Outcome::Skipped("claim failed");
        }
    };
    TraceEvent::MessageClaimed {
        message_id: message_id.to_owned(),
        won,
    }
    .emit();
    if !won {
        return Outcome::Skipped("claimed elsewhere");
    }

    let mut draft = Draft::default();
    match generate(state, &row, &mut draft).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(message_id, error = %e, "reply generation failed");
            if let Some(ref id) = draft.row_id {
                retract(state, id, Some(StageStatus::Error)).await;
            }
            if superseded(state, &row).await {
                return requeue(&row);
            }
            mark_user(state, message_id, StageStatus::Error).await;
            Outcome::Failed(e.to_string())
        }
    }
}

fn awaiting_reply(row: &MessageRecord) -> bool {
    row.sender_role == SenderRole::User
        && !row.ai_started
        && !row.invalidated
        && row.transcription_status == Some(StageStatus::Done)
        && row.ai_status == Some(StageStatus::Pending)
}

/// Whether the user turn was edited, regenerated or hidden since it was
/// claimed. A result computed for the old turn must not be kept.
async fn superseded(state: &AppState, claimed: &MessageRecord) -> bool {
    match state.store.get_message(&claimed.id).await {
        Ok(Some(now)) => {
            !now.ai_started
                || now.invalidated
                || now.edited_at != claimed.edited_at
                || now.transcription != claimed.transcription
        }
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(message_id = %claimed.id, error = %e, "reply: re-read failed");
            false
        }
    }
}

fn requeue(row: &MessageRecord) -> Outcome {
    tracing::info!(message_id = %row.id, "turn changed during reply; dropping result");
    Outcome::Requeued(Job::new(JobKind::Reply, row.id.clone()))
}

/// Hide an assistant row written by this attempt from every later prompt.
/// A retracted row is never spoken, so its speech stage closes as `done`.
async fn retract(state: &AppState, row_id: &str, ai_status: Option<StageStatus>) {
    let patch = MessagePatch {
        invalidated: Some(true),
        ai_status,
        tts_status: Some(StageStatus::Done),
        ..Default::default()
    };
    if let Err(e) = state.store.update_message(row_id, &patch).await {
        tracing::error!(assistant_id = row_id, error = %e, "failed to retract assistant row");
    }
}

async fn mark_user(state: &AppState, message_id: &str, status: StageStatus) {
    if let Err(e) = state
        .store
        .update_message(message_id, &MessagePatch::ai_status(status))
        .await
    {
        tracing::error!(message_id, status = status.as_str(), error = %e, "failed to record ai_status");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The model's answer before rendering.
#[derive(Debug, Default)]
struct Draft {
    text: String,
    tool_calls: Vec<ToolCall>,
    truncated: bool,
    /// Assistant row written so far by this attempt.
    row_id: Option<String>,
}

async fn generate(
    state: &AppState,
    user_row: &MessageRecord,
    draft: &mut Draft,
) -> Result<Outcome> {
    let cfg = &state.config;
    let conversation = state
        .store
        .get_conversation(&user_row.conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("conversation {}", user_row.conversation_id)))?;

    if conversation.ended {
        tracing::info!(message_id = %user_row.id, "conversation already ended; no reply");
        mark_user(state, &user_row.id, StageStatus::NotApplicable).await;
        return Ok(Outcome::Completed(None));
    }

    let voice = conversation.voice_enabled;
    let user_text = user_row.transcription.as_deref().unwrap_or("").trim().to_owned();
    let prompt = context::build(state, &conversation, voice).await?;

    let choice = tier::choose(&user_text, &cfg.reply);
    TraceEvent::TierSelected {
        message_id: user_row.id.clone(),
        tier: choice.tier.as_str().into(),
        model: choice.model.clone(),
        max_tokens: choice.max_tokens,
    }
    .emit();

    let at_risk = cfg.crisis.keyword_safety_net && tools::mentions_self_harm(&user_text);
    let progressive = !voice && cfg.reply.stream_text && !at_risk;

    let (provider, model) = state.llm.resolve(&choice.model)?;
    let req = ChatRequest {
        messages: prompt.clone(),
        tools: tools::definitions(cfg.reply.therapeutic_tools),
        temperature: Some(cfg.reply.temperature),
        max_tokens: Some(choice.max_tokens),
        model: Some(model.clone()),
    };

    if progressive {
        stream_draft(state, provider.as_ref(), &req, &conversation, draft).await?;
    } else {
        let resp = timed_chat(provider.as_ref(), &req, &model, "reply").await?;
        draft.truncated = resp.truncated();
        draft.text = resp.content;
        draft.tool_calls = resp.tool_calls;
    }

    let final_text = match tools::render(&draft.tool_calls, &cfg.crisis) {
        Some(Rendered::Crisis(text)) => {
            TraceEvent::CrisisResponse {
                message_id: user_row.id.clone(),
                via_tool: true,
            }
            .emit();
            text
        }
        Some(Rendered::Exercise(text)) => match draft.text.trim() {
            "" => text,
            preface => format!("{preface}\n\n{text}"),
        },
        None if at_risk => {
            TraceEvent::CrisisResponse {
                message_id: user_row.id.clone(),
                via_tool: false,
            }
            .emit();
            tools::crisis_message("", "", &cfg.crisis)
        }
        None => {
            let mut text = draft.text.trim().to_owned();
            if text.is_empty() {
                return Err(Error::Provider {
                    provider: provider.provider_id().to_owned(),
                    message: "empty reply".into(),
                });
            }
            if cfg.reply.continuation && (draft.truncated || !ends_with_terminal(&text)) {
                let reason = if draft.truncated { "length" } else { "unterminated" };
                TraceEvent::ContinuationIssued {
                    message_id: user_row.id.clone(),
                    reason: reason.into(),
                }
                .emit();
                text = continue_reply(provider.as_ref(), &req, &text, &model).await;
            }
            text
        }
    };

    if superseded(state, user_row).await {
        if let Some(ref id) = draft.row_id {
            retract(state, id, Some(StageStatus::Error)).await;
        }
        return Ok(requeue(user_row));
    }
    let assistant_id = persist(state, &conversation, draft, final_text, voice).await?;
    if superseded(state, user_row).await {
        retract(state, &assistant_id, None).await;
        return Ok(requeue(user_row));
    }
    mark_user(state, &user_row.id, StageStatus::Done).await;

    tracing::info!(
        message_id = %user_row.id,
        assistant_id = %assistant_id,
        tier = choice.tier.as_str(),
        voice,
        "assistant reply stored"
    );

    let follow_up = (voice && cfg.reply.speech == SpeechStrategy::Eager)
        .then(|| Job::new(JobKind::Synthesize, assistant_id));
    Ok(Outcome::Completed(follow_up))
}

async fn timed_chat(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    model: &str,
    purpose: &str,
) -> Result<ChatResponse> {
    let started = Instant::now();
    let resp = provider.chat(req).await?;
    TraceEvent::LlmRequest {
        provider: provider.provider_id().to_owned(),
        model: model.to_owned(),
        purpose: purpose.to_owned(),
        streaming: false,
        duration_ms: started.elapsed().as_millis() as u64,
        prompt_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens),
        completion_tokens: resp.usage.as_ref().map(|u| u.completion_tokens),
    }
    .emit();
    Ok(resp)
}

/// Exactly one extra call; a failed continuation keeps the partial text.
async fn continue_reply(
    provider: &dyn LlmProvider,
    base: &ChatRequest,
    partial: &str,
    model: &str,
) -> String {
    let mut messages = base.messages.clone();
    messages.push(Message::assistant(partial));
    messages.push(Message::user(prompts::CONTINUATION_REQUEST));
    let req = ChatRequest {
        messages,
        tools: Vec::new(),
        ..base.clone()
    };

    match timed_chat(provider, &req, model, "continuation").await {
        Ok(resp) => join_continuation(partial, &resp.content),
        Err(e) => {
            tracing::warn!(error = %e, "continuation failed; keeping partial reply");
            partial.to_owned()
        }
    }
}

/// Concatenate, adding a space unless the partial already ends in
/// whitespace or the continuation starts with punctuation.
pub fn join_continuation(partial: &str, more: &str) -> String {
    let more = more.trim();
    if more.is_empty() {
        return partial.to_owned();
    }
    let glue = if partial.ends_with(char::is_whitespace)
        || more.starts_with(|c: char| matches!(c, ',' | '.' | ';' | ':' | '!' | '?'))
    {
        ""
    } else {
        " "
    };
    format!("{partial}{glue}{more}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progressive (non-voice) streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the reply, inserting the assistant row on the first flush and
/// overwriting its text at most every `stream_flush_ms`.
async fn stream_draft(
    state: &AppState,
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    conversation: &ConversationRecord,
    draft: &mut Draft,
) -> Result<()> {
    let flush_every = Duration::from_millis(state.config.reply.stream_flush_ms);
    let started = Instant::now();
    let mut stream = provider.chat_stream(req).await?;

    let mut flushed_len = 0usize;
    let mut last_flush = Instant::now();
    let mut usage = None;

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Token { text } => {
                draft.text.push_str(&text);
                // Once a tool call shows up the row waits for the rendered text.
                if draft.tool_calls.is_empty()
                    && last_flush.elapsed() >= flush_every
                    && draft.text.trim().len() > flushed_len
                {
                    flush_partial(state, conversation, draft).await?;
                    flushed_len = draft.text.trim().len();
                    last_flush = Instant::now();
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => draft.tool_calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            }),
            StreamEvent::Done {
                usage: u,
                finish_reason,
            } => {
                usage = u;
                draft.truncated = finish_reason.as_deref() == Some("length");
                break;
            }
            StreamEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: provider.provider_id().to_owned(),
                    message,
                });
            }
            StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
        }
    }

    TraceEvent::LlmRequest {
        provider: provider.provider_id().to_owned(),
        model: req.model.clone().unwrap_or_default(),
        purpose: "reply".into(),
        streaming: true,
        duration_ms: started.elapsed().as_millis() as u64,
        prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
        completion_tokens: usage.as_ref().map(|u| u.completion_tokens),
    }
    .emit();
    Ok(())
}

async fn flush_partial(
    state: &AppState,
    conversation: &ConversationRecord,
    draft: &mut Draft,
) -> Result<()> {
    let text = draft.text.trim().to_owned();
    match draft.row_id {
        Some(ref id) => {
            state
                .store
                .update_message(
                    id,
                    &MessagePatch {
                        assistant_text: Some(text),
                        ..Default::default()
                    },
                )
                .await
        }
        None => {
            let mut new = NewMessage::assistant(&conversation.id, text, StageStatus::Done);
            new.ai_status = Some(StageStatus::Pending);
            let row = state.store.insert_message(new).await?;
            draft.row_id = Some(row.id);
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write the final assistant row and return its id.
///
/// - progressive rows get a final overwrite and `ai_status=done`
/// - voice rows start with `tts_status=pending`; lazy ones are inserted
///   with their playback locator already set
async fn persist(
    state: &AppState,
    conversation: &ConversationRecord,
    draft: &mut Draft,
    text: String,
    voice: bool,
) -> Result<String> {
    if let Some(id) = draft.row_id.clone() {
        state
            .store
            .update_message(
                &id,
                &MessagePatch {
                    assistant_text: Some(text),
                    ai_status: Some(StageStatus::Done),
                    ..Default::default()
                },
            )
            .await?;
        return Ok(id);
    }

    let tts_status = if voice {
        StageStatus::Pending
    } else {
        StageStatus::Done
    };
    let mut new = NewMessage::assistant(&conversation.id, text, tts_status);
    if voice && state.config.reply.speech == SpeechStrategy::Lazy {
        let id = uuid::Uuid::new_v4().to_string();
        new.snippet_url = Some(snippet_locator(&state.config.reply.public_base_url, &id));
        new = new.with_id(id);
    }
    let row = state.store.insert_message(new).await?;
    draft.row_id = Some(row.id.clone());
    Ok(row.id)
}

/// Playback locator for a lazily synthesized reply; clients append
/// `?snippet=N`.
pub fn snippet_locator(public_base_url: &str, message_id: &str) -> String {
    format!(
        "{}/v1/tts-stream/{message_id}",
        public_base_url.trim_end_matches('/')
    )
}
