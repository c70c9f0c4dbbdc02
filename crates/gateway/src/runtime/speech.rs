//! Speech synthesis: eager upload of the whole reply, or lazy playback
//! one sentence at a time.

use futures_util::StreamExt;

use solace_domain::error::{Error, Result};
use solace_domain::records::{MessagePatch, MessageRecord, SenderRole, StageStatus};
use solace_domain::stream::BoxStream;

use super::dispatch::Outcome;
use super::sentences;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Eager stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synthesize and upload a finished assistant reply.
///
/// Failures never surface as `error`: the row is forced to `done` and
/// the client falls back to text.
pub async fn run(state: &AppState, message_id: &str) -> Outcome {
    let row = match state.store.get_message(message_id).await {
        Ok(Some(row)) => row,
        Ok(None) => return Outcome::Skipped("message gone"),
        Err(e) => {
            tracing::warn!(message_id, error = %e, "speech: load failed");
            return Outcome::Skipped("load failed");
        }
    };
    if row.sender_role != SenderRole::Assistant || row.tts_status != Some(StageStatus::Pending) {
        return Outcome::Skipped("not awaiting speech");
    }

    let patch = match synthesize_and_upload(state, &row).await {
        Ok(Some(path)) => {
            tracing::info!(message_id, tts_path = %path, "speech uploaded");
            MessagePatch {
                tts_status: Some(StageStatus::Done),
                tts_path: Some(path),
                ..Default::default()
            }
        }
        Ok(None) => MessagePatch::tts_status(StageStatus::Done),
        Err(e) => {
            tracing::warn!(message_id, error = %e, "speech failed; falling back to text");
            MessagePatch::tts_status(StageStatus::Done)
        }
    };

    if let Err(e) = state.store.update_message(message_id, &patch).await {
        tracing::error!(message_id, error = %e, "failed to record tts_status");
        return Outcome::Failed(e.to_string());
    }
    Outcome::Completed(None)
}

/// `Ok(None)` when there is nothing to speak (voice off or no text).
async fn synthesize_and_upload(state: &AppState, row: &MessageRecord) -> Result<Option<String>> {
    let conversation = state
        .store
        .get_conversation(&row.conversation_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("conversation {}", row.conversation_id)))?;
    if !conversation.voice_enabled {
        return Ok(None);
    }
    let Some(text) = row.assistant_text.as_deref().filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };

    let voice = resolve_voice(state, conversation.therapist_id.as_deref())
        .await
        .ok_or_else(|| Error::Config("no synthesis voice configured".into()))?;
    let audio = state.tts.synthesize(&sentences::sanitize(text), &voice).await?;

    let path = format!("{}/{}.mp3", row.conversation_id, row.id);
    state
        .blobs
        .upload(&state.config.store.tts_audio_bucket, &path, audio, "audio/mpeg")
        .await?;
    Ok(Some(path))
}

/// The persona's voice, falling back to the provider default.
pub async fn resolve_voice(state: &AppState, therapist_id: Option<&str>) -> Option<String> {
    if let Some(id) = therapist_id {
        match state.store.persona_voice(id).await {
            Ok(Some(voice)) if !voice.is_empty() => return Some(voice),
            Ok(_) => {}
            Err(e) => tracing::warn!(therapist_id = id, error = %e, "persona voice lookup failed"),
        }
    }
    state.tts.default_voice().map(str::to_owned)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lazy playback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("message {0} has no assistant text")]
    NotFound(String),

    #[error("snippet {index} out of range ({count} available)")]
    OutOfRange { index: usize, count: usize },

    #[error("voice mode is off for this conversation")]
    VoiceDisabled,

    #[error("no synthesis voice configured")]
    NoVoice,

    #[error("store: {0}")]
    Store(Error),

    #[error("speech provider: {0}")]
    Upstream(Error),
}

impl PlaybackError {
    /// Errors the client caused and can fix.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::NotFound(_) | PlaybackError::OutOfRange { .. } | PlaybackError::VoiceDisabled
        )
    }
}

/// One sentence, ready to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub message_id: String,
    pub index: usize,
    pub count: usize,
    pub text: String,
    pub voice: String,
}

impl Snippet {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }
}

/// Validate a playback request. Checks run in order: text, range, voice
/// mode, voice resolution.
pub async fn prepare_snippet(
    state: &AppState,
    message_id: &str,
    index: usize,
) -> std::result::Result<Snippet, PlaybackError> {
    let row = state
        .store
        .get_message(message_id)
        .await
        .map_err(PlaybackError::Store)?
        .filter(|r| r.sender_role == SenderRole::Assistant)
        .ok_or_else(|| PlaybackError::NotFound(message_id.to_owned()))?;
    let text = row
        .assistant_text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PlaybackError::NotFound(message_id.to_owned()))?;

    let mut parts = sentences::snippets(text);
    let count = parts.len();
    if index >= count {
        return Err(PlaybackError::OutOfRange { index, count });
    }

    let conversation = state
        .store
        .get_conversation(&row.conversation_id)
        .await
        .map_err(PlaybackError::Store)?;
    let Some(conversation) = conversation.filter(|c| c.voice_enabled) else {
        return Err(PlaybackError::VoiceDisabled);
    };

    let voice = resolve_voice(state, conversation.therapist_id.as_deref())
        .await
        .ok_or(PlaybackError::NoVoice)?;

    Ok(Snippet {
        message_id: row.id,
        index,
        count,
        text: parts.swap_remove(index),
        voice,
    })
}

/// Open the provider stream for a snippet. After the last snippet has
/// streamed in full the row's `tts_status` becomes `done`.
pub async fn stream_snippet(
    state: &AppState,
    snippet: Snippet,
) -> std::result::Result<BoxStream<'static, Result<Vec<u8>>>, PlaybackError> {
    let upstream = state
        .tts
        .synthesize_stream(&snippet.text, &snippet.voice)
        .await
        .map_err(PlaybackError::Upstream)?;

    if !snippet.is_last() {
        return Ok(upstream);
    }

    let state = state.clone();
    let message_id = snippet.message_id;
    Ok(Box::pin(async_stream::stream! {
        let mut upstream = upstream;
        let mut failed = false;
        while let Some(chunk) = upstream.next().await {
            failed |= chunk.is_err();
            yield chunk;
        }
        if !failed {
            let patch = MessagePatch::tts_status(StageStatus::Done);
            match state.store.update_message(&message_id, &patch).await {
                Ok(()) => tracing::debug!(message_id = %message_id, "final snippet served"),
                Err(e) => tracing::warn!(message_id = %message_id, error = %e, "failed to mark speech done"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_classified() {
        assert!(PlaybackError::VoiceDisabled.is_client_error());
        assert!(PlaybackError::OutOfRange { index: 5, count: 2 }.is_client_error());
        assert!(!PlaybackError::NoVoice.is_client_error());
        assert!(!PlaybackError::Upstream(Error::Timeout("tts".into())).is_client_error());
    }

    #[test]
    fn last_snippet() {
        let s = Snippet {
            message_id: "m".into(),
            index: 1,
            count: 2,
            text: "Rest.".into(),
            voice: "v".into(),
        };
        assert!(s.is_last());
    }
}
