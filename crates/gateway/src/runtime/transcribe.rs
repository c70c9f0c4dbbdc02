//! Transcription stage: recorded user turn -> text.

use solace_domain::error::{Error, Result};
use solace_domain::records::{MessagePatch, MessageRecord, SenderRole, StageStatus};

use super::dispatch::{Job, JobKind, Outcome};
use crate::state::AppState;

pub async fn run(state: &AppState, message_id: &str) -> Outcome {
    let row = match state.store.get_message(message_id).await {
        Ok(Some(row)) => row,
        Ok(None) => return Outcome::Skipped("message gone"),
        Err(e) => {
            tracing::warn!(message_id, error = %e, "transcribe: load failed");
            return Outcome::Skipped("load failed");
        }
    };
    if row.sender_role != SenderRole::User
        || row.transcription_status != Some(StageStatus::Pending)
    {
        return Outcome::Skipped("not awaiting transcription");
    }

    match transcribe(state, &row).await {
        Ok(text) => {
            let patch = MessagePatch {
                transcription: Some(text),
                transcription_status: Some(StageStatus::Done),
                ..Default::default()
            };
            if let Err(e) = state.store.update_message(message_id, &patch).await {
                tracing::error!(message_id, error = %e, "failed to store transcription");
                return Outcome::Failed(e.to_string());
            }
            tracing::info!(message_id, "transcription stored");
            Outcome::Completed(Some(Job::new(JobKind::Reply, message_id)))
        }
        Err(e) => {
            tracing::error!(message_id, error = %e, "transcription failed");
            let patch = MessagePatch::transcription_status(StageStatus::Error);
            if let Err(e) = state.store.update_message(message_id, &patch).await {
                tracing::error!(message_id, error = %e, "failed to record transcription error");
            }
            Outcome::Failed(e.to_string())
        }
    }
}

async fn transcribe(state: &AppState, row: &MessageRecord) -> Result<String> {
    let path = row
        .audio_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("message {} has no audio_path", row.id)))?;

    let bucket = &state.config.store.raw_audio_bucket;
    let audio = state.blobs.fetch(bucket, path).await?;
    if audio.is_empty() {
        return Err(Error::InvalidInput(format!("empty recording at {bucket}/{path}")));
    }

    let text = state.stt.transcribe(audio, file_name(path)).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("transcript is empty".into()));
    }
    Ok(text.to_owned())
}

/// Last path segment; the transcription API infers the format from it.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(file_name("c1/2024/rec-1.webm"), "rec-1.webm");
        assert_eq!(file_name("rec.m4a"), "rec.m4a");
    }
}
