//! Persisted records: one row per message turn and one per conversation.
//!
//! Field names match the column names of the `messages` and
//! `conversations` tables so the same structs serialize straight onto the
//! REST store and into the in-memory snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Assistant,
}

/// Progress of one pipeline stage on one row.
///
/// `NotApplicable` is only used for `ai_status` (e.g. a user turn that
/// arrived after its conversation ended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Done,
    Error,
    NotApplicable,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StageStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Done => "done",
            StageStatus::Error => "error",
            StageStatus::NotApplicable => "not_applicable",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn of a conversation as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_role: SenderRole,
    /// Object key of the raw recording in the `raw-audio` bucket.
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub assistant_text: Option<String>,
    #[serde(default)]
    pub transcription_status: Option<StageStatus>,
    #[serde(default)]
    pub ai_status: Option<StageStatus>,
    #[serde(default)]
    pub tts_status: Option<StageStatus>,
    /// Claim flag. Flipped false -> true exactly once per reply attempt.
    #[serde(default, deserialize_with = "null_as_false")]
    pub ai_started: bool,
    /// Excluded from context construction (set by the edit path).
    #[serde(default, deserialize_with = "null_as_false")]
    pub invalidated: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// Object key of eagerly synthesized audio in the `tts-audio` bucket.
    #[serde(default)]
    pub tts_path: Option<String>,
    /// Locator of the lazy per-sentence playback endpoint.
    #[serde(default)]
    pub snippet_url: Option<String>,
}

impl MessageRecord {
    pub fn is_user(&self) -> bool {
        self.sender_role == SenderRole::User
    }

    /// The text this turn contributes to a prompt.
    pub fn turn_text(&self) -> Option<&str> {
        let text = match self.sender_role {
            SenderRole::User => self.transcription.as_deref(),
            SenderRole::Assistant => self.assistant_text.as_deref(),
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

/// Insert payload for a new message row. The store assigns `created_at`,
/// and `id` too unless the caller picked one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub conversation_id: String,
    pub sender_role: Option<SenderRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_status: Option<StageStatus>,
    pub ai_started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_url: Option<String>,
}

impl NewMessage {
    /// A finished assistant reply.
    pub fn assistant(
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        tts_status: StageStatus,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_role: Some(SenderRole::Assistant),
            assistant_text: Some(text.into()),
            ai_status: Some(StageStatus::Done),
            tts_status: Some(tts_status),
            ai_started: true,
            ..Default::default()
        }
    }

    /// A typed user turn: no transcription needed, reply pending.
    pub fn user_text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_role: Some(SenderRole::User),
            transcription: Some(text.into()),
            transcription_status: Some(StageStatus::Done),
            ai_status: Some(StageStatus::Pending),
            ..Default::default()
        }
    }

    /// A recorded user turn awaiting transcription.
    pub fn user_audio(conversation_id: impl Into<String>, audio_path: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_role: Some(SenderRole::User),
            audio_path: Some(audio_path.into()),
            transcription_status: Some(StageStatus::Pending),
            ai_status: Some(StageStatus::Pending),
            ..Default::default()
        }
    }

    /// Use a caller-chosen id, e.g. when another column must embed it.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn role(&self) -> SenderRole {
        self.sender_role.unwrap_or(SenderRole::User)
    }
}

/// Partial update of a message row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_status: Option<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_url: Option<String>,
}

impl MessagePatch {
    pub fn transcription_status(status: StageStatus) -> Self {
        Self {
            transcription_status: Some(status),
            ..Default::default()
        }
    }

    pub fn ai_status(status: StageStatus) -> Self {
        Self {
            ai_status: Some(status),
            ..Default::default()
        }
    }

    pub fn tts_status(status: StageStatus) -> Self {
        Self {
            tts_status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields onto an in-memory row.
    pub fn apply(&self, row: &mut MessageRecord) {
        if let Some(ref v) = self.transcription {
            row.transcription = Some(v.clone());
        }
        if let Some(ref v) = self.assistant_text {
            row.assistant_text = Some(v.clone());
        }
        if let Some(v) = self.transcription_status {
            row.transcription_status = Some(v);
        }
        if let Some(v) = self.ai_status {
            row.ai_status = Some(v);
        }
        if let Some(v) = self.tts_status {
            row.tts_status = Some(v);
        }
        if let Some(v) = self.ai_started {
            row.ai_started = v;
        }
        if let Some(v) = self.invalidated {
            row.invalidated = v;
        }
        if let Some(v) = self.edited_at {
            row.edited_at = Some(v);
        }
        if let Some(ref v) = self.tts_path {
            row.tts_path = Some(v.clone());
        }
        if let Some(ref v) = self.snippet_url {
            row.snippet_url = Some(v.clone());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    /// Terminal once true.
    #[serde(default, deserialize_with = "null_as_false")]
    pub ended: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Short cross-session topic phrase.
    #[serde(default)]
    pub memory_summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub needs_resummarization: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub voice_enabled: bool,
    /// Persona assigned to the conversation; selects the synthesis voice.
    #[serde(default)]
    pub therapist_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            ended: false,
            updated_at: now,
            created_at: Some(now),
            memory_summary: None,
            needs_resummarization: false,
            voice_enabled: false,
            therapist_id: None,
            patient_id: None,
            title: None,
        }
    }
}

/// Partial update of a conversation row.
///
/// `memory_summary: Some(None)` clears the column (serialized as `null`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_summary: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_resummarization: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    pub fn apply(&self, row: &mut ConversationRecord) {
        if let Some(v) = self.ended {
            row.ended = v;
        }
        if let Some(ref v) = self.memory_summary {
            row.memory_summary = v.clone();
        }
        if let Some(v) = self.needs_resummarization {
            row.needs_resummarization = v;
        }
        if let Some(v) = self.updated_at {
            row.updated_at = v;
        }
    }
}

// ── serde helpers ───────────────────────────────────────────────────

fn null_as_false<'de, D>(de: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(de)?.unwrap_or(false))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
