use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use solace_domain::error::Result;
use solace_domain::records::{
    ConversationPatch, ConversationRecord, MessagePatch, MessageRecord, NewMessage, SenderRole,
    StageStatus,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Equality filter over `messages`. Unset fields match anything.
/// Results are always ordered by `created_at` ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    pub conversation_id: Option<String>,
    pub sender_role: Option<SenderRole>,
    pub transcription_status: Option<StageStatus>,
    pub ai_status: Option<StageStatus>,
    pub tts_status: Option<StageStatus>,
    pub ai_started: Option<bool>,
    pub invalidated: Option<bool>,
    /// Strictly after.
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MessageFilter {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn role(mut self, role: SenderRole) -> Self {
        self.sender_role = Some(role);
        self
    }

    pub fn visible(mut self) -> Self {
        self.invalidated = Some(false);
        self
    }

    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, row: &MessageRecord) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, have: T) -> bool {
            want.as_ref().map_or(true, |w| *w == have)
        }
        self.conversation_id
            .as_deref()
            .map_or(true, |c| c == row.conversation_id)
            && eq(&self.sender_role, row.sender_role)
            && eq(&self.transcription_status.map(Some), row.transcription_status)
            && eq(&self.ai_status.map(Some), row.ai_status)
            && eq(&self.tts_status.map(Some), row.tts_status)
            && eq(&self.ai_started, row.ai_started)
            && eq(&self.invalidated, row.invalidated)
            && self.created_after.map_or(true, |t| row.created_at > t)
    }
}

/// Filter over `conversations`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationFilter {
    pub ended: Option<bool>,
    /// Strictly before.
    pub updated_before: Option<DateTime<Utc>>,
}

impl ConversationFilter {
    pub fn matches(&self, row: &ConversationRecord) -> bool {
        self.ended.map_or(true, |e| e == row.ended)
            && self.updated_before.map_or(true, |t| row.updated_at < t)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed access to the `messages`, `conversations` and persona tables.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn select_messages(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>>;

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>>;

    /// Insert and return the stored row. Bumps the owning conversation's
    /// `updated_at`.
    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord>;

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<()>;

    /// Apply `patch` to every row matching `filter`; returns the row count.
    async fn update_messages(&self, filter: &MessageFilter, patch: &MessagePatch)
        -> Result<usize>;

    /// Atomically flip `ai_started` from false to true. Returns `true` only
    /// for the single caller that performed the flip.
    async fn claim_message(&self, id: &str) -> Result<bool>;

    async fn select_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationRecord>>;

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>>;

    async fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<()>;

    /// Synthesis voice configured for a persona, if any.
    async fn persona_voice(&self, therapist_id: &str) -> Result<Option<String>>;

    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blob store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Download an object. Remote backends go through a short-lived signed
    /// link.
    async fn fetch(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    /// Upload (or overwrite) an object.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Change feed
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// One insert/update notification on `messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChange {
    pub kind: ChangeKind,
    pub record: MessageRecord,
}

/// Push notifications for message rows.
pub trait ChangeFeed: Send + Sync {
    /// Each subscriber sees every change published after it subscribed.
    fn subscribe(&self) -> broadcast::Receiver<MessageChange>;
}
