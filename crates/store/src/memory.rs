//! Process-local record store.
//!
//! Holds `messages`, `conversations` and persona voices in memory, publishes
//! every insert/update on a broadcast channel, and optionally persists the
//! tables to a JSON snapshot file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use solace_domain::error::{Error, Result};
use solace_domain::records::{
    ConversationPatch, ConversationRecord, MessagePatch, MessageRecord, NewMessage,
};

use crate::traits::{
    BlobStore, ChangeFeed, ChangeKind, ConversationFilter, MessageChange, MessageFilter,
    RecordStore,
};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    /// Insertion order; `select_messages` sorts stably by `created_at`.
    #[serde(default)]
    messages: Vec<MessageRecord>,
    #[serde(default)]
    conversations: HashMap<String, ConversationRecord>,
    /// therapist_id → voice id
    #[serde(default)]
    personas: HashMap<String, String>,
}

/// In-memory store backed by an optional JSON snapshot.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
    feed: broadcast::Sender<MessageChange>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            blobs: RwLock::new(HashMap::new()),
            feed,
            snapshot_path: None,
        }
    }

    /// Load from `path` if it exists; later [`flush`](Self::flush) calls
    /// write back to the same file.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Store(format!("corrupt snapshot {}: {e}", path.display())))?
        } else {
            Tables::default()
        };

        tracing::info!(
            messages = tables.messages.len(),
            conversations = tables.conversations.len(),
            path = %path.display(),
            "memory store loaded"
        );

        let mut store = Self::new();
        store.tables = RwLock::new(tables);
        store.snapshot_path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Persist the tables to the snapshot file. No-op without one.
    pub fn flush(&self) -> Result<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let tables = self.tables.read();
            serde_json::to_string_pretty(&*tables)
                .map_err(|e| Error::Other(format!("serializing snapshot: {e}")))?
        };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(Error::Io)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, path).map_err(Error::Io)?;
        Ok(())
    }

    // ── Seeding helpers (dev tooling and tests) ─────────────────────

    pub fn put_conversation(&self, conversation: ConversationRecord) {
        self.tables
            .write()
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Insert a fully-formed row as-is (keeps its id and timestamps) and
    /// publish it.
    pub fn put_message(&self, row: MessageRecord) {
        self.tables.write().messages.push(row.clone());
        self.publish(ChangeKind::Insert, row);
    }

    pub fn set_persona_voice(&self, therapist_id: impl Into<String>, voice_id: impl Into<String>) {
        self.tables
            .write()
            .personas
            .insert(therapist_id.into(), voice_id.into());
    }

    pub fn put_blob(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        self.blobs
            .write()
            .insert((bucket.to_string(), path.to_string()), bytes);
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    fn publish(&self, kind: ChangeKind, record: MessageRecord) {
        // No subscribers is fine.
        let _ = self.feed.send(MessageChange { kind, record });
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn select_messages(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>> {
        let tables = self.tables.read();
        let mut rows: Vec<MessageRecord> = tables
            .messages
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>> {
        Ok(self
            .tables
            .read()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord> {
        let now = Utc::now();
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let row = MessageRecord {
            id,
            sender_role: new.role(),
            conversation_id: new.conversation_id,
            audio_path: new.audio_path,
            transcription: new.transcription,
            assistant_text: new.assistant_text,
            transcription_status: new.transcription_status,
            ai_status: new.ai_status,
            tts_status: new.tts_status,
            ai_started: new.ai_started,
            invalidated: false,
            created_at: now,
            updated_at: Some(now),
            edited_at: None,
            tts_path: None,
            snippet_url: new.snippet_url,
        };

        {
            let mut tables = self.tables.write();
            if tables.messages.iter().any(|m| m.id == row.id) {
                return Err(Error::Store(format!("duplicate message id {}", row.id)));
            }
            if let Some(conv) = tables.conversations.get_mut(&row.conversation_id) {
                conv.updated_at = now;
            }
            tables.messages.push(row.clone());
        }

        self.publish(ChangeKind::Insert, row.clone());
        Ok(row)
    }

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<()> {
        let updated = {
            let mut tables = self.tables.write();
            let row = tables
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| Error::NotFound(format!("message {id}")))?;
            patch.apply(row);
            row.updated_at = Some(Utc::now());
            row.clone()
        };
        self.publish(ChangeKind::Update, updated);
        Ok(())
    }

    async fn update_messages(
        &self,
        filter: &MessageFilter,
        patch: &MessagePatch,
    ) -> Result<usize> {
        let now = Utc::now();
        let updated: Vec<MessageRecord> = {
            let mut tables = self.tables.write();
            tables
                .messages
                .iter_mut()
                .filter(|m| filter.matches(m))
                .map(|row| {
                    patch.apply(row);
                    row.updated_at = Some(now);
                    row.clone()
                })
                .collect()
        };
        let n = updated.len();
        for row in updated {
            self.publish(ChangeKind::Update, row);
        }
        Ok(n)
    }

    async fn claim_message(&self, id: &str) -> Result<bool> {
        let claimed = {
            let mut tables = self.tables.write();
            match tables.messages.iter_mut().find(|m| m.id == id) {
                Some(row) if !row.ai_started => {
                    row.ai_started = true;
                    row.updated_at = Some(Utc::now());
                    Some(row.clone())
                }
                _ => None,
            }
        };
        match claimed {
            Some(row) => {
                self.publish(ChangeKind::Update, row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn select_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationRecord>> {
        let tables = self.tables.read();
        let mut rows: Vec<ConversationRecord> = tables
            .conversations
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.updated_at);
        Ok(rows)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.tables.read().conversations.get(id).cloned())
    }

    async fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<()> {
        let mut tables = self.tables.write();
        let row = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        patch.apply(row);
        Ok(())
    }

    async fn persona_voice(&self, therapist_id: &str) -> Result<Option<String>> {
        Ok(self.tables.read().personas.get(therapist_id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn fetch(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        self.blob(bucket, path)
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{path}")))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        self.put_blob(bucket, path, bytes);
        Ok(())
    }
}

impl ChangeFeed for MemoryStore {
    fn subscribe(&self) -> broadcast::Receiver<MessageChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solace_domain::records::{SenderRole, StageStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn insert_bumps_conversation_activity() {
        let store = MemoryStore::new();
        let mut conv = ConversationRecord::new("c1");
        conv.updated_at = Utc::now() - chrono::Duration::hours(3);
        let before = conv.updated_at;
        store.put_conversation(conv);

        store
            .insert_message(NewMessage::user_text("c1", "hello"))
            .await
            .unwrap();

        let conv = store.get_conversation("c1").await.unwrap().unwrap();
        assert!(conv.updated_at > before);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let row = store
            .insert_message(NewMessage::user_text("c1", "hello"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = store.clone();
            let id = row.id.clone();
            handles.push(tokio::spawn(async move { s.claim_message(&id).await.unwrap() }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn changes_are_published() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let row = store
            .insert_message(NewMessage::user_audio("c1", "c1/a.webm"))
            .await
            .unwrap();
        store
            .update_message(&row.id, &MessagePatch::transcription_status(StageStatus::Error))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.record.sender_role, SenderRole::User);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.record.transcription_status, Some(StageStatus::Error));
    }

    #[tokio::test]
    async fn caller_chosen_id_is_kept_and_unique() {
        let store = MemoryStore::new();
        let row = store
            .insert_message(NewMessage::user_text("c1", "hi").with_id("m-42"))
            .await
            .unwrap();
        assert_eq!(row.id, "m-42");

        let err = store
            .insert_message(NewMessage::user_text("c1", "again").with_id("m-42"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_message("nope", &MessagePatch::ai_status(StageStatus::Done))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        let store = MemoryStore::open(&path).unwrap();
        store.put_conversation(ConversationRecord::new("c1"));
        store.set_persona_voice("t1", "voice-xyz");
        let row = store
            .insert_message(NewMessage::user_text("c1", "hi"))
            .await
            .unwrap();
        store.flush().unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert!(reopened.get_message(&row.id).await.unwrap().is_some());
        assert!(reopened.get_conversation("c1").await.unwrap().is_some());
        assert_eq!(
            reopened.persona_voice("t1").await.unwrap().as_deref(),
            Some("voice-xyz")
        );
    }
}
