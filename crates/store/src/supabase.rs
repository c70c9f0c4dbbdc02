//! Supabase adapter: PostgREST tables and Storage buckets.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use solace_domain::config::StoreConfig;
use solace_domain::error::{Error, Result};
use solace_domain::records::{
    ConversationPatch, ConversationRecord, MessagePatch, MessageRecord, NewMessage,
};

use crate::traits::{BlobStore, ConversationFilter, MessageFilter, RecordStore};

const MESSAGES: &str = "messages";
const CONVERSATIONS: &str = "conversations";
const PERSONAS: &str = "therapists";

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Store(e.to_string())
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Service key for the project, read from the configured env var.
pub fn service_key(cfg: &StoreConfig) -> Result<String> {
    std::env::var(&cfg.service_key_env).map_err(|_| {
        Error::Auth(format!(
            "environment variable '{}' not set",
            cfg.service_key_env
        ))
    })
}

/// PostgREST-backed record store plus Storage-backed blob store.
pub struct SupabaseStore {
    rest_url: String,
    storage_url: String,
    key: String,
    signed_url_ttl_secs: u64,
    client: reqwest::Client,
}

impl SupabaseStore {
    pub fn from_config(cfg: &StoreConfig) -> Result<Self> {
        let base = cfg.url.trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::Config("store.url is required for supabase".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            rest_url: format!("{base}/rest/v1"),
            storage_url: format!("{base}/storage/v1"),
            key: service_key(cfg)?,
            signed_url_ttl_secs: cfg.signed_url_ttl_secs,
            client,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Store(format!(
            "{what}: HTTP {} - {}",
            status.as_u16(),
            body
        )))
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>> {
        let resp = self
            .authed(self.client.get(self.table(table)))
            .query(query)
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = Self::check(resp, table).await?;
        resp.json().await.map_err(from_reqwest)
    }

    async fn patch_rows<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(String, String)],
        body: &B,
    ) -> Result<Vec<serde_json::Value>> {
        let resp = self
            .authed(self.client.patch(self.table(table)))
            .query(query)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = Self::check(resp, table).await?;
        resp.json().await.map_err(from_reqwest)
    }

    async fn signed_url(&self, bucket: &str, path: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Signed {
            #[serde(rename = "signedURL")]
            signed_url: String,
        }

        let resp = self
            .authed(
                self.client
                    .post(format!("{}/object/sign/{bucket}/{path}", self.storage_url)),
            )
            .json(&json!({ "expiresIn": self.signed_url_ttl_secs }))
            .send()
            .await
            .map_err(from_reqwest)?;
        let signed: Signed = Self::check(resp, "sign")
            .await?
            .json()
            .await
            .map_err(from_reqwest)?;
        Ok(format!("{}{}", self.storage_url, signed.signed_url))
    }
}

/// PostgREST query pairs for a message filter.
pub(crate) fn message_query(filter: &MessageFilter) -> Vec<(String, String)> {
    let mut q = vec![
        ("select".to_string(), "*".to_string()),
        ("order".to_string(), "created_at.asc".to_string()),
    ];
    let mut eq = |col: &str, v: &str| q.push((col.to_string(), format!("eq.{v}")));
    if let Some(ref c) = filter.conversation_id {
        eq("conversation_id", c);
    }
    if let Some(r) = filter.sender_role {
        eq(
            "sender_role",
            match r {
                solace_domain::records::SenderRole::User => "user",
                solace_domain::records::SenderRole::Assistant => "assistant",
            },
        );
    }
    if let Some(s) = filter.transcription_status {
        eq("transcription_status", s.as_str());
    }
    if let Some(s) = filter.ai_status {
        eq("ai_status", s.as_str());
    }
    if let Some(s) = filter.tts_status {
        eq("tts_status", s.as_str());
    }
    if let Some(b) = filter.ai_started {
        q.push(("ai_started".into(), format!("is.{b}")));
    }
    if let Some(b) = filter.invalidated {
        // Legacy rows have NULL here; treat NULL as false.
        if b {
            q.push(("invalidated".into(), "is.true".into()));
        } else {
            q.push(("invalidated".into(), "not.is.true".into()));
        }
    }
    if let Some(t) = filter.created_after {
        q.push(("created_at".into(), format!("gt.{}", ts(t))));
    }
    if let Some(n) = filter.limit {
        q.push(("limit".into(), n.to_string()));
    }
    q
}

fn id_query(id: &str) -> Vec<(String, String)> {
    vec![("id".to_string(), format!("eq.{id}"))]
}

#[async_trait::async_trait]
impl RecordStore for SupabaseStore {
    async fn select_messages(&self, filter: &MessageFilter) -> Result<Vec<MessageRecord>> {
        self.get_rows(MESSAGES, &message_query(filter)).await
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>> {
        let mut q = id_query(id);
        q.push(("select".into(), "*".into()));
        q.push(("limit".into(), "1".into()));
        let rows: Vec<MessageRecord> = self.get_rows(MESSAGES, &q).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord> {
        let conversation_id = new.conversation_id.clone();
        let resp = self
            .authed(self.client.post(self.table(MESSAGES)))
            .header("Prefer", "return=representation")
            .json(&new)
            .send()
            .await
            .map_err(from_reqwest)?;
        let rows: Vec<MessageRecord> = Self::check(resp, MESSAGES)
            .await?
            .json()
            .await
            .map_err(from_reqwest)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::Store("insert returned no row".into()))?;

        self.update_conversation(
            &conversation_id,
            &ConversationPatch {
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
        Ok(row)
    }

    async fn update_message(&self, id: &str, patch: &MessagePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.patch_rows(MESSAGES, &id_query(id), patch).await?;
        Ok(())
    }

    async fn update_messages(
        &self,
        filter: &MessageFilter,
        patch: &MessagePatch,
    ) -> Result<usize> {
        // PATCH rejects `order`/`limit` without a primary-key filter.
        let query: Vec<(String, String)> = message_query(filter)
            .into_iter()
            .filter(|(k, _)| k != "order" && k != "limit")
            .collect();
        Ok(self.patch_rows(MESSAGES, &query, patch).await?.len())
    }

    async fn claim_message(&self, id: &str) -> Result<bool> {
        let mut q = id_query(id);
        q.push(("ai_started".into(), "is.false".into()));
        let rows = self
            .patch_rows(MESSAGES, &q, &json!({ "ai_started": true }))
            .await?;
        Ok(rows.len() == 1)
    }

    async fn select_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<ConversationRecord>> {
        let mut q = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), "updated_at.asc".to_string()),
        ];
        if let Some(e) = filter.ended {
            q.push(("ended".into(), format!("is.{e}")));
        }
        if let Some(t) = filter.updated_before {
            q.push(("updated_at".into(), format!("lt.{}", ts(t))));
        }
        self.get_rows(CONVERSATIONS, &q).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let mut q = id_query(id);
        q.push(("select".into(), "*".into()));
        q.push(("limit".into(), "1".into()));
        let rows: Vec<ConversationRecord> = self.get_rows(CONVERSATIONS, &q).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<()> {
        self.patch_rows(CONVERSATIONS, &id_query(id), patch).await?;
        Ok(())
    }

    async fn persona_voice(&self, therapist_id: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct Persona {
            #[serde(default)]
            elevenlabs_voice_id: Option<String>,
        }
        let mut q = id_query(therapist_id);
        q.push(("select".into(), "elevenlabs_voice_id".into()));
        let rows: Vec<Persona> = self.get_rows(PERSONAS, &q).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|p| p.elevenlabs_voice_id)
            .filter(|v| !v.is_empty()))
    }

    async fn ping(&self) -> Result<()> {
        let q = vec![
            ("select".to_string(), "id".to_string()),
            ("limit".to_string(), "1".to_string()),
        ];
        let _: Vec<serde_json::Value> = self.get_rows(CONVERSATIONS, &q).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for SupabaseStore {
    async fn fetch(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let url = self.signed_url(bucket, path).await?;
        let resp = self.client.get(url).send().await.map_err(from_reqwest)?;
        let bytes = Self::check(resp, "download")
            .await?
            .bytes()
            .await
            .map_err(from_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let resp = self
            .authed(
                self.client
                    .post(format!("{}/object/{bucket}/{path}", self.storage_url)),
            )
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(from_reqwest)?;
        Self::check(resp, "upload").await?;
        Ok(())
    }
}
