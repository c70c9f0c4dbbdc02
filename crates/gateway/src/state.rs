use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use solace_domain::config::Config;
use solace_providers::{ProviderRegistry, SpeechSynthesizer, SpeechToText};
use solace_store::{BlobStore, ChangeFeed, MemoryStore, RealtimeFeed, RecordStore};

use crate::runtime::dispatch::{Job, JobQueue};
use crate::runtime::in_flight::InFlight;

/// Shared application state passed to API handlers, stage workers and
/// the background loops.
///
/// Fields are grouped by concern:
/// - **Core services**: config, record/blob store, LLM and speech clients
/// - **Dispatch**: job queue and in-process stage claims
/// - **Backend handles**: concrete store pieces that need lifecycle calls
/// - **Security**: API token digest
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<ProviderRegistry>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn SpeechSynthesizer>,

    // ── Dispatch ──────────────────────────────────────────────────────
    pub jobs: JobQueue,
    pub in_flight: Arc<InFlight>,
    /// Push notifications on `messages`. `None` disables the push trigger.
    pub feed: Option<Arc<dyn ChangeFeed>>,
    /// Process start; the `ignore_stale` backlog policy polls only rows
    /// created after it.
    pub started_at: DateTime<Utc>,

    // ── Backend handles ───────────────────────────────────────────────
    /// In-memory backend, kept for snapshot flushing.
    pub memory: Option<Arc<MemoryStore>>,
    /// Supabase Realtime connection, driven by a background task.
    pub realtime: Option<Arc<RealtimeFeed>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the API bearer token. `None` = dev mode (no auth).
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Wire the core services together. Backend handles, the change feed
    /// and the token digest start unset.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        llm: Arc<ProviderRegistry>,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn SpeechSynthesizer>,
    ) -> (Self, mpsc::Receiver<Job>) {
        let (jobs, rx) = JobQueue::new(config.dispatch.queue_capacity);
        let state = Self {
            config,
            store,
            blobs,
            llm,
            stt,
            tts,
            jobs,
            in_flight: Arc::new(InFlight::new()),
            feed: None,
            started_at: Utc::now(),
            memory: None,
            realtime: None,
            api_token_hash: None,
        };
        (state, rx)
    }

    /// Flush the in-memory snapshot, if there is one.
    pub fn flush_snapshot(&self) {
        if let Some(ref memory) = self.memory {
            if let Err(e) = memory.flush() {
                tracing::warn!(error = %e, "memory snapshot flush failed");
            }
        }
    }
}
