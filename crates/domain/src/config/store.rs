use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local tables with an optional JSON snapshot.
    #[default]
    Memory,
    /// Supabase: PostgREST tables, Storage buckets, Realtime change feed.
    Supabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Project URL, e.g. `https://abcd.supabase.co`. Required for `supabase`.
    #[serde(default)]
    pub url: String,
    /// Env var holding the service-role key.
    #[serde(default = "d_service_key_env")]
    pub service_key_env: String,
    #[serde(default = "d_raw_audio")]
    pub raw_audio_bucket: String,
    #[serde(default = "d_tts_audio")]
    pub tts_audio_bucket: String,
    /// Lifetime of signed download links.
    #[serde(default = "d_60")]
    pub signed_url_ttl_secs: u64,
    #[serde(default = "d_15000u")]
    pub request_timeout_ms: u64,
    /// Realtime heartbeat cadence.
    #[serde(default = "d_30")]
    pub heartbeat_secs: u64,
    /// Memory backend only: load from / flush to this JSON file.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Memory backend only: snapshot flush cadence.
    #[serde(default = "d_30")]
    pub snapshot_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            service_key_env: d_service_key_env(),
            raw_audio_bucket: d_raw_audio(),
            tts_audio_bucket: d_tts_audio(),
            signed_url_ttl_secs: d_60(),
            request_timeout_ms: d_15000u(),
            heartbeat_secs: d_30(),
            snapshot_path: None,
            snapshot_interval_secs: d_30(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_service_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".into()
}
fn d_raw_audio() -> String {
    "raw-audio".into()
}
fn d_tts_audio() -> String {
    "tts-audio".into()
}
fn d_60() -> u64 {
    60
}
fn d_30() -> u64 {
    30
}
fn d_15000u() -> u64 {
    15_000
}
