//! AppState construction and background-task spawning, shared by `serve`
//! and the one-shot CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use solace_domain::config::{Config, ConfigSeverity, StoreBackend};
use solace_providers::{ElevenLabsTts, ProviderRegistry, WhisperStt};
use solace_store::{BlobStore, ChangeFeed, MemoryStore, RealtimeFeed, RecordStore, SupabaseStore};

use crate::api::auth::token_digest;
use crate::runtime::dispatch::{self, Job};
use crate::runtime::reaper;
use crate::state::AppState;

struct Backend {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    memory: Option<Arc<MemoryStore>>,
    realtime: Option<Arc<RealtimeFeed>>,
}

/// Validate config, build every client once and return the wired
/// [`AppState`] plus the job queue receiver for the worker pool.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<(AppState, mpsc::Receiver<Job>)> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Record / blob store ──────────────────────────────────────────
    let backend = build_backend(&config)?;

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized; replies will fail");
    } else {
        tracing::info!(providers = ?llm.list_providers(), "LLM providers ready");
    }

    // ── Speech clients ───────────────────────────────────────────────
    let stt = Arc::new(WhisperStt::from_config(&config.speech.stt).context("initializing STT")?);
    let tts = Arc::new(ElevenLabsTts::from_config(&config.speech.tts).context("initializing TTS")?);

    // ── API token (read once, kept as a digest) ──────────────────────
    let env_var = &config.server.api_token_env;
    let api_token_hash = token_digest(std::env::var(env_var).ok().as_deref());
    if api_token_hash.is_some() {
        tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
    } else {
        tracing::warn!("API bearer-token auth DISABLED; set the {env_var} env var");
    }

    let (mut state, rx) = AppState::new(config, backend.store, backend.blobs, llm, stt, tts);
    state.feed = backend.feed;
    state.memory = backend.memory;
    state.realtime = backend.realtime;
    state.api_token_hash = api_token_hash;
    Ok((state, rx))
}

fn build_backend(config: &Config) -> anyhow::Result<Backend> {
    let cfg = &config.store;
    match cfg.backend {
        StoreBackend::Memory => {
            let memory = match cfg.snapshot_path {
                Some(ref path) => Arc::new(
                    MemoryStore::open(path)
                        .with_context(|| format!("opening snapshot {}", path.display()))?,
                ),
                None => Arc::new(MemoryStore::new()),
            };
            tracing::info!(snapshot = cfg.snapshot_path.is_some(), "memory store ready");
            Ok(Backend {
                store: memory.clone(),
                blobs: memory.clone(),
                feed: config
                    .dispatch
                    .push
                    .then(|| memory.clone() as Arc<dyn ChangeFeed>),
                memory: Some(memory),
                realtime: None,
            })
        }
        StoreBackend::Supabase => {
            let supabase = Arc::new(SupabaseStore::from_config(cfg).context("initializing Supabase store")?);
            let realtime = if config.dispatch.push {
                Some(Arc::new(
                    RealtimeFeed::from_config(cfg).context("initializing Supabase Realtime")?,
                ))
            } else {
                None
            };
            tracing::info!(url = %cfg.url, push = realtime.is_some(), "supabase store ready");
            Ok(Backend {
                store: supabase.clone(),
                blobs: supabase,
                feed: realtime.clone().map(|r| r as Arc<dyn ChangeFeed>),
                memory: None,
                realtime,
            })
        }
    }
}

/// Spawn the long-running loops: worker pool, poll and push triggers,
/// the realtime connection, the reaper, snapshot flushing and TTS
/// warm-up. All stop when `shutdown` is cancelled.
pub fn spawn_background_tasks(
    state: &AppState,
    rx: mpsc::Receiver<Job>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // ── Stage workers ────────────────────────────────────────────────
    handles.push(tokio::spawn(dispatch::run_workers(
        state.clone(),
        rx,
        shutdown.clone(),
    )));

    // ── Triggers ─────────────────────────────────────────────────────
    handles.push(tokio::spawn(dispatch::run_poll(state.clone(), shutdown.clone())));
    if let Some(ref feed) = state.feed {
        handles.push(tokio::spawn(dispatch::run_push(
            state.clone(),
            feed.clone(),
            shutdown.clone(),
        )));
    }
    if let Some(ref realtime) = state.realtime {
        let realtime = realtime.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move { realtime.run(shutdown).await }));
    }

    // ── Idle reaper ──────────────────────────────────────────────────
    handles.push(tokio::spawn(reaper::run_reaper(state.clone(), shutdown.clone())));

    // ── Periodic snapshot flush ──────────────────────────────────────
    if state.memory.is_some() && state.config.store.snapshot_interval_secs > 0 {
        let state = state.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                state.config.store.snapshot_interval_secs,
            ));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => state.flush_snapshot(),
                    _ = shutdown.cancelled() => return,
                }
            }
        }));
    }

    // ── TTS warm-up (fire and forget) ────────────────────────────────
    if state.config.speech.tts.warm_up {
        let tts = state.tts.clone();
        tokio::spawn(async move {
            match tts.warm_up().await {
                Ok(()) => tracing::info!("TTS connections warmed"),
                Err(e) => tracing::warn!(error = %e, "TTS warm-up failed"),
            }
        });
    }

    handles
}
