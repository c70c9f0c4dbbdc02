//! Dispatch: turns poll results and change notifications into stage jobs
//! and runs them on a bounded worker pool.
//!
//! Both triggers only enqueue. A full queue drops the job (the next poll
//! picks the row up again), so intake never waits on a provider call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use solace_domain::config::{BacklogPolicy, SpeechStrategy};
use solace_domain::error::Result;
use solace_domain::records::{MessageRecord, SenderRole, StageStatus};
use solace_domain::trace::TraceEvent;
use solace_store::{ChangeFeed, MessageFilter};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Transcribe,
    Reply,
    Synthesize,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Transcribe => "transcribe",
            JobKind::Reply => "reply",
            JobKind::Synthesize => "synthesize",
        }
    }
}

/// One stage to run on one row. Stages re-read the row before acting, so
/// the job carries only the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    pub message_id: String,
}

impl Job {
    pub fn new(kind: JobKind, message_id: impl Into<String>) -> Self {
        Self {
            kind,
            message_id: message_id.into(),
        }
    }
}

/// How a stage run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The stage wrote its terminal status. Carries the next stage to
    /// schedule, if any.
    Completed(Option<Job>),
    /// Nothing to do: the row moved on, or another worker owns it.
    Skipped(&'static str),
    /// The stage wrote `error`.
    Failed(String),
    /// The row changed while the stage ran; its result was dropped and the
    /// job must run again once this worker lets go of the row.
    Requeued(Job),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "done",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "error",
            Outcome::Requeued(_) => "requeued",
        }
    }
}

/// Which stage, if any, a row is waiting for.
pub fn classify(row: &MessageRecord, speech: SpeechStrategy) -> Option<JobKind> {
    match row.sender_role {
        SenderRole::User => {
            if row.invalidated {
                return None;
            }
            match (row.transcription_status, row.ai_status) {
                (Some(StageStatus::Pending), _) => Some(JobKind::Transcribe),
                (Some(StageStatus::Done), Some(StageStatus::Pending)) if !row.ai_started => {
                    Some(JobKind::Reply)
                }
                _ => None,
            }
        }
        SenderRole::Assistant => {
            let waiting = row.tts_status == Some(StageStatus::Pending);
            // Lazy rows stay pending until their last snippet is played.
            (waiting && speech == SpeechStrategy::Eager).then_some(JobKind::Synthesize)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded, non-blocking job intake shared by both triggers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Returns `false` when the job was dropped.
    pub fn submit(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                TraceEvent::JobDropped {
                    message_id: job.message_id,
                    kind: job.kind.as_str().into(),
                    reason: "queue_full".into(),
                }
                .emit();
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::debug!(message_id = %job.message_id, "job queue closed");
                false
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Poll trigger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lower bound on `created_at` for polled rows under the backlog policy.
pub fn poll_since(state: &AppState) -> Option<DateTime<Utc>> {
    match state.config.dispatch.backlog {
        BacklogPolicy::Recover => None,
        BacklogPolicy::IgnoreStale => Some(state.started_at),
    }
}

/// The pending-work queries, one per stage.
pub fn poll_filters(
    speech: SpeechStrategy,
    since: Option<DateTime<Utc>>,
    batch: usize,
) -> Vec<(JobKind, MessageFilter)> {
    let base = MessageFilter {
        created_after: since,
        limit: Some(batch),
        ..Default::default()
    };

    let mut filters = vec![
        (
            JobKind::Transcribe,
            MessageFilter {
                sender_role: Some(SenderRole::User),
                transcription_status: Some(StageStatus::Pending),
                ..base.clone()
            },
        ),
        (
            JobKind::Reply,
            MessageFilter {
                sender_role: Some(SenderRole::User),
                transcription_status: Some(StageStatus::Done),
                ai_status: Some(StageStatus::Pending),
                ai_started: Some(false),
                invalidated: Some(false),
                ..base.clone()
            },
        ),
    ];
    if speech == SpeechStrategy::Eager {
        filters.push((
            JobKind::Synthesize,
            MessageFilter {
                sender_role: Some(SenderRole::Assistant),
                tts_status: Some(StageStatus::Pending),
                ..base
            },
        ));
    }
    filters
}

/// Run every pending-work query once and collect the jobs.
pub async fn poll_once(state: &AppState) -> Result<Vec<Job>> {
    let cfg = &state.config;
    let mut jobs = Vec::new();
    for (kind, filter) in poll_filters(cfg.reply.speech, poll_since(state), cfg.dispatch.poll_batch)
    {
        let rows = state.store.select_messages(&filter).await?;
        jobs.extend(rows.into_iter().map(|r| Job::new(kind, r.id)));
    }
    Ok(jobs)
}

/// Poll on a fixed cadence until shutdown. The first pass runs
/// immediately when `startup_sweep` is on.
pub async fn run_poll(state: AppState, shutdown: CancellationToken) {
    let secs = state.config.dispatch.poll_interval_secs;
    if secs == 0 {
        tracing::info!("poll trigger disabled");
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    if !state.config.dispatch.startup_sweep {
        interval.tick().await;
    }

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }
        match poll_once(&state).await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    tracing::debug!(count = jobs.len(), "poll found pending work");
                }
                for job in jobs {
                    state.jobs.submit(job);
                }
            }
            Err(e) => tracing::warn!(error = %e, "poll pass failed"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push trigger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Schedule stages from change notifications until shutdown.
pub async fn run_push(state: AppState, feed: Arc<dyn ChangeFeed>, shutdown: CancellationToken) {
    let mut rx = feed.subscribe();
    let speech = state.config.reply.speech;
    tracing::info!("push trigger subscribed");

    loop {
        let change = tokio::select! {
            r = rx.recv() => r,
            _ = shutdown.cancelled() => return,
        };
        match change {
            Ok(change) => {
                if let Some(kind) = classify(&change.record, speech) {
                    tracing::debug!(
                        message_id = %change.record.id,
                        kind = kind.as_str(),
                        change = ?change.kind,
                        "push scheduled stage"
                    );
                    state.jobs.submit(Job::new(kind, change.record.id));
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "push trigger lagged; poll will recover");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("change feed closed");
                return;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one job to completion, holding the in-process claim for its stage.
pub async fn run_job(state: &AppState, job: Job) -> Outcome {
    let Some(_guard) = state.in_flight.try_begin(job.kind, &job.message_id) else {
        return Outcome::Skipped("in flight");
    };

    let started = Instant::now();
    let outcome = match job.kind {
        JobKind::Transcribe => super::transcribe::run(state, &job.message_id).await,
        JobKind::Reply => super::reply::run(state, &job.message_id).await,
        JobKind::Synthesize => super::speech::run(state, &job.message_id).await,
    };

    if !matches!(outcome, Outcome::Skipped(_)) {
        TraceEvent::StageFinished {
            message_id: job.message_id.clone(),
            stage: job.kind.as_str().into(),
            status: outcome.label().into(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
    outcome
}

/// Drain the queue onto at most `workers` concurrent stage runs.
pub async fn run_workers(
    state: AppState,
    mut rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
) {
    let workers = state.config.dispatch.workers.max(1);
    let permits = Arc::new(Semaphore::new(workers));
    tracing::info!(workers, "stage worker pool ready");

    loop {
        let job = tokio::select! {
            j = rx.recv() => match j {
                Some(j) => j,
                None => return,
            },
            _ = shutdown.cancelled() => return,
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let state = state.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Outcome::Completed(Some(next)) | Outcome::Requeued(next) =
                run_job(&state, job).await
            {
                state.jobs.submit(next);
            }
        });
    }
}
