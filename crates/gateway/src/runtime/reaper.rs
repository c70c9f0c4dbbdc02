//! Idle reaper: closes conversations nobody has touched for a while.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use solace_domain::error::Result;
use solace_domain::records::ConversationPatch;
use solace_domain::trace::TraceEvent;
use solace_store::ConversationFilter;

use super::summarize::summarize_conversation;
use crate::state::AppState;

/// Close every open conversation idle since before `now - threshold`.
/// Returns how many were closed.
///
/// The summary is best-effort; a conversation is closed even when its
/// summary fails.
pub async fn close_idle(state: &AppState, now: DateTime<Utc>) -> Result<usize> {
    let threshold = chrono::Duration::seconds(state.config.reaper.idle_threshold_secs as i64);
    let filter = ConversationFilter {
        ended: Some(false),
        updated_before: Some(now - threshold),
    };
    let idle = state.store.select_conversations(&filter).await?;

    let mut closed = 0;
    for conversation in idle {
        let id = &conversation.id;
        if let Err(e) = summarize_conversation(state, id).await {
            tracing::warn!(conversation_id = %id, error = %e, "summary before close failed");
        }

        let patch = ConversationPatch {
            ended: Some(true),
            ..Default::default()
        };
        if let Err(e) = state.store.update_conversation(id, &patch).await {
            tracing::error!(conversation_id = %id, error = %e, "failed to close conversation");
            continue;
        }
        closed += 1;
        TraceEvent::ConversationClosed {
            conversation_id: id.clone(),
            idle_secs: (now - conversation.updated_at).num_seconds(),
        }
        .emit();
    }

    if closed > 0 {
        tracing::info!(closed, "idle conversations closed");
    }
    Ok(closed)
}

/// Reap on a fixed cadence until shutdown.
pub async fn run_reaper(state: AppState, shutdown: CancellationToken) {
    let cfg = &state.config.reaper;
    if !cfg.enabled {
        tracing::info!("idle reaper disabled");
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    if !cfg.run_on_start {
        interval.tick().await;
    }

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => return,
        }
        if let Err(e) = close_idle(&state, Utc::now()).await {
            tracing::warn!(error = %e, "reaper pass failed");
        }
    }
}
