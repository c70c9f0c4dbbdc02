//! `solace sweep`: one poll pass, run to completion.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;

use solace_domain::config::Config;

use crate::bootstrap;
use crate::runtime::dispatch::{self, Job, Outcome};
use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let (state, _rx) = bootstrap::build_app_state(config).await?;
    let report = sweep(&state).await?;
    state.flush_snapshot();
    println!(
        "sweep: {} completed, {} skipped, {} failed",
        report.completed, report.skipped, report.failed
    );
    Ok(())
}

/// Poll once, then run the found jobs and every follow-up stage they
/// produce, at most `dispatch.workers` at a time.
pub async fn sweep(state: &AppState) -> anyhow::Result<SweepReport> {
    let mut pending: VecDeque<Job> = dispatch::poll_once(state).await?.into();
    let workers = state.config.dispatch.workers.max(1);
    let report = Arc::new(Mutex::new(SweepReport::default()));

    // Follow-ups are run in waves so each stage sees its predecessor's writes.
    while !pending.is_empty() {
        let wave: Vec<Job> = pending.drain(..).collect();
        let next = Arc::new(Mutex::new(Vec::new()));

        stream::iter(wave)
            .for_each_concurrent(workers, |job| {
                let report = report.clone();
                let next = next.clone();
                async move {
                    let outcome = dispatch::run_job(state, job).await;
                    let mut r = report.lock();
                    match outcome {
                        Outcome::Completed(follow_up) => {
                            r.completed += 1;
                            if let Some(job) = follow_up {
                                next.lock().push(job);
                            }
                        }
                        Outcome::Skipped(_) => r.skipped += 1,
                        Outcome::Failed(_) => r.failed += 1,
                        Outcome::Requeued(job) => {
                            r.skipped += 1;
                            next.lock().push(job);
                        }
                    }
                }
            })
            .await;

        pending.extend(next.lock().drain(..));
    }

    let report = *report.lock();
    Ok(report)
}
