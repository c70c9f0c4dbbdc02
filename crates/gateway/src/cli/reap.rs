use std::sync::Arc;

use chrono::Utc;

use solace_domain::config::Config;

use crate::bootstrap;
use crate::runtime::reaper;

/// `solace reap`: close idle conversations once.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let (state, _rx) = bootstrap::build_app_state(config).await?;
    let closed = reaper::close_idle(&state, Utc::now()).await?;
    state.flush_snapshot();
    println!("reap: {closed} conversation(s) closed");
    Ok(())
}
