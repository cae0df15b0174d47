pub mod algo;

pub use algo::Reaped;

use crate::client::LightningClient;
use crate::config::Config;
use crate::error::Result;
use chrono::Utc;
use log::{debug, info};

/// Report channels that forwarded at most `reaper.max_forwards` payments in the
/// last `reaper.lookback_days`. Read-only: nothing is closed.
pub async fn reap(config: &Config, client: &impl LightningClient) -> Result<Vec<Reaped>> {
    let since = config.reaper.since(Utc::now())?;

    let channels = client.list_owned_channels().await?;
    let mut forwards = client.forwarding_history(since).await?;
    forwards.retain(|f| f.timestamp >= since);
    debug!(
        "Reaper: {} forwards over {} channels since {}",
        forwards.len(),
        channels.len(),
        since
    );

    let reaped = algo::rank(channels, &forwards, config.reaper.max_forwards);
    if reaped.is_empty() {
        debug!("Reaper: no idle channels");
    } else {
        info!(
            "Reaper: {} channels with at most {} forwards in {} days",
            reaped.len(),
            config.reaper.max_forwards,
            config.reaper.lookback_days
        );
    }
    Ok(reaped)
}
