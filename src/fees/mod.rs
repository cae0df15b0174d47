pub mod monitor;
pub mod policy;
pub mod setter;

pub use policy::LiquidityFees;

use crate::client::LightningClient;
use crate::config::Config;
use crate::error::Result;
use crate::graph::ChannelId;
use crate::state::FeePpm;
use log::{debug, info};
use tokio::sync::watch;

/// A fee rate that was written to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeUpdate {
    pub channel_id: ChannelId,
    pub fee_ppm: FeePpm,
}

/// Bring every owned channel in line with the fee schedule once.
///
/// Returns the updates written, in channel id order.
pub async fn apply(
    config: &Config,
    client: &impl LightningClient,
    policy: &LiquidityFees,
    cancel: &watch::Receiver<bool>,
) -> Result<Vec<FeeUpdate>> {
    let mut updates = Vec::new();
    cycle(config, client, policy, cancel, |update| {
        updates.push(update);
        true
    })
    .await?;
    Ok(updates)
}

/// One pass over the owned channels. `emit` sees each update right after its write
/// succeeds, so on error everything already written has been reported. When `emit`
/// returns false nobody is listening any more and the pass stops.
pub(crate) async fn cycle(
    config: &Config,
    client: &impl LightningClient,
    policy: &LiquidityFees,
    cancel: &watch::Receiver<bool>,
    mut emit: impl FnMut(FeeUpdate) -> bool,
) -> Result<()> {
    let mut channels = client.list_owned_channels().await?;
    channels.sort_by_key(|c| c.id);
    channels.retain(|c| c.capacity_sats > 0);

    if channels.is_empty() {
        debug!("Fee management: no channels");
        return Ok(());
    }

    debug!("Fee management: evaluating {} channels", channels.len());

    let mut written = 0;
    for channel in &channels {
        if *cancel.borrow() {
            info!("Fee management: cancelled, {} updates written", written);
            return Ok(());
        }

        let Some(fee_ppm) = policy.potential_fee(channel) else {
            debug!(
                "Fee management: channel {} unchanged ({:.1}%, {} ppm)",
                channel.id,
                channel.liquidity(),
                channel.fee.rate_ppm
            );
            continue;
        };

        if setter::apply(config, client, channel, fee_ppm).await? {
            written += 1;
            let delivered = emit(FeeUpdate {
                channel_id: channel.id,
                fee_ppm,
            });
            if !delivered {
                info!("Fee management: update receiver gone, {} updates written", written);
                return Ok(());
            }
        }
    }

    if written > 0 {
        info!("Fee management: {} channels updated", written);
    }
    Ok(())
}
