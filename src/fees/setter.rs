use crate::client::LightningClient;
use crate::config::Config;
use crate::error::Result;
use crate::state::{FeePpm, LocalChannel};
use log::info;

/// Write a new fee rate to a channel. Returns whether anything was written.
///
/// The configured base fee goes along with every rate change.
pub async fn apply(
    config: &Config,
    client: &impl LightningClient,
    channel: &LocalChannel,
    new_ppm: FeePpm,
) -> Result<bool> {
    let new_base_msat = config.liquidity.base_fee_msat;

    info!(
        "Fee setter: channel {} with {} at {:.1}% -- base: {}->{}msat, ppm: {}->{}",
        channel.id,
        channel.remote_pubkey,
        channel.liquidity(),
        channel.fee.base_fee_msat,
        new_base_msat,
        channel.fee.rate_ppm,
        new_ppm,
    );

    if config.general.dry_run {
        info!("  (dry-run: not applying)");
        return Ok(false);
    }

    client
        .update_channel_fee(channel.id, new_ppm, new_base_msat)
        .await?;

    Ok(true)
}
