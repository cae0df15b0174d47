use crate::client::LightningClient;
use crate::error::Result;
use crate::graph::{ChannelId, PubKey};
use chrono::{DateTime, Utc};
use log::debug;

/// Fee rate in parts per million.
pub type FeePpm = u32;

/// Identity of the node the adapter is connected to.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub pubkey: PubKey,
    pub alias: String,
}

/// Outbound forwarding fee of one of our channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeePolicy {
    pub rate_ppm: FeePpm,
    pub base_fee_msat: u64,
}

/// A channel owned by the root node, with its balance split.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    pub id: ChannelId,
    pub remote_pubkey: PubKey,
    pub capacity_sats: u64,
    pub local_sats: u64,
    pub remote_sats: u64,
    pub fee: FeePolicy,
    pub active: bool,
}

impl LocalChannel {
    /// Percentage of the capacity held on our side.
    pub fn liquidity(&self) -> f64 {
        if self.capacity_sats == 0 {
            return 0.0;
        }
        self.local_sats as f64 * 100.0 / self.capacity_sats as f64
    }
}

#[derive(Debug, Clone)]
pub struct ForwardEvent {
    pub chan_in: ChannelId,
    pub chan_out: ChannelId,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the root node and its channels, taken once per command.
pub struct NodeState {
    pub info: NodeInfo,
    pub channels: Vec<LocalChannel>,
}

impl NodeState {
    /// Collect fresh node state; channels come back sorted by id.
    pub async fn collect(client: &impl LightningClient) -> Result<Self> {
        let info = client.get_root_info().await?;
        let mut channels = client.list_owned_channels().await?;
        channels.sort_by_key(|c| c.id);

        let state = Self { info, channels };
        debug!(
            "Collected state for {} ({}): {} of {} channels active, {} sat capacity",
            state.info.alias,
            state.info.pubkey,
            state.active_channel_count(),
            state.channels.len(),
            state.total_capacity_sats(),
        );
        Ok(state)
    }

    /// Total channel capacity in satoshis.
    pub fn total_capacity_sats(&self) -> u64 {
        self.channels.iter().map(|c| c.capacity_sats).sum()
    }

    /// Number of active channels.
    pub fn active_channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.active).count()
    }
}
