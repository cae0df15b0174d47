pub mod lnd;
#[cfg(test)]
pub mod mock;

use crate::error::Result;
use crate::graph::{ChannelId, Graph, PubKey};
use crate::state::{FeePpm, ForwardEvent, LocalChannel, NodeInfo};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Narrow view of the remote node used by every command.
///
/// Implemented over LND's REST gateway by [`lnd::LndClient`] and by an in-memory
/// mock in tests.
#[async_trait::async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_root_info(&self) -> Result<NodeInfo>;

    /// Full node and channel set, fetched in one call.
    async fn get_graph(&self) -> Result<Graph>;

    async fn list_owned_channels(&self) -> Result<Vec<LocalChannel>>;

    async fn forwarding_history(&self, since: DateTime<Utc>) -> Result<Vec<ForwardEvent>>;

    async fn update_channel_fee(
        &self,
        channel_id: ChannelId,
        rate_ppm: FeePpm,
        base_fee_msat: u64,
    ) -> Result<()>;

    /// Pay ourselves leaving through `out_channel` and coming back through a channel
    /// with `last_hop`. Returns the routing fee paid in satoshis.
    ///
    /// Fails with `NoRoute`, `InsufficientBalance` or `FeeExceeded` when the payment
    /// itself fails, `Transport` for anything else.
    async fn send_circular_payment(
        &self,
        out_channel: ChannelId,
        last_hop: &PubKey,
        amount_sats: u64,
        max_fee_sats: u64,
    ) -> Result<u64>;

    /// Channel state change notifications, if the backend can stream them.
    async fn channel_events(&self) -> Result<Option<mpsc::Receiver<()>>> {
        Ok(None)
    }
}
