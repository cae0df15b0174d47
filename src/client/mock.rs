use super::LightningClient;
use crate::error::{Error, Result};
use crate::graph::{pk, Channel, ChannelId, Graph, Node, PubKey};
use crate::state::{FeePolicy, FeePpm, ForwardEvent, LocalChannel, NodeInfo};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Outcome forced on the next circular payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentOutcome {
    Succeed,
    NoRoute,
    InsufficientBalance,
    FeeExceeded,
    Transport,
}

#[derive(Debug, Clone)]
pub struct PaymentCall {
    pub out_channel: ChannelId,
    pub last_hop: PubKey,
    pub amount_sats: u64,
    pub max_fee_sats: u64,
}

/// In-memory node: returns preset data, records writes, and moves balances on
/// successful circular payments so repeated calls observe their own effects.
pub struct MockClient {
    pub info: NodeInfo,
    pub nodes: Vec<Node>,
    pub graph_channels: Vec<Channel>,
    pub forwards: Vec<ForwardEvent>,
    channels: Mutex<Vec<LocalChannel>>,
    /// Routing fee charged by successful payments.
    pub payment_fee_ppm: u64,
    /// Outcomes consumed in order; once empty payments settle normally.
    pub payment_script: Mutex<VecDeque<PaymentOutcome>>,
    /// Fee updates succeed this many times, then fail with a transport error.
    pub fail_updates_after: Option<usize>,
    pub fail_reads: bool,
    /// Called after every recorded fee update.
    pub on_fee_update: Option<Box<dyn Fn(ChannelId) + Send + Sync>>,
    pub events: Mutex<Option<mpsc::Receiver<()>>>,
    // Call recorders
    pub fee_update_calls: Arc<Mutex<Vec<(ChannelId, FeePpm, u64)>>>,
    pub payment_calls: Arc<Mutex<Vec<PaymentCall>>>,
    pub forwarding_since: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            info: NodeInfo {
                pubkey: pk(0),
                alias: "mock".to_string(),
            },
            nodes: Vec::new(),
            graph_channels: Vec::new(),
            forwards: Vec::new(),
            channels: Mutex::new(Vec::new()),
            payment_fee_ppm: 0,
            payment_script: Mutex::new(VecDeque::new()),
            fail_updates_after: None,
            fail_reads: false,
            on_fee_update: None,
            events: Mutex::new(None),
            fee_update_calls: Arc::new(Mutex::new(Vec::new())),
            payment_calls: Arc::new(Mutex::new(Vec::new())),
            forwarding_since: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_channels(&mut self, channels: Vec<LocalChannel>) {
        *self.channels.get_mut().unwrap() = channels;
    }

    pub fn script_payments(&self, outcomes: &[PaymentOutcome]) {
        self.payment_script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn channel(&self, id: u64) -> LocalChannel {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == ChannelId(id))
            .cloned()
            .unwrap()
    }

    /// Move `sats` of a channel's balance to the remote side, as an outgoing forward would.
    pub fn drain(&self, id: u64, sats: u64) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(ch) = channels.iter_mut().find(|c| c.id == ChannelId(id)) {
            ch.local_sats -= sats;
            ch.remote_sats += sats;
        }
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        Ok(())
    }
}

/// Owned channel with peer `pk(peer)`, 0 ppm fee, active.
pub fn local_channel(id: u64, peer: u8, capacity_sats: u64, local_sats: u64) -> LocalChannel {
    LocalChannel {
        id: ChannelId(id),
        remote_pubkey: pk(peer),
        capacity_sats,
        local_sats,
        remote_sats: capacity_sats.saturating_sub(local_sats),
        fee: FeePolicy::default(),
        active: true,
    }
}

#[async_trait::async_trait]
impl LightningClient for MockClient {
    async fn get_root_info(&self) -> Result<NodeInfo> {
        self.check_reads()?;
        Ok(self.info.clone())
    }

    async fn get_graph(&self) -> Result<Graph> {
        self.check_reads()?;
        Ok(Graph::new(self.nodes.clone(), self.graph_channels.clone()))
    }

    async fn list_owned_channels(&self) -> Result<Vec<LocalChannel>> {
        self.check_reads()?;
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn forwarding_history(&self, since: DateTime<Utc>) -> Result<Vec<ForwardEvent>> {
        self.check_reads()?;
        self.forwarding_since.lock().unwrap().push(since);
        Ok(self
            .forwards
            .iter()
            .filter(|f| f.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn update_channel_fee(
        &self,
        channel_id: ChannelId,
        rate_ppm: FeePpm,
        base_fee_msat: u64,
    ) -> Result<()> {
        let mut calls = self.fee_update_calls.lock().unwrap();
        if let Some(limit) = self.fail_updates_after {
            if calls.len() >= limit {
                return Err(Error::Transport("mock: policy update failed".into()));
            }
        }
        calls.push((channel_id, rate_ppm, base_fee_msat));
        drop(calls);
        let mut channels = self.channels.lock().unwrap();
        if let Some(ch) = channels.iter_mut().find(|c| c.id == channel_id) {
            ch.fee = FeePolicy {
                rate_ppm,
                base_fee_msat,
            };
        }
        drop(channels);
        if let Some(hook) = &self.on_fee_update {
            hook(channel_id);
        }
        Ok(())
    }

    async fn send_circular_payment(
        &self,
        out_channel: ChannelId,
        last_hop: &PubKey,
        amount_sats: u64,
        max_fee_sats: u64,
    ) -> Result<u64> {
        self.payment_calls.lock().unwrap().push(PaymentCall {
            out_channel,
            last_hop: last_hop.clone(),
            amount_sats,
            max_fee_sats,
        });

        let scripted = self.payment_script.lock().unwrap().pop_front();
        match scripted.unwrap_or(PaymentOutcome::Succeed) {
            PaymentOutcome::Succeed => {}
            PaymentOutcome::NoRoute => {
                return Err(Error::NoRoute {
                    out_channel,
                    last_hop: last_hop.clone(),
                    amount_sats,
                })
            }
            PaymentOutcome::InsufficientBalance => {
                return Err(Error::InsufficientBalance {
                    out_channel,
                    amount_sats,
                })
            }
            PaymentOutcome::FeeExceeded => {
                return Err(Error::FeeExceeded {
                    out_channel,
                    last_hop: last_hop.clone(),
                    amount_sats,
                    max_fee_sats,
                })
            }
            PaymentOutcome::Transport => {
                return Err(Error::Transport("mock: connection reset".into()))
            }
        }

        let fee = (amount_sats * self.payment_fee_ppm).div_ceil(1_000_000);
        if fee > max_fee_sats {
            return Err(Error::FeeExceeded {
                out_channel,
                last_hop: last_hop.clone(),
                amount_sats,
                max_fee_sats,
            });
        }

        let mut channels = self.channels.lock().unwrap();
        let out_idx = channels
            .iter()
            .position(|c| c.id == out_channel)
            .ok_or(Error::NoRoute {
                out_channel,
                last_hop: last_hop.clone(),
                amount_sats,
            })?;
        let in_idx = channels
            .iter()
            .position(|c| &c.remote_pubkey == last_hop && c.id != out_channel)
            .ok_or(Error::NoRoute {
                out_channel,
                last_hop: last_hop.clone(),
                amount_sats,
            })?;
        if channels[out_idx].local_sats < amount_sats + fee
            || channels[in_idx].remote_sats < amount_sats
        {
            return Err(Error::InsufficientBalance {
                out_channel,
                amount_sats,
            });
        }

        let out = &mut channels[out_idx];
        out.local_sats -= amount_sats + fee;
        out.remote_sats += amount_sats + fee;
        let inbound = &mut channels[in_idx];
        inbound.local_sats += amount_sats;
        inbound.remote_sats -= amount_sats;

        Ok(fee)
    }

    async fn channel_events(&self) -> Result<Option<mpsc::Receiver<()>>> {
        Ok(self.events.lock().unwrap().take())
    }
}
