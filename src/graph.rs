use crate::error::Error;
use chrono::{DateTime, Utc};
use hex::{DisplayHex, FromHex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Compressed secp256k1 public key identifying a node, kept as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(String);

impl PubKey {
    pub const LEN: usize = 33;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Validated on construction
        Vec::<u8>::from_hex(&self.0).unwrap_or_default()
    }
}

impl FromStr for PubKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Vec::<u8>::from_hex(s.trim())
            .map_err(|e| Error::Validation(format!("invalid pubkey {:?}: {}", s, e)))?;
        if bytes.len() != Self::LEN {
            return Err(Error::Validation(format!(
                "invalid pubkey {:?}: expected {} bytes, got {}",
                s,
                Self::LEN,
                bytes.len()
            )));
        }
        Ok(PubKey(bytes.as_slice().to_lower_hex_string()))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Short channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub pubkey: PubKey,
    pub alias: String,
    pub last_update: DateTime<Utc>,
    /// Incident channels, filled in by `Graph::new`.
    pub channels: Vec<ChannelId>,
    /// Announced `host:port` addresses.
    pub addresses: Vec<String>,
}

impl Node {
    /// At least one announced address reachable without tor.
    pub fn is_clearnet(&self) -> bool {
        self.addresses.iter().any(|addr| {
            let host = match addr.rsplit_once(':') {
                Some((host, _port)) => host,
                None => addr.as_str(),
            };
            !host.trim_end_matches('.').ends_with(".onion")
        })
    }
}

/// A public channel edge of the graph.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub node1: PubKey,
    pub node2: PubKey,
    pub capacity_sats: u64,
}

/// Point-in-time snapshot of the channel graph. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<PubKey, Node>,
    channels: BTreeMap<ChannelId, Channel>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, channels: Vec<Channel>) -> Self {
        let mut nodes: HashMap<PubKey, Node> = nodes
            .into_iter()
            .map(|mut n| {
                n.channels.clear();
                (n.pubkey.clone(), n)
            })
            .collect();
        let channels: BTreeMap<ChannelId, Channel> =
            channels.into_iter().map(|c| (c.id, c)).collect();

        // BTreeMap iteration keeps incident lists sorted by id
        for ch in channels.values() {
            if let Some(n) = nodes.get_mut(&ch.node1) {
                n.channels.push(ch.id);
            }
            if ch.node2 != ch.node1 {
                if let Some(n) = nodes.get_mut(&ch.node2) {
                    n.channels.push(ch.id);
                }
            }
        }

        Self { nodes, channels }
    }

    pub fn node(&self, pubkey: &PubKey) -> Option<&Node> {
        self.nodes.get(pubkey)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sum of the capacities of a node's channels.
    pub fn capacity_sats(&self, node: &Node) -> u64 {
        node.channels
            .iter()
            .filter_map(|id| self.channels.get(id))
            .map(|c| c.capacity_sats)
            .sum()
    }
}

/// Deterministic valid pubkey for tests: `02` followed by `n` repeated.
#[cfg(test)]
pub fn pk(n: u8) -> PubKey {
    PubKey(format!("02{}", [n; 32][..].to_lower_hex_string()))
}
