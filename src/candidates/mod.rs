pub mod span;

use crate::client::LightningClient;
use crate::config::CandidatesConfig;
use crate::error::{Error, Result};
use crate::graph::{Graph, Node, PubKey};
use chrono::{DateTime, Utc};
use log::{debug, info};
use span::Span;

/// Filters for the channel candidate search. All of them must hold.
#[derive(Debug, Clone)]
pub struct CandidatesRequest {
    /// Node to measure distances from; the connected node when `None`.
    pub pubkey: Option<PubKey>,
    pub min_capacity_sats: u64,
    pub min_channels: usize,
    pub min_distance: u32,
    pub min_distant_neighbors: usize,
    /// Skip nodes whose last gossip update is older than this.
    pub min_updated: DateTime<Utc>,
    /// Nodes treated as if the root already had channels with them.
    pub assume: Vec<PubKey>,
    pub limit: usize,
    pub clearnet: bool,
}

impl CandidatesRequest {
    pub fn from_config(config: &CandidatesConfig) -> Result<Self> {
        Ok(Self {
            pubkey: None,
            min_capacity_sats: config.min_capacity_sats,
            min_channels: config.min_channels,
            min_distance: config.min_distance,
            min_distant_neighbors: config.min_distant_neighbors,
            min_updated: config.min_updated(Utc::now())?,
            assume: Vec::new(),
            limit: config.limit,
            clearnet: config.clearnet,
        })
    }

    pub fn validate(&self) -> Result<()> {
        // Distance 0 is the root and 1 an existing peer
        if self.min_distance < 2 {
            return Err(Error::Validation(format!(
                "minimum distance {} must be at least 2",
                self.min_distance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub node: Node,
    pub distance: u32,
    pub distant_neighbors: usize,
    pub capacity_sats: u64,
    pub channels: usize,
}

/// Find nodes worth opening a channel to: far from the root and well connected to
/// other far nodes.
pub async fn candidates(
    client: &impl LightningClient,
    request: &CandidatesRequest,
) -> Result<Vec<Candidate>> {
    request.validate()?;

    let root = match &request.pubkey {
        Some(pubkey) => pubkey.clone(),
        None => client.get_root_info().await?.pubkey,
    };
    let graph = client.get_graph().await?;
    if let Some(node) = graph.node(&root) {
        debug!("Candidates: measuring from {} ({})", node.alias, root);
    }
    debug!(
        "Candidates: graph has {} nodes and {} channels",
        graph.node_count(),
        graph.channel_count()
    );

    let found = score(&graph, &root, request)?;
    info!("Candidates: {} nodes selected from {}", found.len(), root);
    Ok(found)
}

/// Filter and rank the graph's nodes. Furthest first, then most distant neighbours,
/// then by pubkey.
pub fn score(graph: &Graph, root: &PubKey, request: &CandidatesRequest) -> Result<Vec<Candidate>> {
    request.validate()?;

    let span = Span::new(graph, root, &request.assume);
    debug!("Candidates: {} nodes reachable from {}", span.reachable(), root);

    let mut found: Vec<Candidate> = graph
        .nodes()
        .filter_map(|node| {
            let distance = span.distance(&node.pubkey)?;
            if distance < request.min_distance {
                return None;
            }
            let channels = node.channels.len();
            if channels < request.min_channels {
                return None;
            }
            let capacity_sats = graph.capacity_sats(node);
            if capacity_sats < request.min_capacity_sats {
                return None;
            }
            if node.last_update < request.min_updated {
                return None;
            }
            if request.clearnet && !node.is_clearnet() {
                return None;
            }
            let distant_neighbors = span.distant_neighbors(&node.pubkey, request.min_distance);
            if distant_neighbors < request.min_distant_neighbors {
                return None;
            }
            Some(Candidate {
                node: node.clone(),
                distance,
                distant_neighbors,
                capacity_sats,
                channels,
            })
        })
        .collect();

    found.sort_by(|a, b| {
        b.distance
            .cmp(&a.distance)
            .then(b.distant_neighbors.cmp(&a.distant_neighbors))
            .then_with(|| a.node.pubkey.cmp(&b.node.pubkey))
    });
    found.truncate(request.limit);

    Ok(found)
}
