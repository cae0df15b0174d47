use crate::graph::{Graph, PubKey};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Hop distances from a root node over the undirected channel graph.
///
/// Built from the channel list, so endpoints missing from the node list are still
/// walked through. Assumed peers start at distance 1, as if channels to them
/// already existed.
pub struct Span<'g> {
    distances: HashMap<&'g PubKey, u32>,
    adjacency: HashMap<&'g PubKey, BTreeSet<&'g PubKey>>,
}

impl<'g> Span<'g> {
    pub fn new(graph: &'g Graph, root: &'g PubKey, assume: &'g [PubKey]) -> Self {
        let mut adjacency: HashMap<&PubKey, BTreeSet<&PubKey>> = HashMap::new();
        for ch in graph.channels() {
            if ch.node1 == ch.node2 {
                continue;
            }
            adjacency.entry(&ch.node1).or_default().insert(&ch.node2);
            adjacency.entry(&ch.node2).or_default().insert(&ch.node1);
        }

        let mut distances = HashMap::new();
        let mut queue = VecDeque::new();
        distances.insert(root, 0);
        queue.push_back(root);
        for peer in assume {
            if !distances.contains_key(peer) {
                distances.insert(peer, 1);
                queue.push_back(peer);
            }
        }

        while let Some(current) = queue.pop_front() {
            let next = distances[current] + 1;
            if let Some(neighbors) = adjacency.get(current) {
                for &neighbor in neighbors {
                    if !distances.contains_key(neighbor) {
                        distances.insert(neighbor, next);
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        Self {
            distances,
            adjacency,
        }
    }

    /// `None` when the node is not connected to the root at all.
    pub fn distance(&self, pubkey: &PubKey) -> Option<u32> {
        self.distances.get(pubkey).copied()
    }

    pub fn reachable(&self) -> usize {
        self.distances.len()
    }

    /// Distinct neighbours at least `min_distance` hops from the root.
    pub fn distant_neighbors(&self, pubkey: &PubKey, min_distance: u32) -> usize {
        self.adjacency.get(pubkey).map_or(0, |neighbors| {
            neighbors
                .iter()
                .filter(|n| self.distance(n).is_some_and(|d| d >= min_distance))
                .count()
        })
    }
}
