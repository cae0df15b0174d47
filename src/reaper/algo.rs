//! Idle channel ranking.
//!
//! A forward counts toward both the channel it came in on and the channel it
//! left through. Channels with at most `max_forwards` forwards in the window are
//! reported, least used first; among equally idle channels the largest (most
//! capital tied up) comes first, then the lowest id.

use crate::graph::ChannelId;
use crate::state::{ForwardEvent, LocalChannel};
use log::debug;
use std::collections::HashMap;

/// A channel that routed little or nothing in the lookback window.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub channel: LocalChannel,
    pub forwards: usize,
}

pub fn count_forwards(forwards: &[ForwardEvent]) -> HashMap<ChannelId, usize> {
    let mut counts = HashMap::new();
    for fwd in forwards {
        *counts.entry(fwd.chan_in).or_insert(0) += 1;
        if fwd.chan_out != fwd.chan_in {
            *counts.entry(fwd.chan_out).or_insert(0) += 1;
        }
    }
    counts
}

pub fn rank(channels: Vec<LocalChannel>, forwards: &[ForwardEvent], max_forwards: usize) -> Vec<Reaped> {
    let counts = count_forwards(forwards);

    let mut reaped: Vec<Reaped> = channels
        .into_iter()
        .map(|channel| {
            let forwards = counts.get(&channel.id).copied().unwrap_or(0);
            Reaped { channel, forwards }
        })
        .filter(|r| {
            if r.forwards > max_forwards {
                debug!("Reaper: channel {} busy ({} forwards)", r.channel.id, r.forwards);
                return false;
            }
            true
        })
        .collect();

    reaped.sort_by(|a, b| {
        a.forwards
            .cmp(&b.forwards)
            .then(b.channel.capacity_sats.cmp(&a.channel.capacity_sats))
            .then(a.channel.id.cmp(&b.channel.id))
    });
    reaped
}
