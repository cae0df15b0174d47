use crate::candidates::Candidate;
use crate::error::{Error, Result};
use crate::fees::{FeeUpdate, LiquidityFees};
use crate::graph::ChannelId;
use crate::reaper::Reaped;
use crate::rebalancer::Attempt;
use std::collections::BTreeMap;
use std::fmt::Write;

const SATS_PER_BTC: f64 = 100_000_000.0;
const MAX_BTC: f64 = 21_000_000.0;

/// Whole satoshis in `btc`, rounded to the nearest one.
pub fn btc_to_sats(btc: f64) -> Result<u64> {
    if !(btc.is_finite() && (0.0..=MAX_BTC).contains(&btc)) {
        return Err(Error::Validation(format!(
            "{} BTC is not an amount between 0 and {}",
            btc, MAX_BTC
        )));
    }
    Ok((btc * SATS_PER_BTC).round() as u64)
}

pub fn fee_table(policy: &LiquidityFees) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Liquidity fees");
    let _ = writeln!(out, "==============");
    let thresholds = policy.thresholds();
    for (i, fee) in policy.fees().iter().enumerate() {
        let range = match (i.checked_sub(1).map(|j| thresholds[j]), thresholds.get(i)) {
            (None, Some(lower)) => format!(">= {}%", lower),
            (Some(upper), Some(lower)) => format!("{}% - {}%", lower, upper),
            (Some(upper), None) => format!("< {}%", upper),
            (None, None) => "any".to_string(),
        };
        let _ = writeln!(out, "{:<16} {:>8} ppm", range, fee);
    }
    if policy.stickiness() > 0.0 {
        let _ = writeln!(out, "Stickiness:      {}%", policy.stickiness());
    }
    out
}

pub fn candidates_table(candidates: &[Candidate]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<66}  {:<24} {:>4} {:>9} {:>8} {:>12}  {}",
        "PUBKEY", "ALIAS", "DIST", "DISTANT", "CHANNELS", "CAPACITY", "UPDATED"
    );
    for c in candidates {
        let _ = writeln!(
            out,
            "{:<66}  {:<24} {:>4} {:>9} {:>8} {:>12.8}  {}",
            c.node.pubkey,
            truncate(&c.node.alias, 24),
            c.distance,
            c.distant_neighbors,
            c.channels,
            c.capacity_sats as f64 / SATS_PER_BTC,
            c.node.last_update.format("%Y-%m-%d %H:%M"),
        );
    }
    out
}

pub fn fee_update(update: &FeeUpdate) -> String {
    format!("{} -> {} ppm", update.channel_id, update.fee_ppm)
}

pub fn attempt(attempt: &Attempt) -> String {
    match &attempt.outcome {
        Ok(fee) => format!(
            "{}: sent {} sat, paid {} sat (limit {})",
            attempt.out_channel, attempt.amount_sats, fee, attempt.fee_limit_sats
        ),
        Err(reason) => format!(
            "{}: {} sat failed (limit {}): {}",
            attempt.out_channel, attempt.amount_sats, attempt.fee_limit_sats, reason
        ),
    }
}

pub fn rebalanced_table(moved: &BTreeMap<ChannelId, f64>) -> String {
    let mut out = String::new();
    for (id, percent) in moved {
        let _ = writeln!(out, "{:<20} {:>7.2}%", id, percent);
    }
    out
}

pub fn reaped_table(reaped: &[Reaped]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<66} {:>12} {:>8} {:>8}",
        "CHANNEL", "PEER", "CAPACITY", "LOCAL", "FORWARDS"
    );
    for r in reaped {
        let _ = writeln!(
            out,
            "{:<20} {:<66} {:>12.8} {:>7.1}% {:>8}",
            r.channel.id,
            r.channel.remote_pubkey,
            r.channel.capacity_sats as f64 / SATS_PER_BTC,
            r.channel.liquidity(),
            r.forwards,
        );
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
