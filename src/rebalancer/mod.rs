pub mod auto;
pub mod circular;

pub use auto::rebalance_all;
pub use circular::rebalance;

use crate::error::{Error, Result};
use crate::graph::ChannelId;

/// One circular payment tried by the rebalancer.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub out_channel: ChannelId,
    pub amount_sats: u64,
    pub fee_limit_sats: u64,
    /// Fee paid on success, the failure otherwise.
    pub outcome: std::result::Result<u64, String>,
}

/// What a targeted rebalance achieved.
#[derive(Debug, Clone, Default)]
pub struct Rebalanced {
    /// Share of the out channel's capacity moved.
    pub percent: f64,
    pub moved_sats: u64,
    pub fee_sats: u64,
    pub attempts: Vec<Attempt>,
}

pub(crate) fn validate_percents(step_percent: f64, max_percent: f64) -> Result<()> {
    if !(step_percent > 0.0 && step_percent <= 100.0) {
        return Err(Error::Validation(format!(
            "step percent {} must be in (0, 100]",
            step_percent
        )));
    }
    if !(0.0..=100.0).contains(&max_percent) {
        return Err(Error::Validation(format!(
            "max percent {} must be in [0, 100]",
            max_percent
        )));
    }
    Ok(())
}

/// `percent` of `capacity_sats`, rounded down.
pub(crate) fn percent_of(capacity_sats: u64, percent: f64) -> u64 {
    (capacity_sats as f64 * percent / 100.0) as u64
}

/// Fee allowance in satoshis for `amount_sats` at `ppm`, rounded down.
pub(crate) fn fee_limit(amount_sats: u64, ppm: u32) -> u64 {
    (amount_sats as u128 * ppm as u128 / 1_000_000) as u64
}
