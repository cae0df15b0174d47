//! Targeted circular rebalance.
//!
//! Moves up to `max_percent` of the out channel's capacity back to ourselves through
//! `last_hop`, in steps of `step_percent`. The fee budget for the whole call is
//! `max_fee_ppm` applied to the full `max_percent` amount; each step may spend its
//! own share or whatever budget is left, whichever is smaller.
//!
//! - A step that fails on fee is retried once at half size.
//! - Route, balance and fee failures end the loop and keep what was moved so far.
//! - Transport failures abort the call.
//! - Cancellation is honoured between steps.

use super::{fee_limit, percent_of, validate_percents, Attempt, Rebalanced};
use crate::client::LightningClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::{ChannelId, PubKey};
use crate::state::FeePpm;
use log::{debug, info, warn};
use tokio::sync::watch;

#[allow(clippy::too_many_arguments)]
pub async fn rebalance(
    config: &Config,
    client: &impl LightningClient,
    out_channel: ChannelId,
    last_hop: &PubKey,
    step_percent: f64,
    max_percent: f64,
    max_fee_ppm: FeePpm,
    cancel: &watch::Receiver<bool>,
) -> Result<Rebalanced> {
    validate_percents(step_percent, max_percent)?;
    if max_percent == 0.0 {
        debug!("Rebalancer: nothing to move for channel {}", out_channel);
        return Ok(Rebalanced::default());
    }
    let step_percent = step_percent.min(max_percent);

    let channels = client.list_owned_channels().await?;
    let out = channels
        .iter()
        .find(|c| c.id == out_channel)
        .ok_or_else(|| Error::Validation(format!("channel {} is not ours", out_channel)))?;
    if out.capacity_sats == 0 {
        return Ok(Rebalanced::default());
    }

    let capacity = out.capacity_sats;
    let max_amount = percent_of(capacity, max_percent);
    let step_amount = percent_of(capacity, step_percent).max(1);
    let budget = fee_limit(max_amount, max_fee_ppm);
    let mut local = out.local_sats;

    info!(
        "Rebalancer: channel {} -> {} moving up to {} sat in {} sat steps, fee budget {} sat",
        out_channel, last_hop, max_amount, step_amount, budget
    );

    let mut result = Rebalanced::default();
    'steps: while result.moved_sats < max_amount {
        if *cancel.borrow() {
            info!("Rebalancer: cancelled after {} sat", result.moved_sats);
            break;
        }

        let mut amount = step_amount.min(max_amount - result.moved_sats);
        if local < amount {
            info!(
                "Rebalancer: channel {} has {} sat local, less than a {} sat step",
                out_channel, local, amount
            );
            break;
        }
        let remaining = budget.saturating_sub(result.fee_sats);
        if max_fee_ppm > 0 && remaining == 0 {
            info!("Rebalancer: fee budget of {} sat spent", budget);
            break;
        }

        if config.general.dry_run {
            info!(
                "Rebalancer: would send {} sat out of {} via {} (fee limit {} sat)",
                amount,
                out_channel,
                last_hop,
                fee_limit(amount, max_fee_ppm).min(remaining)
            );
            info!("  (dry-run: not paying)");
            break;
        }

        let mut halved = false;
        loop {
            let limit = fee_limit(amount, max_fee_ppm).min(remaining);
            let outcome = client
                .send_circular_payment(out_channel, last_hop, amount, limit)
                .await;
            match outcome {
                Ok(fee) => {
                    debug!("Rebalancer: moved {} sat for {} sat fee", amount, fee);
                    result.attempts.push(Attempt {
                        out_channel,
                        amount_sats: amount,
                        fee_limit_sats: limit,
                        outcome: Ok(fee),
                    });
                    result.moved_sats += amount;
                    result.fee_sats += fee;
                    local = local.saturating_sub(amount + fee);
                    if result.fee_sats > budget {
                        warn!(
                            "Rebalancer: paid {} sat against a {} sat budget, stopping",
                            result.fee_sats, budget
                        );
                        break 'steps;
                    }
                    break;
                }
                Err(e @ Error::FeeExceeded { .. }) if !halved && amount > 1 => {
                    debug!("Rebalancer: {}, retrying at half size", e);
                    result.attempts.push(Attempt {
                        out_channel,
                        amount_sats: amount,
                        fee_limit_sats: limit,
                        outcome: Err(e.to_string()),
                    });
                    amount /= 2;
                    halved = true;
                }
                Err(e) if e.is_recoverable() => {
                    info!("Rebalancer: stopping, {}", e);
                    result.attempts.push(Attempt {
                        out_channel,
                        amount_sats: amount,
                        fee_limit_sats: limit,
                        outcome: Err(e.to_string()),
                    });
                    break 'steps;
                }
                Err(e) => return Err(e),
            }
        }
    }

    result.percent = result.moved_sats as f64 * 100.0 / capacity as f64;
    info!(
        "Rebalancer: channel {} moved {} sat ({:.2}%) for {} sat in fees",
        out_channel, result.moved_sats, result.percent, result.fee_sats
    );
    Ok(result)
}
