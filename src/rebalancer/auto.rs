use super::{circular, validate_percents};
use crate::client::LightningClient;
use crate::config::Config;
use crate::error::Result;
use crate::fees::LiquidityFees;
use crate::graph::ChannelId;
use crate::state::{LocalChannel, NodeState};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::watch;

/// Repeatedly move liquidity from the fullest channel to the emptiest one.
///
/// Each round re-reads balances, picks the untried pair with the widest liquidity
/// gap and runs a targeted rebalance between them, paying at most the schedule's
/// low-liquidity fee. Stops when no pair is at least `min_gap_percent` apart, after
/// `max_rounds`, or on cancellation.
///
/// Returns the percentage of capacity moved per touched channel.
pub async fn rebalance_all(
    config: &Config,
    client: &impl LightningClient,
    policy: &LiquidityFees,
    step_percent: f64,
    max_percent: f64,
    cancel: &watch::Receiver<bool>,
) -> Result<BTreeMap<ChannelId, f64>> {
    validate_percents(step_percent, max_percent)?;
    let mut moved = BTreeMap::new();
    if max_percent == 0.0 {
        return Ok(moved);
    }

    let max_fee_ppm = policy.rebalance_fee();
    let mut tried = HashSet::new();

    for round in 0..config.rebalancer.max_rounds {
        if *cancel.borrow() {
            info!("Rebalancer: cancelled after {} rounds", round);
            break;
        }

        let state = NodeState::collect(client).await?;
        let Some((source, destination)) =
            pick_pair(&state.channels, &tried, config.rebalancer.min_gap_percent)
        else {
            debug!("Rebalancer: no pair far enough apart, done");
            break;
        };
        tried.insert((source.id, destination.id));

        info!(
            "Rebalancer: round {}: {} ({:.1}%) -> {} ({:.1}%)",
            round + 1,
            source.id,
            source.liquidity(),
            destination.id,
            destination.liquidity()
        );

        let result = circular::rebalance(
            config,
            client,
            source.id,
            &destination.remote_pubkey,
            step_percent,
            max_percent,
            max_fee_ppm,
            cancel,
        )
        .await?;

        *moved.entry(source.id).or_insert(0.0) += result.percent;
        let received = if destination.capacity_sats > 0 {
            result.moved_sats as f64 * 100.0 / destination.capacity_sats as f64
        } else {
            0.0
        };
        *moved.entry(destination.id).or_insert(0.0) += received;
    }

    Ok(moved)
}

/// Widest-gap pair of distinct active channels to distinct peers, skipping pairs
/// already tried. Ties go to the lower channel ids.
fn pick_pair(
    channels: &[LocalChannel],
    tried: &HashSet<(ChannelId, ChannelId)>,
    min_gap_percent: f64,
) -> Option<(LocalChannel, LocalChannel)> {
    let usable: Vec<&LocalChannel> = channels
        .iter()
        .filter(|c| c.active && c.capacity_sats > 0)
        .collect();

    let mut best: Option<(f64, &LocalChannel, &LocalChannel)> = None;
    for source in &usable {
        for destination in &usable {
            if source.id == destination.id
                || source.remote_pubkey == destination.remote_pubkey
                || destination.remote_sats == 0
                || tried.contains(&(source.id, destination.id))
            {
                continue;
            }
            let gap = source.liquidity() - destination.liquidity();
            if gap < min_gap_percent {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_gap, best_src, best_dst)) => {
                    gap > best_gap
                        || (gap == best_gap
                            && (source.id, destination.id) < (best_src.id, best_dst.id))
                }
            };
            if better {
                best = Some((gap, source, destination));
            }
        }
    }

    best.map(|(_, s, d)| (s.clone(), d.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{local_channel, MockClient, PaymentOutcome};
    use crate::graph::pk;

    fn policy() -> LiquidityFees {
        LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 0.0).unwrap()
    }

    #[test]
    fn test_pick_pair_widest_gap() {
        let channels = vec![
            local_channel(1, 1, 1_000_000, 600_000),
            local_channel(2, 2, 1_000_000, 900_000),
            local_channel(3, 3, 1_000_000, 100_000),
            local_channel(4, 4, 1_000_000, 400_000),
        ];
        let (src, dst) = pick_pair(&channels, &HashSet::new(), 10.0).unwrap();
        assert_eq!(src.id, ChannelId(2));
        assert_eq!(dst.id, ChannelId(3));
    }

    #[test]
    fn test_pick_pair_skips_tried_and_small_gaps() {
        let channels = vec![
            local_channel(1, 1, 1_000_000, 900_000),
            local_channel(2, 2, 1_000_000, 100_000),
            local_channel(3, 3, 1_000_000, 850_000),
        ];
        let mut tried = HashSet::new();
        tried.insert((ChannelId(1), ChannelId(2)));
        let (src, dst) = pick_pair(&channels, &tried, 10.0).unwrap();
        assert_eq!((src.id, dst.id), (ChannelId(3), ChannelId(2)));

        tried.insert((ChannelId(3), ChannelId(2)));
        assert!(pick_pair(&channels, &tried, 10.0).is_none());
    }

    #[test]
    fn test_pick_pair_ignores_inactive_and_same_peer() {
        let mut inactive = local_channel(1, 1, 1_000_000, 1_000_000);
        inactive.active = false;
        let channels = vec![
            inactive,
            local_channel(2, 2, 1_000_000, 900_000),
            local_channel(3, 2, 1_000_000, 0),
        ];
        assert!(pick_pair(&channels, &HashSet::new(), 10.0).is_none());
    }

    #[test]
    fn test_pick_pair_balanced_channels() {
        let channels = vec![
            local_channel(1, 1, 1_000_000, 520_000),
            local_channel(2, 2, 1_000_000, 480_000),
        ];
        assert!(pick_pair(&channels, &HashSet::new(), 10.0).is_none());
    }

    #[tokio::test]
    async fn test_rebalance_all_moves_from_full_to_empty() {
        let mut mock = MockClient::new();
        mock.set_channels(vec![
            local_channel(1, 1, 1_000_000, 1_000_000),
            local_channel(2, 2, 1_000_000, 0),
        ]);
        let (_tx, cancel) = watch::channel(false);

        let moved = rebalance_all(&Config::default(), &mock, &policy(), 10.0, 20.0, &cancel)
            .await
            .unwrap();

        assert!((moved[&ChannelId(1)] - 20.0).abs() < 1e-9);
        assert!((moved[&ChannelId(2)] - 20.0).abs() < 1e-9);
        let calls = mock.payment_calls.lock().unwrap();
        assert!(calls.iter().all(|c| c.out_channel == ChannelId(1)));
        assert!(calls.iter().all(|c| c.last_hop == pk(2)));
        // fee limit follows the low-liquidity fee, 500 ppm of each 100_000 sat step
        assert!(calls.iter().all(|c| c.max_fee_sats == 50));
    }

    #[tokio::test]
    async fn test_rebalance_all_stops_when_balanced() {
        let mut mock = MockClient::new();
        mock.set_channels(vec![
            local_channel(1, 1, 1_000_000, 520_000),
            local_channel(2, 2, 1_000_000, 480_000),
        ]);
        let (_tx, cancel) = watch::channel(false);

        let moved = rebalance_all(&Config::default(), &mock, &policy(), 10.0, 20.0, &cancel)
            .await
            .unwrap();
        assert!(moved.is_empty());
        assert!(mock.payment_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebalance_all_never_pairs_channel_with_itself() {
        let mut mock = MockClient::new();
        mock.set_channels(vec![
            local_channel(1, 1, 1_000_000, 1_000_000),
            local_channel(2, 2, 1_000_000, 0),
            local_channel(3, 3, 2_000_000, 1_000_000),
        ]);
        mock.script_payments(&[PaymentOutcome::NoRoute; 10]);
        let (_tx, cancel) = watch::channel(false);

        rebalance_all(&Config::default(), &mock, &policy(), 10.0, 10.0, &cancel)
            .await
            .unwrap();

        let calls = mock.payment_calls.lock().unwrap();
        assert!(!calls.is_empty());
        for call in calls.iter() {
            let out = mock.channel(call.out_channel.0);
            assert_ne!(out.remote_pubkey, call.last_hop);
        }
    }

    #[tokio::test]
    async fn test_rebalance_all_round_limit() {
        let mut mock = MockClient::new();
        mock.set_channels(vec![
            local_channel(1, 1, 1_000_000, 1_000_000),
            local_channel(2, 2, 1_000_000, 0),
            local_channel(3, 3, 1_000_000, 0),
        ]);
        mock.script_payments(&[PaymentOutcome::NoRoute; 10]);
        let mut config = Config::default();
        config.rebalancer.max_rounds = 1;
        let (_tx, cancel) = watch::channel(false);

        rebalance_all(&config, &mock, &policy(), 10.0, 10.0, &cancel)
            .await
            .unwrap();
        assert_eq!(mock.payment_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rebalance_all_zero_max() {
        let mut mock = MockClient::new();
        mock.fail_reads = true;
        let (_tx, cancel) = watch::channel(false);
        let moved = rebalance_all(&Config::default(), &mock, &policy(), 10.0, 0.0, &cancel)
            .await
            .unwrap();
        assert!(moved.is_empty());
    }
}
