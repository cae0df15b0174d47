use crate::error::{Error, Result};
use crate::state::{FeePpm, LocalChannel};

/// Fee schedule keyed on local liquidity.
///
/// `thresholds` split the 0..100 liquidity range into `thresholds.len() + 1`
/// buckets, highest liquidity first, and `fees[i]` is charged in bucket `i`.
/// A channel exactly on a threshold belongs to the bucket above it.
///
/// With the default `[85, 15]` and `[5, 50, 500]`:
///
/// ```text
/// liquidity >= 85        5 ppm
/// 15 <= liquidity < 85   50 ppm
/// liquidity < 15         500 ppm
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityFees {
    thresholds: Vec<f64>,
    fees: Vec<FeePpm>,
    stickiness: f64,
}

impl LiquidityFees {
    pub fn new(thresholds: Vec<f64>, fees: Vec<FeePpm>, stickiness: f64) -> Result<Self> {
        if fees.len() != thresholds.len() + 1 {
            return Err(Error::Configuration(format!(
                "{} liquidity thresholds need {} fees, got {}",
                thresholds.len(),
                thresholds.len() + 1,
                fees.len()
            )));
        }
        for t in &thresholds {
            if !(t.is_finite() && *t > 0.0 && *t < 100.0) {
                return Err(Error::Configuration(format!(
                    "liquidity threshold {} must be between 0 and 100",
                    t
                )));
            }
        }
        if thresholds.windows(2).any(|w| w[0] <= w[1]) {
            return Err(Error::Configuration(format!(
                "liquidity thresholds {:?} must be strictly descending",
                thresholds
            )));
        }
        if !(stickiness.is_finite() && (0.0..100.0).contains(&stickiness)) {
            return Err(Error::Configuration(format!(
                "liquidity stickiness {} must be in [0, 100)",
                stickiness
            )));
        }
        Ok(Self {
            thresholds,
            fees,
            stickiness,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn fees(&self) -> &[FeePpm] {
        &self.fees
    }

    pub fn stickiness(&self) -> f64 {
        self.stickiness
    }

    /// Index of the bucket `liquidity` falls in.
    pub fn bucket(&self, liquidity: f64) -> usize {
        self.thresholds
            .iter()
            .position(|t| liquidity >= *t)
            .unwrap_or(self.thresholds.len())
    }

    pub fn fee_for(&self, liquidity: f64) -> FeePpm {
        self.fees[self.bucket(liquidity)]
    }

    /// Fee of the lowest-liquidity bucket; the most a rebalance should pay.
    pub fn rebalance_fee(&self) -> FeePpm {
        self.fees[self.fees.len() - 1]
    }

    /// The fee `channel` should move to, or `None` if it should stay put.
    ///
    /// A channel charging a rate outside the schedule always moves. Otherwise the
    /// liquidity must have crossed the threshold next to its current bucket by at
    /// least `stickiness` percentage points.
    pub fn potential_fee(&self, channel: &LocalChannel) -> Option<FeePpm> {
        let liquidity = channel.liquidity();
        let desired_bucket = self.bucket(liquidity);
        let desired = self.fee_for(liquidity);
        let current = channel.fee.rate_ppm;
        if current == desired {
            return None;
        }

        let Some(current_bucket) = self.bucket_of_fee(current, desired_bucket) else {
            return Some(desired);
        };
        if current_bucket == desired_bucket {
            return None;
        }

        let moved = if desired_bucket > current_bucket {
            // fell below the lower edge of the current bucket
            self.thresholds[current_bucket] - liquidity
        } else {
            // rose above the upper edge
            liquidity - self.thresholds[current_bucket - 1]
        };
        if moved < self.stickiness {
            return None;
        }
        Some(desired)
    }

    /// Bucket charging `fee`; with repeated fees, the one nearest `near`.
    fn bucket_of_fee(&self, fee: FeePpm, near: usize) -> Option<usize> {
        self.fees
            .iter()
            .enumerate()
            .filter(|(_, f)| **f == fee)
            .map(|(i, _)| i)
            .min_by_key(|i| i.abs_diff(near))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::local_channel;
    use crate::state::FeePolicy;

    fn default_fees() -> LiquidityFees {
        LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 0.0).unwrap()
    }

    fn channel(local_sats: u64, rate_ppm: FeePpm) -> LocalChannel {
        let mut ch = local_channel(1, 1, 1_000_000, local_sats);
        ch.fee = FeePolicy {
            rate_ppm,
            base_fee_msat: 0,
        };
        ch
    }

    #[test]
    fn test_fee_for_buckets() {
        let lf = default_fees();
        assert_eq!(lf.fee_for(100.0), 5);
        assert_eq!(lf.fee_for(90.0), 5);
        assert_eq!(lf.fee_for(50.0), 50);
        assert_eq!(lf.fee_for(10.0), 500);
        assert_eq!(lf.fee_for(0.0), 500);
    }

    #[test]
    fn test_fee_for_boundaries_go_up() {
        let lf = default_fees();
        assert_eq!(lf.fee_for(85.0), 5);
        assert_eq!(lf.fee_for(15.0), 50);
        assert_eq!(lf.fee_for(14.999), 500);
    }

    #[test]
    fn test_fee_for_is_monotone_for_ascending_fees() {
        let lf = default_fees();
        let mut last = FeePpm::MAX;
        for step in 0..=1000 {
            let fee = lf.fee_for(step as f64 / 10.0);
            assert!(fee <= last);
            last = fee;
        }
    }

    #[test]
    fn test_single_bucket() {
        let lf = LiquidityFees::new(vec![], vec![42], 0.0).unwrap();
        assert_eq!(lf.fee_for(0.0), 42);
        assert_eq!(lf.fee_for(100.0), 42);
        assert_eq!(lf.rebalance_fee(), 42);
    }

    #[test]
    fn test_rebalance_fee_is_last() {
        assert_eq!(default_fees().rebalance_fee(), 500);
    }

    #[test]
    fn test_new_rejects_wrong_fee_count() {
        let err = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50], 0.0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500, 5000], 0.0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_new_rejects_bad_thresholds() {
        assert!(LiquidityFees::new(vec![15.0, 85.0], vec![5, 50, 500], 0.0).is_err());
        assert!(LiquidityFees::new(vec![50.0, 50.0], vec![5, 50, 500], 0.0).is_err());
        assert!(LiquidityFees::new(vec![100.0], vec![5, 50], 0.0).is_err());
        assert!(LiquidityFees::new(vec![0.0], vec![5, 50], 0.0).is_err());
        assert!(LiquidityFees::new(vec![f64::NAN], vec![5, 50], 0.0).is_err());
    }

    #[test]
    fn test_new_rejects_bad_stickiness() {
        assert!(LiquidityFees::new(vec![50.0], vec![5, 50], -1.0).is_err());
        assert!(LiquidityFees::new(vec![50.0], vec![5, 50], 100.0).is_err());
    }

    #[test]
    fn test_potential_fee_unchanged() {
        let lf = default_fees();
        assert_eq!(lf.potential_fee(&channel(500_000, 50)), None);
    }

    #[test]
    fn test_potential_fee_off_schedule_always_moves() {
        let lf = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 10.0).unwrap();
        assert_eq!(lf.potential_fee(&channel(500_000, 1)), Some(50));
    }

    #[test]
    fn test_potential_fee_without_stickiness() {
        let lf = default_fees();
        // 14% liquidity currently charging the middle bucket
        assert_eq!(lf.potential_fee(&channel(140_000, 50)), Some(500));
        // 86% charging the middle bucket
        assert_eq!(lf.potential_fee(&channel(860_000, 50)), Some(5));
    }

    #[test]
    fn test_stickiness_holds_near_threshold() {
        let lf = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 5.0).unwrap();
        // 12% is only 3 points under 15
        assert_eq!(lf.potential_fee(&channel(120_000, 50)), None);
        // 88% is only 3 points over 85
        assert_eq!(lf.potential_fee(&channel(880_000, 50)), None);
    }

    #[test]
    fn test_stickiness_releases_past_margin() {
        let lf = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 5.0).unwrap();
        assert_eq!(lf.potential_fee(&channel(100_000, 50)), Some(500));
        assert_eq!(lf.potential_fee(&channel(80_000, 50)), Some(500));
        assert_eq!(lf.potential_fee(&channel(900_000, 50)), Some(5));
    }

    #[test]
    fn test_stickiness_across_several_buckets() {
        let lf = LiquidityFees::new(vec![85.0, 15.0], vec![5, 50, 500], 5.0).unwrap();
        // Charging the top bucket but now nearly empty: far past the 85 edge
        assert_eq!(lf.potential_fee(&channel(50_000, 5)), Some(500));
    }

    #[test]
    fn test_repeated_fees_use_nearest_bucket() {
        let lf = LiquidityFees::new(vec![85.0, 15.0], vec![50, 50, 500], 5.0).unwrap();
        // 50 ppm is charged in buckets 0 and 1; the channel sits in bucket 1 already
        assert_eq!(lf.potential_fee(&channel(500_000, 50)), None);
        // 12% is within 5 points of the 15 edge of bucket 1
        assert_eq!(lf.potential_fee(&channel(120_000, 50)), None);
    }
}
