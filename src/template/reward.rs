//! Base emission and weight-penalty arithmetic
//!
//! Mirrors the reference chain's rules: tail-emission floor on the base
//! reward and a quadratic penalty for blocks heavier than the median.

/// Total money supply driving the emission curve
const MONEY_SUPPLY: u64 = u64::MAX;

/// Right-shift applied to the remaining supply per block
const EMISSION_SPEED_FACTOR: u32 = 19;

/// Tail emission floor in atomic units
const TAIL_EMISSION: u64 = 600_000_000_000;

/// Median weight never drops below the full-reward zone
const FULL_REWARD_ZONE: u64 = 300_000;

/// Base block reward before fees and penalty
pub fn base_block_reward(already_generated_coins: u64) -> u64 {
    let base = (MONEY_SUPPLY - already_generated_coins) >> EMISSION_SPEED_FACTOR;
    base.max(TAIL_EMISSION)
}

/// Reward after the over-median weight penalty.
///
/// `None` when the block weight exceeds twice the median and the block
/// would be invalid. For `weight <= median` the full base reward is kept;
/// above it the reward scales by `1 - ((weight - median) / median)^2`,
/// computed in integers exactly as the reference chain does.
pub fn penalized_reward(base_reward: u64, median_weight: u64, block_weight: u64) -> Option<u64> {
    let median = median_weight.max(FULL_REWARD_ZONE);
    if block_weight <= median {
        return Some(base_reward);
    }
    if block_weight > median * 2 {
        return None;
    }

    // base * weight * (2*median - weight) / median^2
    let w = block_weight as u128;
    let m = median as u128;
    let product = (base_reward as u128) * w * (2 * m - w);
    Some((product / (m * m)) as u64)
}

/// Penalty amount for a given weight
pub fn weight_penalty(base_reward: u64, median_weight: u64, block_weight: u64) -> Option<u64> {
    penalized_reward(base_reward, median_weight, block_weight).map(|r| base_reward - r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_emission_floor() {
        assert_eq!(base_block_reward(u64::MAX - 1), TAIL_EMISSION);
        // early chain: large reward
        assert!(base_block_reward(0) > TAIL_EMISSION);
        assert_eq!(base_block_reward(0), MONEY_SUPPLY >> EMISSION_SPEED_FACTOR);
    }

    #[test]
    fn test_no_penalty_at_or_below_median() {
        let base = 1_000_000;
        assert_eq!(penalized_reward(base, 400_000, 0), Some(base));
        assert_eq!(penalized_reward(base, 400_000, 400_000), Some(base));
    }

    #[test]
    fn test_penalty_scales_quadratically() {
        let base = 1_000_000;
        let median = 400_000;

        // 50% over the median loses a quarter of the reward
        let r = penalized_reward(base, median, 600_000).unwrap();
        assert_eq!(r, base - base / 4);

        // at exactly double the median the reward reaches zero
        let r = penalized_reward(base, median, 800_000).unwrap();
        assert_eq!(r, 0);
    }

    #[test]
    fn test_over_double_median_is_invalid() {
        assert_eq!(penalized_reward(1_000_000, 400_000, 800_001), None);
    }

    #[test]
    fn test_median_clamped_to_full_reward_zone() {
        // tiny medians behave as if they were the full-reward zone
        let base = 1_000_000;
        assert_eq!(penalized_reward(base, 1_000, 200_000), Some(base));
        assert!(penalized_reward(base, 1_000, 450_000).unwrap() < base);
    }

    #[test]
    fn test_weight_penalty_is_difference() {
        let base = 1_000_000;
        let penalty = weight_penalty(base, 400_000, 600_000).unwrap();
        assert_eq!(penalty, base / 4);
    }
}
