//! Epsilon-greedy multi-armed bandit over a fixed set of arms.

use linkbandit_core::config::{validate_epsilon, UpdateRule};
use linkbandit_core::{BanditError, BanditResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

/// Per-arm statistics. `count == 0` means the estimate is still the default.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ArmStats {
    pub count: u64,
    pub value: f64,
}

fn next_estimate(rule: UpdateRule, current: f64, reward: f64, new_count: u64) -> f64 {
    match rule {
        UpdateRule::IncrementalMean => current + (reward - current) / new_count as f64,
        UpdateRule::ExponentialSmoothing { alpha } => current + alpha * (reward - current),
    }
}

/// Explores uniformly with probability `epsilon`, otherwise exploits the arm
/// with the highest value estimate (lowest index wins ties).
///
/// The index returned by the last `select()` is held as the pending selection;
/// `update` and `abandon` must name it.
#[derive(Debug, Clone)]
pub struct EpsilonGreedy {
    epsilon: f64,
    rule: UpdateRule,
    arms: Vec<ArmStats>,
    pending: Option<usize>,
    rng: StdRng,
}

impl EpsilonGreedy {
    /// Create a policy seeded from OS entropy.
    pub fn new(num_arms: usize, epsilon: f64, rule: UpdateRule) -> BanditResult<Self> {
        Self::build(num_arms, epsilon, rule, StdRng::from_entropy())
    }

    /// Create a policy whose exploration draws are reproducible.
    pub fn with_seed(
        num_arms: usize,
        epsilon: f64,
        rule: UpdateRule,
        seed: u64,
    ) -> BanditResult<Self> {
        Self::build(num_arms, epsilon, rule, StdRng::seed_from_u64(seed))
    }

    fn build(num_arms: usize, epsilon: f64, rule: UpdateRule, rng: StdRng) -> BanditResult<Self> {
        if num_arms == 0 {
            return Err(BanditError::invalid_config("policy needs at least one arm"));
        }
        validate_epsilon(epsilon)?;
        rule.validate()?;

        Ok(Self {
            epsilon,
            rule,
            arms: vec![ArmStats::default(); num_arms],
            pending: None,
            rng,
        })
    }

    /// Pick the next arm to try.
    pub fn select(&mut self) -> usize {
        let index = if self.rng.gen::<f64>() < self.epsilon {
            self.rng.gen_range(0..self.arms.len())
        } else {
            self.best_arm()
        };
        self.pending = Some(index);
        index
    }

    /// Fold an observed reward into the pending arm's estimate.
    pub fn update(&mut self, index: usize, reward: f64) -> BanditResult<()> {
        self.check_pending(index)?;
        if !reward.is_finite() {
            return Err(BanditError::PolicyContractViolation(format!(
                "reward for arm {index} is not finite: {reward}"
            )));
        }

        let arm = &mut self.arms[index];
        arm.count += 1;
        arm.value = next_estimate(self.rule, arm.value, reward, arm.count);
        self.pending = None;

        debug!(arm = index, count = arm.count, value = arm.value, "arm estimate updated");
        Ok(())
    }

    /// Release the pending selection without touching any statistics.
    pub fn abandon(&mut self, index: usize) -> BanditResult<()> {
        self.check_pending(index)?;
        self.pending = None;
        Ok(())
    }

    fn check_pending(&self, index: usize) -> BanditResult<()> {
        if index >= self.arms.len() {
            return Err(BanditError::PolicyContractViolation(format!(
                "arm index {index} out of range for {} arms",
                self.arms.len()
            )));
        }
        match self.pending {
            Some(pending) if pending == index => Ok(()),
            Some(pending) => Err(BanditError::PolicyContractViolation(format!(
                "arm {index} was not selected this trial (pending selection is arm {pending})"
            ))),
            None => Err(BanditError::PolicyContractViolation(format!(
                "arm {index} was not selected this trial (no pending selection)"
            ))),
        }
    }

    /// Index of the highest estimate; the first one seen wins a tie.
    pub fn best_arm(&self) -> usize {
        let mut best = 0;
        for (i, arm) in self.arms.iter().enumerate().skip(1) {
            if arm.value > self.arms[best].value {
                best = i;
            }
        }
        best
    }

    pub fn num_arms(&self) -> usize {
        self.arms.len()
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn rule(&self) -> UpdateRule {
        self.rule
    }

    pub fn arms(&self) -> &[ArmStats] {
        &self.arms
    }

    pub fn counts(&self) -> Vec<u64> {
        self.arms.iter().map(|a| a.count).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.arms.iter().map(|a| a.value).collect()
    }

    pub fn pending(&self) -> Option<usize> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pull(policy: &mut EpsilonGreedy, arm: usize, reward: f64) {
        policy.pending = Some(arm);
        policy.update(arm, reward).unwrap();
    }

    #[test]
    fn test_rejects_invalid_construction() {
        assert!(EpsilonGreedy::new(0, 0.1, UpdateRule::IncrementalMean).is_err());
        assert!(EpsilonGreedy::new(3, -0.1, UpdateRule::IncrementalMean).is_err());
        assert!(EpsilonGreedy::new(3, 1.1, UpdateRule::IncrementalMean).is_err());
        assert!(
            EpsilonGreedy::new(3, 0.1, UpdateRule::ExponentialSmoothing { alpha: 1.5 }).is_err()
        );
        let rule = UpdateRule::ExponentialSmoothing { alpha: 1.0 };
        assert!(EpsilonGreedy::new(1, 1.0, rule).is_ok());
    }

    #[test]
    fn test_greedy_picks_highest_estimate() {
        let mut policy =
            EpsilonGreedy::with_seed(4, 0.0, UpdateRule::IncrementalMean, 7).unwrap();
        pull(&mut policy, 0, 1.0);
        pull(&mut policy, 2, 5.0);
        pull(&mut policy, 3, 3.0);

        for _ in 0..50 {
            assert_eq!(policy.select(), 2);
        }
    }

    #[test]
    fn test_ties_break_to_lowest_index() {
        let mut policy =
            EpsilonGreedy::with_seed(3, 0.0, UpdateRule::IncrementalMean, 1).unwrap();
        // All untried: everything sits at the default estimate.
        assert_eq!(policy.select(), 0);

        pull(&mut policy, 1, 4.0);
        pull(&mut policy, 2, 4.0);
        assert_eq!(policy.select(), 1);
    }

    #[test]
    fn test_full_exploration_is_roughly_uniform() {
        let mut policy =
            EpsilonGreedy::with_seed(4, 1.0, UpdateRule::IncrementalMean, 42).unwrap();
        pull(&mut policy, 3, 100.0);

        let mut hits = [0u32; 4];
        let draws = 40_000;
        for _ in 0..draws {
            hits[policy.select()] += 1;
        }
        for (arm, &n) in hits.iter().enumerate() {
            let share = n as f64 / draws as f64;
            assert!((share - 0.25).abs() < 0.02, "arm {arm} share {share}");
        }
    }

    #[test]
    fn test_incremental_mean_matches_arithmetic_mean() {
        let mut policy =
            EpsilonGreedy::with_seed(2, 0.0, UpdateRule::IncrementalMean, 0).unwrap();
        let rewards = [3.0, 9.0, -1.5, 4.5, 10.0];
        for r in rewards {
            pull(&mut policy, 1, r);
        }
        let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
        assert!((policy.values()[1] - mean).abs() < 1e-12);
        assert_eq!(policy.counts(), vec![0, 5]);
        assert_eq!(policy.values()[0], 0.0);
    }

    #[test]
    fn test_exponential_smoothing_two_steps() {
        let alpha = 0.3;
        let mut policy = EpsilonGreedy::with_seed(
            1,
            0.0,
            UpdateRule::ExponentialSmoothing { alpha },
            0,
        )
        .unwrap();
        pull(&mut policy, 0, 10.0);
        pull(&mut policy, 0, 20.0);

        let expected = alpha * 20.0 + (1.0 - alpha) * (alpha * 10.0);
        assert!((policy.values()[0] - expected).abs() < 1e-12);
        assert_eq!(policy.counts()[0], 2);
    }

    #[test]
    fn test_update_requires_pending_selection() {
        let mut policy =
            EpsilonGreedy::with_seed(3, 0.0, UpdateRule::IncrementalMean, 0).unwrap();

        let err = policy.update(0, 1.0).unwrap_err();
        assert!(matches!(err, BanditError::PolicyContractViolation(_)));

        let chosen = policy.select();
        let other = (chosen + 1) % 3;
        assert!(matches!(
            policy.update(other, 1.0),
            Err(BanditError::PolicyContractViolation(_))
        ));
        assert!(matches!(
            policy.update(9, 1.0),
            Err(BanditError::PolicyContractViolation(_))
        ));

        policy.update(chosen, 1.0).unwrap();
        // The selection was consumed.
        assert!(policy.update(chosen, 1.0).is_err());
        assert_eq!(policy.counts()[chosen], 1);
    }

    #[test]
    fn test_non_finite_reward_is_rejected() {
        let mut policy =
            EpsilonGreedy::with_seed(2, 0.0, UpdateRule::IncrementalMean, 0).unwrap();
        let arm = policy.select();
        assert!(policy.update(arm, f64::NAN).is_err());
        assert_eq!(policy.counts()[arm], 0);
        assert_eq!(policy.pending(), Some(arm));
    }

    #[test]
    fn test_abandon_leaves_statistics_untouched() {
        let mut policy =
            EpsilonGreedy::with_seed(2, 0.0, UpdateRule::IncrementalMean, 0).unwrap();
        let arm = policy.select();
        policy.abandon(arm).unwrap();

        assert_eq!(policy.pending(), None);
        assert_eq!(policy.counts(), vec![0, 0]);
        assert_eq!(policy.values(), vec![0.0, 0.0]);
        assert!(policy.abandon(arm).is_err());
    }

    #[test]
    fn test_same_seed_same_selections() {
        let run = |seed| {
            let mut policy =
                EpsilonGreedy::with_seed(5, 0.5, UpdateRule::IncrementalMean, seed).unwrap();
            (0..100)
                .map(|i| {
                    let arm = policy.select();
                    policy.update(arm, (i % 7) as f64).unwrap();
                    arm
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
    }

    proptest! {
        #[test]
        fn prop_incremental_mean_is_arithmetic_mean(
            rewards in prop::collection::vec(-1.0e6f64..1.0e6, 1..200)
        ) {
            let mut policy =
                EpsilonGreedy::with_seed(3, 0.0, UpdateRule::IncrementalMean, 0).unwrap();
            for &r in &rewards {
                pull(&mut policy, 2, r);
            }
            let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
            let tol = 1e-9 * (1.0 + mean.abs()) + 1e-6;
            prop_assert!((policy.values()[2] - mean).abs() < tol);
            prop_assert_eq!(policy.counts()[2], rewards.len() as u64);
        }

        #[test]
        fn prop_smoothing_stays_within_reward_hull(
            alpha in 0.01f64..=1.0,
            rewards in prop::collection::vec(0.0f64..100.0, 1..100)
        ) {
            let mut policy = EpsilonGreedy::with_seed(
                1, 0.0, UpdateRule::ExponentialSmoothing { alpha }, 0,
            ).unwrap();
            for &r in &rewards {
                pull(&mut policy, 0, r);
            }
            let v = policy.values()[0];
            // Starts at 0, so the estimate lives in [0, max reward].
            let max = rewards.iter().cloned().fold(0.0, f64::max);
            prop_assert!(v >= -1e-9 && v <= max + 1e-9);
        }
    }
}
