// src/reward.rs
//
// Reward scoring for the door-closing task.
//
// Three interchangeable strategies produce the per-env reward:
//   embedding   - distance values from an external model, normalized
//                 against the first scored batch and remapped
//   handcrafted - closed-form in the two leaf angles
//   candidate   - a small family of generated shapes, one picked by seed
//
// Independent of the strategy, a goal layer derives success (sticky
// within the episode), a normalized closing score, and the timeout
// reset flag, and captures end-of-episode statistics the moment the
// flag fires.

use crate::config::{RewardConfig, RewardKind, RewardRemap};
use crate::error::TaskError;
use crate::state::BatchState;

/// External scorer mapping batch state to one distance value per env.
/// Smaller means closer to the goal rendering.
pub trait EmbeddingModel {
    fn evaluate(&mut self, state: &BatchState) -> Vec<f64>;
}

/// Asymmetric exponential remap: compress negatives toward -1, amplify
/// positives.
fn efficiency_remap(x: f64) -> f64 {
    if x < 0.0 {
        x.exp() - 1.0
    } else {
        10.0 * ((2.0 * x).exp() - 1.0)
    }
}

#[derive(Debug, Clone)]
pub enum RewardStrategy {
    Embedding {
        remap: RewardRemap,
        /// Mean of the first scored batch; fixed for the rollout.
        initial_value: Option<f64>,
    },
    Handcrafted,
    Candidate {
        variant: u64,
    },
}

impl RewardStrategy {
    pub fn from_config(cfg: &RewardConfig) -> Self {
        match cfg.kind {
            RewardKind::Embedding => RewardStrategy::Embedding {
                remap: cfg.remap,
                initial_value: None,
            },
            RewardKind::Handcrafted => RewardStrategy::Handcrafted,
            RewardKind::Candidate => RewardStrategy::Candidate {
                variant: cfg.candidate_seed % 3,
            },
        }
    }
}

/// Batch-level statistics surfaced next to the per-env buffers.
#[derive(Debug, Clone, Default)]
pub struct Extras {
    /// Batch mean of the right / left leaf angles this step.
    pub indicator_right: f64,
    pub indicator_left: f64,
    /// Batch means of the episode-end capture buffers this step.
    pub consecutive_successes_mean: f64,
    pub success_scores_mean: f64,
    /// Running maxima of those means. Monotone within a rollout.
    pub max_consecutive_successes: f64,
    pub max_success_scores: f64,
}

/// Computes rewards and the goal layer each step.
pub struct RewardScorer {
    strategy: RewardStrategy,
    success_tolerance: f64,
    full_open_angle: f64,
    horizon: u64,
    extras: Extras,
}

impl RewardScorer {
    pub fn new(cfg: &RewardConfig, horizon: u64) -> Self {
        Self {
            strategy: RewardStrategy::from_config(cfg),
            success_tolerance: cfg.success_tolerance,
            full_open_angle: cfg.full_open_angle,
            horizon,
            extras: Extras::default(),
        }
    }

    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    fn candidate_reward(variant: u64, right: f64, left: f64) -> f64 {
        match variant {
            0 => -(right / 0.1).exp() - (left / 0.1).exp(),
            1 => 0.5 * ((1.0 - (-right / 0.1).exp()) + (1.0 - (-left / 0.1).exp())),
            _ => {
                if right <= 0.0 {
                    1.0
                } else {
                    (-0.01 * right).exp()
                }
            }
        }
    }

    /// Score one control step.
    ///
    /// `values` must be Some for the embedding strategy (one distance
    /// per env) and is ignored otherwise. `state.progress` still holds
    /// the pre-increment step index.
    pub fn score_step(
        &mut self,
        state: &mut BatchState,
        values: Option<&[f64]>,
    ) -> Result<(), TaskError> {
        let num_envs = state.num_envs;

        match &mut self.strategy {
            RewardStrategy::Embedding {
                remap,
                initial_value,
            } => {
                let values = values.ok_or_else(|| {
                    TaskError::Config(
                        "embedding reward strategy requires model values".to_string(),
                    )
                })?;
                if values.len() != num_envs {
                    return Err(TaskError::Config(format!(
                        "expected {num_envs} embedding values, got {}",
                        values.len()
                    )));
                }
                let init = *initial_value.get_or_insert_with(|| {
                    values.iter().sum::<f64>() / num_envs as f64
                });
                for env in 0..num_envs {
                    state.reward[env] = match remap {
                        RewardRemap::Plain => 3.0 - values[env],
                        RewardRemap::Efficiency => {
                            efficiency_remap((init - values[env]) / init)
                        }
                    };
                }
            }
            RewardStrategy::Handcrafted => {
                for env in 0..num_envs {
                    let base = (std::f64::consts::PI - state.leaf_right[env] - state.leaf_left[env])
                        / std::f64::consts::PI;
                    state.reward[env] = efficiency_remap(base);
                }
            }
            RewardStrategy::Candidate { variant } => {
                let variant = *variant;
                for env in 0..num_envs {
                    state.reward[env] =
                        Self::candidate_reward(variant, state.leaf_right[env], state.leaf_left[env]);
                }
            }
        }

        // Goal layer: identical for every strategy.
        let full = self.full_open_angle;
        for env in 0..num_envs {
            let right = state.leaf_right[env];
            let left = state.leaf_left[env];
            let achieved =
                right.abs() < self.success_tolerance && left.abs() < self.success_tolerance;
            if achieved {
                state.success[env] = state.success[env].max(1.0);
            }
            state.score[env] =
                (0.5 * ((full - right) / full + (full - left) / full)).clamp(0.0, 1.0);

            // The step being scored is `progress`; the episode ends
            // once `horizon` steps have been taken.
            if state.progress[env] + 1 >= self.horizon {
                state.reset[env] = true;
                state.consecutive_successes[env] = state.success[env];
                state.success_scores[env] = state.score[env];
            }
        }

        // The maxima track batch means of the capture buffers, not the
        // best single env.
        let n = num_envs as f64;
        self.extras.consecutive_successes_mean =
            state.consecutive_successes.iter().sum::<f64>() / n;
        self.extras.success_scores_mean = state.success_scores.iter().sum::<f64>() / n;
        self.extras.max_consecutive_successes = self
            .extras
            .max_consecutive_successes
            .max(self.extras.consecutive_successes_mean);
        self.extras.max_success_scores = self
            .extras
            .max_success_scores
            .max(self.extras.success_scores_mean);

        self.extras.indicator_right = state.leaf_right.iter().sum::<f64>() / n;
        self.extras.indicator_left = state.leaf_left.iter().sum::<f64>() / n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewardConfig;

    fn state_with_angles(angles: &[(f64, f64)]) -> BatchState {
        let mut s = BatchState::new(angles.len(), 8, 19);
        for (env, &(r, l)) in angles.iter().enumerate() {
            s.leaf_right[env] = r;
            s.leaf_left[env] = l;
        }
        s
    }

    fn scorer(kind: RewardKind, horizon: u64) -> RewardScorer {
        let cfg = RewardConfig {
            kind,
            ..RewardConfig::default()
        };
        RewardScorer::new(&cfg, horizon)
    }

    #[test]
    fn handcrafted_reward_increases_as_doors_close() {
        let mut s = state_with_angles(&[(1.57, 1.57), (0.8, 0.8), (0.0, 0.0)]);
        let mut sc = scorer(RewardKind::Handcrafted, 1000);
        sc.score_step(&mut s, None).unwrap();
        assert!(s.reward[0] < s.reward[1]);
        assert!(s.reward[1] < s.reward[2]);
        // Closed doors hit the remap's positive branch at x = 1.
        let expect = 10.0 * (2.0f64.exp() - 1.0);
        assert!((s.reward[2] - expect).abs() < 1e-9);
    }

    #[test]
    fn candidate_variants_follow_their_shapes() {
        let r = 0.3;
        let l = 0.2;
        let v0 = RewardScorer::candidate_reward(0, r, l);
        assert!((v0 - (-(r / 0.1).exp() - (l / 0.1).exp())).abs() < 1e-12);
        assert!(v0 < 0.0);

        let v1 = RewardScorer::candidate_reward(1, r, l);
        let expect1 = 0.5 * ((1.0 - (-r / 0.1).exp()) + (1.0 - (-l / 0.1).exp()));
        assert!((v1 - expect1).abs() < 1e-12);
        assert!(v1 > 0.0 && v1 < 1.0);

        assert_eq!(RewardScorer::candidate_reward(2, 0.0, 1.0), 1.0);
        assert!((RewardScorer::candidate_reward(2, r, l) - (-0.01 * r).exp()).abs() < 1e-12);
    }

    #[test]
    fn candidate_seed_selects_variant_mod_3() {
        let cfg = RewardConfig {
            kind: RewardKind::Candidate,
            candidate_seed: 7,
            ..RewardConfig::default()
        };
        let sc = RewardScorer::new(&cfg, 10);
        assert!(matches!(
            sc.strategy,
            RewardStrategy::Candidate { variant: 1 }
        ));
    }

    #[test]
    fn embedding_normalizes_against_first_batch() {
        let mut s = state_with_angles(&[(1.0, 1.0), (1.0, 1.0)]);
        let mut sc = scorer(RewardKind::Embedding, 1000);

        // First batch mean is 2.0; both envs sit exactly at it.
        sc.score_step(&mut s, Some(&[2.0, 2.0])).unwrap();
        assert!((s.reward[0] - 0.0).abs() < 1e-12);

        // Later batches keep the captured baseline: an env halving its
        // distance scores the remap at ratio 0.5.
        sc.score_step(&mut s, Some(&[1.0, 3.0])).unwrap();
        assert!((s.reward[0] - 10.0 * (1.0f64.exp() - 1.0)).abs() < 1e-9);
        // Ratio -0.5 lands on the negative branch.
        assert!((s.reward[1] - ((-0.5f64).exp() - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn embedding_without_values_is_an_error() {
        let mut s = state_with_angles(&[(1.0, 1.0)]);
        let mut sc = scorer(RewardKind::Embedding, 1000);
        assert!(matches!(
            sc.score_step(&mut s, None),
            Err(TaskError::Config(_))
        ));
    }

    #[test]
    fn plain_remap_ignores_the_baseline() {
        let cfg = RewardConfig {
            kind: RewardKind::Embedding,
            remap: RewardRemap::Plain,
            ..RewardConfig::default()
        };
        let mut sc = RewardScorer::new(&cfg, 1000);
        let mut s = state_with_angles(&[(1.0, 1.0)]);
        sc.score_step(&mut s, Some(&[1.25])).unwrap();
        assert!((s.reward[0] - 1.75).abs() < 1e-12);
    }

    #[test]
    fn score_endpoints_clamp_and_stay_monotone() {
        let mut s = state_with_angles(&[
            (0.0, 0.0),
            (1.57, 1.57),
            (-1.0, -1.0),
            (3.0, 3.0),
            (1.2, 1.2),
            (0.8, 0.8),
            (0.4, 0.4),
        ]);
        let mut sc = scorer(RewardKind::Handcrafted, 1000);
        sc.score_step(&mut s, None).unwrap();

        // Both leaves at the goal angle: exact full score, success flips on.
        assert!((s.score[0] - 1.0).abs() < 1e-12);
        assert_eq!(s.success[0], 1.0);
        // Fully open leaves: essentially zero progress, no success.
        assert!(s.score[1] < 1e-2);
        assert_eq!(s.success[1], 0.0);
        // Out-of-range angles clamp to the endpoints.
        assert_eq!(s.score[2], 1.0);
        assert_eq!(s.score[3], 0.0);
        // Non-decreasing as the leaves swing toward the goal.
        assert!(s.score[4] <= s.score[5]);
        assert!(s.score[5] <= s.score[6]);
        assert!(s.score[6] <= s.score[0]);
    }

    #[test]
    fn success_is_sticky_and_score_is_clamped() {
        let mut s = state_with_angles(&[(0.1, 0.1)]);
        let mut sc = scorer(RewardKind::Handcrafted, 1000);
        sc.score_step(&mut s, None).unwrap();
        assert_eq!(s.success[0], 1.0);
        assert!((s.score[0] - (1.0 - 0.1 / std::f64::consts::FRAC_PI_2)).abs() < 1e-9);

        // Doors reopen: success stays latched, score drops.
        s.leaf_right[0] = 1.57;
        s.leaf_left[0] = 1.57;
        sc.score_step(&mut s, None).unwrap();
        assert_eq!(s.success[0], 1.0);
        assert!(s.score[0] < 0.01);
    }

    #[test]
    fn timeout_flags_reset_and_captures_outcomes() {
        let mut s = state_with_angles(&[(0.1, 0.1), (1.5, 1.5)]);
        let mut sc = scorer(RewardKind::Handcrafted, 5);
        s.progress = vec![4, 2];
        sc.score_step(&mut s, None).unwrap();

        assert!(s.reset[0]);
        assert!(!s.reset[1]);
        assert_eq!(s.consecutive_successes[0], 1.0);
        assert!(s.success_scores[0] > 0.8);
        // Env 1 has not timed out; nothing captured for it.
        assert_eq!(s.consecutive_successes[1], 0.0);

        // The extras report batch means of the captures, and the
        // maxima track those means: one success out of two envs.
        assert_eq!(sc.extras().consecutive_successes_mean, 0.5);
        assert_eq!(sc.extras().max_consecutive_successes, 0.5);
        assert!(sc.extras().success_scores_mean > 0.4);

        // Extras maxima never decrease, even when the captures do.
        let before = sc.extras().max_success_scores;
        s.leaf_right[0] = 1.57;
        s.leaf_left[0] = 1.57;
        s.success[0] = 0.0;
        s.score[0] = 0.0;
        sc.score_step(&mut s, None).unwrap();
        assert!(sc.extras().consecutive_successes_mean < 0.5);
        assert!(sc.extras().max_success_scores >= before);
        assert_eq!(sc.extras().max_consecutive_successes, 0.5);
    }
}
