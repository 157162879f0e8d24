// src/observation.rs
//
// Observation buffer layout and fill.
//
// Per env row: [dof positions | scaled dof velocities | progress |
// attachment flags]. The attachment flags (one per arm) are only
// present for action types that carry a force head.

use crate::attach::AttachmentTracker;
use crate::config::{ActionType, ObservationConfig};
use crate::state::{BatchState, NUM_ARMS};

#[derive(Debug, Clone, Copy)]
pub struct ObservationSpec {
    pub num_dofs: usize,
    pub includes_attachment: bool,
    pub vel_scale: f64,
}

impl ObservationSpec {
    pub fn new(num_dofs: usize, action_type: ActionType, cfg: &ObservationConfig) -> Self {
        Self {
            num_dofs,
            includes_attachment: action_type.exposes_attachment(),
            vel_scale: cfg.vel_obs_scale,
        }
    }

    /// Width of one observation row.
    pub fn dim(&self) -> usize {
        let base = 2 * self.num_dofs + 1;
        if self.includes_attachment {
            base + NUM_ARMS
        } else {
            base
        }
    }

    /// Rewrite `state.obs` from the current joint buffers, progress
    /// counters and latches.
    pub fn fill(&self, state: &mut BatchState, tracker: &AttachmentTracker) {
        let d = self.num_dofs;
        let dim = self.dim();
        debug_assert_eq!(state.obs.len(), state.num_envs * dim);
        for env in 0..state.num_envs {
            let row = env * dim;
            for k in 0..d {
                state.obs[row + k] = state.dof_pos[env * d + k];
                state.obs[row + d + k] = state.dof_vel[env * d + k] * self.vel_scale;
            }
            state.obs[row + 2 * d] = state.progress[env] as f64;
            if self.includes_attachment {
                for arm in 0..NUM_ARMS {
                    state.obs[row + 2 * d + 1 + arm] =
                        if tracker.attached(arm)[env] { 1.0 } else { 0.0 };
                }
            }
        }
    }
}
