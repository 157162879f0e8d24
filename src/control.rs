// src/control.rs
//
// Action decoding + control dispatch.
//
// Every control step decodes the batch action tensor into per-arm
// position targets, then routes each (env, arm) pair down one of two
// paths depending on its attachment latch:
//
//   free      -> rate-limited position targets on the arm's DOFs
//   attached  -> DOFs parked at the passive posture; the force head is
//                decoded into a world-space push on the latched leaf
//
// Batched backend calls are made per partition (free / attached) and
// skipped when a partition is empty.

use glam::DVec3;

use crate::attach::AttachmentTracker;
use crate::config::{ActionType, ControlConfig};
use crate::sim::{BodyHandle, JointHandle, SimulatorBackend};
use crate::state::{BatchState, NUM_ARMS};

/// Static description of one arm's actuation.
#[derive(Debug, Clone)]
pub struct ArmLayout {
    /// Joint handles of this arm's actuated DOFs, in action order.
    pub dofs: Vec<JointHandle>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Sphere proxy body, present for attachment-capable action types.
    pub proxy_body: Option<BodyHandle>,
    /// DOF positions written while the arm is force controlled.
    pub passive_posture: Vec<f64>,
}

/// Slicing of the flat batch action vector.
///
/// Each env row is the concatenation of both arms' blocks. For the
/// sphere action type a block is `[dof deltas | force dir (3) | force
/// magnitude (1)]`; for joint-pose it is the dof deltas alone.
#[derive(Debug, Clone, Copy)]
pub struct ActionLayout {
    pub action_type: ActionType,
    pub arm_dofs: usize,
    pub per_arm: usize,
}

impl ActionLayout {
    pub fn new(action_type: ActionType, arm_dofs: usize) -> Self {
        Self {
            action_type,
            arm_dofs,
            per_arm: action_type.per_arm_dim(arm_dofs),
        }
    }

    /// Action width of one env row.
    pub fn row_dim(&self) -> usize {
        self.per_arm * NUM_ARMS
    }

    fn arm_block<'a>(&self, row: &'a [f64], arm: usize) -> &'a [f64] {
        &row[arm * self.per_arm..(arm + 1) * self.per_arm]
    }

    /// DOF-delta head of one arm's block.
    pub fn dof_head<'a>(&self, row: &'a [f64], arm: usize) -> &'a [f64] {
        &self.arm_block(row, arm)[..self.arm_dofs]
    }

    /// Force head `(direction, magnitude)`; None for action types
    /// without one.
    pub fn force_head(&self, row: &[f64], arm: usize) -> Option<(DVec3, f64)> {
        if !self.action_type.exposes_attachment() {
            return None;
        }
        let block = self.arm_block(row, arm);
        let d = &block[self.arm_dofs..self.arm_dofs + 3];
        Some((DVec3::new(d[0], d[1], d[2]), block[self.arm_dofs + 3]))
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Decodes actions and issues backend commands for one control step.
pub struct ControlDispatcher {
    cfg: ControlConfig,
    layout: ActionLayout,
}

impl ControlDispatcher {
    pub fn new(cfg: ControlConfig, layout: ActionLayout) -> Self {
        Self { cfg, layout }
    }

    pub fn layout(&self) -> &ActionLayout {
        &self.layout
    }

    /// Decode `actions` (env-major, `row_dim` per env) and drive the
    /// backend. Targets are integrated relative to the previous step's
    /// targets and clamped to the DOF limits for every env, including
    /// attached ones, so a later release would resume from a sane
    /// target.
    pub fn dispatch(
        &self,
        actions: &[f64],
        state: &mut BatchState,
        tracker: &AttachmentTracker,
        arms: &[ArmLayout; NUM_ARMS],
        backend: &mut dyn SimulatorBackend,
    ) {
        let num_envs = state.num_envs;
        let row_dim = self.layout.row_dim();
        debug_assert_eq!(actions.len(), num_envs * row_dim);
        let scale = self.cfg.dof_speed_scale * self.cfg.dt;

        for (arm_idx, arm) in arms.iter().enumerate() {
            // Integrate targets for the whole batch.
            for env in 0..num_envs {
                let row = &actions[env * row_dim..(env + 1) * row_dim];
                let deltas = self.layout.dof_head(row, arm_idx);
                for (k, &joint) in arm.dofs.iter().enumerate() {
                    let i = env * state.num_dofs + joint;
                    let t = state.prev_targets[i] + scale * deltas[k];
                    state.cur_targets[i] = t.clamp(arm.lower[k], arm.upper[k]);
                }
            }

            let attached = tracker.attached(arm_idx);
            let free_envs: Vec<usize> = (0..num_envs).filter(|&e| !attached[e]).collect();
            let held_envs: Vec<usize> = (0..num_envs).filter(|&e| attached[e]).collect();

            if !free_envs.is_empty() {
                let mut targets = Vec::with_capacity(free_envs.len() * arm.dofs.len());
                for &env in &free_envs {
                    for &joint in &arm.dofs {
                        targets.push(state.cur_targets[env * state.num_dofs + joint]);
                    }
                }
                backend.set_joint_position_targets(&free_envs, &arm.dofs, &targets);
            }

            if !held_envs.is_empty() {
                let mut park = Vec::with_capacity(held_envs.len() * arm.dofs.len());
                for _ in &held_envs {
                    park.extend_from_slice(&arm.passive_posture);
                }
                backend.override_joint_states(&held_envs, &arm.dofs, &park);

                for &env in &held_envs {
                    let row = &actions[env * row_dim..(env + 1) * row_dim];
                    if let Some((dir, mag)) = self.layout.force_head(row, arm_idx) {
                        let force = self.cfg.force_scale
                            * sigmoid(mag)
                            * dir.normalize_or_zero();
                        if let Some(id) = tracker.point_of(arm_idx, env) {
                            let body = tracker.registry().point(id).body;
                            backend.apply_body_force(env, body, force);
                        }
                    }
                }
            }
        }

        state.prev_targets.copy_from_slice(&state.cur_targets);
    }
}
