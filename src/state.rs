// src/state.rs
//
// Batched per-environment buffers for the door task.
//
// Everything is stored env-major in flat Vecs so a whole batch can be
// read or reset with slice arithmetic. `BatchState` owns no policy: it
// is the mutable blackboard the control, attachment, reward and
// observation layers write into each step.

use crate::transform::RigidPose;

/// The task always drives exactly two arms.
pub const NUM_ARMS: usize = 2;

/// Flat per-environment state for one batch.
#[derive(Debug, Clone)]
pub struct BatchState {
    pub num_envs: usize,
    pub num_dofs: usize,
    pub obs_dim: usize,

    /// Joint positions, env-major `num_envs * num_dofs`.
    pub dof_pos: Vec<f64>,
    /// Joint velocities, same layout.
    pub dof_vel: Vec<f64>,
    /// Right door-leaf angle per env.
    pub leaf_right: Vec<f64>,
    /// Left door-leaf angle per env.
    pub leaf_left: Vec<f64>,
    /// Effective gripper pose per arm per env (attachment-corrected).
    pub gripper_pose: [Vec<RigidPose>; NUM_ARMS],

    /// Position targets from the previous control step, env-major.
    pub prev_targets: Vec<f64>,
    /// Position targets for the current control step, env-major.
    pub cur_targets: Vec<f64>,

    /// Steps since the last episode reset, per env.
    pub progress: Vec<u64>,
    pub reward: Vec<f64>,
    /// Sticky within-episode success flag.
    pub success: Vec<f64>,
    /// Normalized closing score in [0, 1].
    pub score: Vec<f64>,
    /// Envs flagged for reset at the start of the next step.
    pub reset: Vec<bool>,
    /// Success count captured when an episode ends.
    pub consecutive_successes: Vec<f64>,
    /// Score captured when an episode ends.
    pub success_scores: Vec<f64>,

    /// Observation buffer, env-major `num_envs * obs_dim`.
    pub obs: Vec<f64>,
}

impl BatchState {
    pub fn new(num_envs: usize, num_dofs: usize, obs_dim: usize) -> Self {
        Self {
            num_envs,
            num_dofs,
            obs_dim,
            dof_pos: vec![0.0; num_envs * num_dofs],
            dof_vel: vec![0.0; num_envs * num_dofs],
            leaf_right: vec![0.0; num_envs],
            leaf_left: vec![0.0; num_envs],
            gripper_pose: [
                vec![RigidPose::IDENTITY; num_envs],
                vec![RigidPose::IDENTITY; num_envs],
            ],
            prev_targets: vec![0.0; num_envs * num_dofs],
            cur_targets: vec![0.0; num_envs * num_dofs],
            progress: vec![0; num_envs],
            reward: vec![0.0; num_envs],
            success: vec![0.0; num_envs],
            score: vec![0.0; num_envs],
            reset: vec![false; num_envs],
            consecutive_successes: vec![0.0; num_envs],
            success_scores: vec![0.0; num_envs],
            obs: vec![0.0; num_envs * obs_dim],
        }
    }

    /// Joint-position row for one env.
    pub fn dof_pos_row(&self, env: usize) -> &[f64] {
        &self.dof_pos[env * self.num_dofs..(env + 1) * self.num_dofs]
    }

    pub fn dof_vel_row(&self, env: usize) -> &[f64] {
        &self.dof_vel[env * self.num_dofs..(env + 1) * self.num_dofs]
    }

    pub fn obs_row(&self, env: usize) -> &[f64] {
        &self.obs[env * self.obs_dim..(env + 1) * self.obs_dim]
    }

    pub fn targets_row_mut(&mut self, env: usize) -> &mut [f64] {
        &mut self.cur_targets[env * self.num_dofs..(env + 1) * self.num_dofs]
    }

    /// Clear the episodic buffers for the listed envs. Joint buffers
    /// are refreshed from the simulator after a backend reset, so they
    /// are left alone here.
    pub fn reset_episode(&mut self, env_ids: &[usize]) {
        for &env in env_ids {
            self.progress[env] = 0;
            self.reward[env] = 0.0;
            self.success[env] = 0.0;
            self.score[env] = 0.0;
            self.reset[env] = false;
        }
    }
}
