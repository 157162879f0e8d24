// src/task.rs
//
// Task orchestrator: owns the backend, the batch buffers and the
// subsystem objects, and sequences one control step.
//
// Step order is load-bearing:
//   1. auto-reset envs flagged on the previous step
//   2. decode actions + dispatch control (using last step's latches)
//   3. advance physics
//   4. refresh joint buffers + effective gripper poses (still last
//      step's latches)
//   5. observations, then reward / goal layer
//   6. refresh attachment latches
//   7. increment progress
//
// New latches therefore take effect on the next step's control and
// observations, never retroactively.

use glam::DVec3;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::attach::{
    default_door_points, AttachPointSpec, AttachmentRegistry, AttachmentTracker,
};
use crate::config::TaskConfig;
use crate::control::{ActionLayout, ArmLayout, ControlDispatcher};
use crate::domain_rand::DomainRandSampler;
use crate::error::TaskError;
use crate::observation::ObservationSpec;
use crate::reward::{EmbeddingModel, Extras, RewardScorer};
use crate::sim::{JointHandle, SimulatorBackend};
use crate::state::{BatchState, NUM_ARMS};

const ARM_JOINT_NAMES: [[&str; 3]; NUM_ARMS] = [
    ["robot0:slide_x", "robot0:slide_y", "robot0:slide_z"],
    ["robot1:slide_x", "robot1:slide_y", "robot1:slide_z"],
];
const ARM_PROXY_BODIES: [&str; NUM_ARMS] = ["robot0:sphere_link", "robot1:sphere_link"];
/// Left leaf hinge first, right second.
const DOOR_JOINT_NAMES: [&str; 2] = ["joint_1", "joint_2"];

/// End-of-episode statistics for one env, captured when its reset flag
/// fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeOutcome {
    pub consecutive_successes: f64,
    pub success_score: f64,
}

/// The batched two-arm door-closing task.
pub struct DoorTask<S: SimulatorBackend> {
    cfg: TaskConfig,
    backend: S,
    state: BatchState,
    tracker: AttachmentTracker,
    dispatcher: ControlDispatcher,
    scorer: RewardScorer,
    obs_spec: ObservationSpec,
    arms: [ArmLayout; NUM_ARMS],
    door_joints: [JointHandle; 2],
    /// One joint row applied (plus noise) on every reset.
    default_dof_pos: Vec<f64>,
    sampler: DomainRandSampler,
    embedding: Option<Box<dyn EmbeddingModel>>,
    /// Stream for attachment tie-break draws.
    rng: ChaCha8Rng,
    horizon: u64,
    step_count: u64,
}

impl<S: SimulatorBackend> DoorTask<S> {
    /// Build the task over `backend` with the stock grasp-site set.
    pub fn new(cfg: TaskConfig, backend: S) -> Result<Self, TaskError> {
        Self::with_points(cfg, backend, default_door_points())
    }

    pub fn with_points(
        cfg: TaskConfig,
        mut backend: S,
        points: Vec<AttachPointSpec>,
    ) -> Result<Self, TaskError> {
        cfg.validate()?;
        if backend.num_envs() != cfg.num_envs {
            return Err(TaskError::Config(format!(
                "backend has {} envs, config expects {}",
                backend.num_envs(),
                cfg.num_envs
            )));
        }
        let num_dofs = backend.num_joints_per_env();

        let mut arms: Vec<ArmLayout> = Vec::with_capacity(NUM_ARMS);
        for arm in 0..NUM_ARMS {
            let mut dofs = Vec::new();
            let mut lower = Vec::new();
            let mut upper = Vec::new();
            for name in ARM_JOINT_NAMES[arm] {
                let joint = backend.find_joint(name).ok_or_else(|| {
                    TaskError::AssetContract(format!("scene asset has no joint named '{name}'"))
                })?;
                let (lo, hi) = backend.joint_limits(joint).ok_or_else(|| {
                    TaskError::AssetContract(format!("joint '{name}' has no position limits"))
                })?;
                dofs.push(joint);
                lower.push(lo);
                upper.push(hi);
            }
            let proxy_body = if cfg.control.action_type.exposes_attachment() {
                Some(backend.find_body(ARM_PROXY_BODIES[arm]).ok_or_else(|| {
                    TaskError::AssetContract(format!(
                        "scene asset has no body named '{}'",
                        ARM_PROXY_BODIES[arm]
                    ))
                })?)
            } else {
                None
            };
            let park = cfg.control.passive_dof_value;
            arms.push(ArmLayout {
                passive_posture: dofs.iter().enumerate().map(|(k, _)| {
                    // Park on the first and third DOF, leave the lateral
                    // DOF at its home value.
                    if k % 2 == 0 { park } else { 0.0 }
                }).collect(),
                dofs,
                lower,
                upper,
                proxy_body,
            });
        }
        let arms: [ArmLayout; NUM_ARMS] = [arms[0].clone(), arms[1].clone()];

        let mut door_joints = [0usize; 2];
        let mut default_dof_pos = vec![0.0; num_dofs];
        for (i, name) in DOOR_JOINT_NAMES.iter().enumerate() {
            let joint = backend.find_joint(name).ok_or_else(|| {
                TaskError::AssetContract(format!("scene asset has no joint named '{name}'"))
            })?;
            let (_, hi) = backend.joint_limits(joint).ok_or_else(|| {
                TaskError::AssetContract(format!("joint '{name}' has no position limits"))
            })?;
            door_joints[i] = joint;
            // Episodes start with both leaves at the open stop.
            default_dof_pos[joint] = hi;
        }

        // Put every env in the setup pose before projecting the grasp
        // sites: the registry caches the open-leaf poses.
        let all_envs: Vec<usize> = (0..cfg.num_envs).collect();
        let mut rows = Vec::with_capacity(cfg.num_envs * num_dofs);
        for _ in 0..cfg.num_envs {
            rows.extend_from_slice(&default_dof_pos);
        }
        backend.reset_envs(&all_envs, &rows);

        let registry = AttachmentRegistry::build(&points, &cfg.attach, &backend)?;
        let tracker =
            AttachmentTracker::new(registry, cfg.num_envs, cfg.attach.proximity_threshold);

        let layout = ActionLayout::new(cfg.control.action_type, arms[0].dofs.len());
        let obs_spec = ObservationSpec::new(num_dofs, cfg.control.action_type, &cfg.observation);
        let horizon = cfg.horizon();

        let mut task = Self {
            state: BatchState::new(cfg.num_envs, num_dofs, obs_spec.dim()),
            dispatcher: ControlDispatcher::new(cfg.control.clone(), layout),
            scorer: RewardScorer::new(&cfg.reward, horizon),
            obs_spec,
            arms,
            door_joints,
            default_dof_pos,
            sampler: DomainRandSampler::new(cfg.domain_rand.clone(), 0),
            embedding: None,
            rng: ChaCha8Rng::seed_from_u64(0),
            horizon,
            tracker,
            backend,
            cfg,
            step_count: 0,
        };
        task.reset(&all_envs);
        Ok(task)
    }

    /// Install the external scorer for the embedding reward strategy.
    pub fn set_embedding_model(&mut self, model: Box<dyn EmbeddingModel>) {
        self.embedding = Some(model);
    }

    /// Re-seed every random stream. A fresh task seeded with the same
    /// value replays identically under identical actions.
    pub fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.sampler.reseed(seed.wrapping_add(1));
    }

    pub fn config(&self) -> &TaskConfig {
        &self.cfg
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn extras(&self) -> &Extras {
        self.scorer.extras()
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Control steps taken since construction.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Width of one env's action row.
    pub fn action_dim(&self) -> usize {
        self.dispatcher.layout().row_dim()
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_spec.dim()
    }

    /// Flat observation buffer, env-major.
    pub fn observations(&self) -> &[f64] {
        &self.state.obs
    }

    /// Captured statistics from the last episode end of `env`.
    pub fn outcome(&self, env: usize) -> EpisodeOutcome {
        EpisodeOutcome {
            consecutive_successes: self.state.consecutive_successes[env],
            success_score: self.state.success_scores[env],
        }
    }

    /// Hard-reset the listed envs: default joint row plus reset noise
    /// on the arm DOFs, cleared episode buffers, released latches.
    pub fn reset(&mut self, env_ids: &[usize]) {
        let num_dofs = self.state.num_dofs;
        // Noise bands are indexed within each arm's DOF block, so both
        // arms draw from the same bands.
        let mut arm_slot = vec![0usize; num_dofs];
        for arm in &self.arms {
            for (k, &joint) in arm.dofs.iter().enumerate() {
                arm_slot[joint] = k;
            }
        }
        let mut rows = Vec::with_capacity(env_ids.len() * num_dofs);
        for _ in env_ids {
            for j in 0..num_dofs {
                let mut v = self.default_dof_pos[j];
                if !self.door_joints.contains(&j) {
                    v += self.sampler.dof_offset(arm_slot[j]);
                }
                rows.push(v);
            }
        }
        self.backend.reset_envs(env_ids, &rows);
        self.state.reset_episode(env_ids);
        self.tracker.reset(env_ids);
        for (i, &env) in env_ids.iter().enumerate() {
            let row = &rows[i * num_dofs..(i + 1) * num_dofs];
            self.state.targets_row_mut(env).copy_from_slice(row);
            self.state.prev_targets[env * num_dofs..(env + 1) * num_dofs].copy_from_slice(row);
        }
        self.refresh_state();
        self.refresh_gripper_poses();
        self.obs_spec.fill(&mut self.state, &self.tracker);
    }

    /// Advance the whole batch by one control step.
    pub fn step(&mut self, actions: &[f64]) -> Result<(), TaskError> {
        let expected = self.cfg.num_envs * self.action_dim();
        if actions.len() != expected {
            return Err(TaskError::Config(format!(
                "expected {expected} action values, got {}",
                actions.len()
            )));
        }

        let due: Vec<usize> = (0..self.cfg.num_envs)
            .filter(|&e| self.state.reset[e])
            .collect();
        if !due.is_empty() {
            self.reset(&due);
        }

        self.dispatcher.dispatch(
            actions,
            &mut self.state,
            &self.tracker,
            &self.arms,
            &mut self.backend,
        );
        for _ in 0..self.cfg.control.control_freq_inv {
            self.backend.step();
        }

        self.refresh_state();
        self.refresh_gripper_poses();
        self.obs_spec.fill(&mut self.state, &self.tracker);

        let values = match (&mut self.embedding, &self.state) {
            (Some(model), state) => Some(model.evaluate(state)),
            (None, _) => None,
        };
        self.scorer.score_step(&mut self.state, values.as_deref())?;

        if self.cfg.control.action_type.exposes_attachment() {
            for arm in 0..NUM_ARMS {
                if let Some(body) = self.arms[arm].proxy_body {
                    let positions: Vec<DVec3> = (0..self.cfg.num_envs)
                        .map(|env| self.backend.body_pose(env, body).pos)
                        .collect();
                    self.tracker.refresh(arm, &positions, &mut self.rng);
                }
            }
        }

        for p in self.state.progress.iter_mut() {
            *p += 1;
        }
        self.step_count += 1;
        Ok(())
    }

    fn refresh_state(&mut self) {
        let num_dofs = self.state.num_dofs;
        for env in 0..self.cfg.num_envs {
            for j in 0..num_dofs {
                self.state.dof_pos[env * num_dofs + j] = self.backend.joint_position(env, j);
                self.state.dof_vel[env * num_dofs + j] = self.backend.joint_velocity(env, j);
            }
            self.state.leaf_left[env] = self.backend.joint_position(env, self.door_joints[0]);
            self.state.leaf_right[env] = self.backend.joint_position(env, self.door_joints[1]);
        }
    }

    fn refresh_gripper_poses(&mut self) {
        for arm in 0..NUM_ARMS {
            let Some(body) = self.arms[arm].proxy_body else {
                continue;
            };
            for env in 0..self.cfg.num_envs {
                let raw = self.backend.body_pose(env, body);
                self.state.gripper_pose[arm][env] =
                    self.tracker.effective_pose(arm, env, raw, &self.backend);
            }
        }
    }

    /// Attachment latches for one arm (test / telemetry helper).
    pub fn attached(&self, arm: usize) -> &[bool] {
        self.tracker.attached(arm)
    }
}
