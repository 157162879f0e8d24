// src/sim.rs
//
// Simulator seam. The task core never talks to a physics engine
// directly; it drives everything through `SimulatorBackend`, so a GPU
// simulator, a recorded trace, or the in-crate kinematic backend can
// all sit behind the same calls.
//
// `KinematicBackend` is the reference implementation used by the
// rollout binary and the test suite: two free sphere proxies on
// prismatic DOFs plus a double door whose leaves integrate tangential
// torque from applied world forces.

use glam::DVec3;

use crate::transform::RigidPose;

pub type EnvId = usize;
pub type BodyHandle = usize;
pub type JointHandle = usize;

/// Batched rigid-body simulator interface.
///
/// All batched setters take parallel slices; joint data is env-major
/// (`envs.len() * joints.len()` values, one row per environment).
pub trait SimulatorBackend {
    fn num_envs(&self) -> usize;
    fn num_joints_per_env(&self) -> usize;
    fn num_bodies_per_env(&self) -> usize;

    /// Resolve a body by its asset name. None means the asset does not
    /// provide it; the task treats that as a contract violation.
    fn find_body(&self, name: &str) -> Option<BodyHandle>;
    fn find_joint(&self, name: &str) -> Option<JointHandle>;
    /// (lower, upper) position limits, if the joint is limited.
    fn joint_limits(&self, joint: JointHandle) -> Option<(f64, f64)>;

    fn body_pose(&self, env: EnvId, body: BodyHandle) -> RigidPose;
    fn joint_position(&self, env: EnvId, joint: JointHandle) -> f64;
    fn joint_velocity(&self, env: EnvId, joint: JointHandle) -> f64;

    /// Set position targets for `joints` on each env in `envs`.
    /// `targets` is env-major: row `i` holds the targets for `envs[i]`.
    fn set_joint_position_targets(
        &mut self,
        envs: &[EnvId],
        joints: &[JointHandle],
        targets: &[f64],
    );

    /// Directly overwrite joint positions (velocities are zeroed).
    /// Same layout as `set_joint_position_targets`.
    fn override_joint_states(&mut self, envs: &[EnvId], joints: &[JointHandle], positions: &[f64]);

    /// Queue a world-space force on a body for the next `step()`.
    fn apply_body_force(&mut self, env: EnvId, body: BodyHandle, force: DVec3);

    /// Advance every environment by one physics step.
    fn step(&mut self);

    /// Hard-reset the listed environments to the given joint positions
    /// (env-major, full joint rows). Clears velocities, queued forces
    /// and position targets.
    fn reset_envs(&mut self, envs: &[EnvId], joint_positions: &[f64]);
}

/// One backend command, captured when recording is enabled.
///
/// Tests use the recorded stream to assert which control path ran for
/// which environment, without inspecting backend internals.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    PositionTargets {
        envs: Vec<EnvId>,
        joints: Vec<JointHandle>,
    },
    OverrideStates {
        envs: Vec<EnvId>,
        joints: Vec<JointHandle>,
    },
    BodyForce {
        env: EnvId,
        body: BodyHandle,
        force: DVec3,
    },
}

// Fixed scene layout. Two sphere proxies on xyz prismatic DOFs, then
// the two door hinge joints.
const JOINT_NAMES: [&str; 8] = [
    "robot0:slide_x",
    "robot0:slide_y",
    "robot0:slide_z",
    "robot1:slide_x",
    "robot1:slide_y",
    "robot1:slide_z",
    "joint_1",
    "joint_2",
];
const BODY_NAMES: [&str; 4] = [
    "robot0:sphere_link",
    "robot1:sphere_link",
    "link_1",
    "link_2",
];

const NUM_JOINTS: usize = JOINT_NAMES.len();
const NUM_BODIES: usize = BODY_NAMES.len();

const SLIDE_LIMIT: f64 = 2.0;
/// Max proxy translation rate under position control, m/s.
const SLIDE_SPEED: f64 = 2.0;

/// Hinge locations of the two leaves; both hinge axes are +z.
const HINGE_1: DVec3 = DVec3::new(0.0, 1.0, 0.0);
const HINGE_2: DVec3 = DVec3::new(0.0, -1.0, 0.0);
/// Leaf centers at joint angle zero (doors closed).
const LEAF_1_CLOSED: DVec3 = DVec3::new(0.0, 0.5, 0.5);
const LEAF_2_CLOSED: DVec3 = DVec3::new(0.0, -0.5, 0.5);
/// Spawn origins of the sphere proxies (slide DOFs are offsets from
/// these).
const PROXY_ORIGINS: [DVec3; 2] = [DVec3::new(0.45, 0.7, 0.5), DVec3::new(0.45, -0.7, 0.5)];

const DOOR_UPPER_LIMIT: f64 = 1.57;
/// Leaf rotational inertia about the hinge, kg·m².
const LEAF_INERTIA: f64 = 5.0;
/// Per-step multiplicative damping on leaf angular velocity.
const LEAF_DAMPING: f64 = 0.9;

/// Analytic kinematic backend for the double-door scene.
pub struct KinematicBackend {
    num_envs: usize,
    dt: f64,
    /// Env-major joint positions, `num_envs * NUM_JOINTS`.
    positions: Vec<f64>,
    velocities: Vec<f64>,
    /// Env-major position targets; `target_set` masks which are live.
    targets: Vec<f64>,
    target_set: Vec<bool>,
    /// Queued world forces on the two leaves, per env.
    leaf_forces: Vec<[DVec3; 2]>,
    /// Leaf angular velocities from force integration, per env.
    leaf_ang_vel: Vec<[f64; 2]>,
    record_commands: bool,
    commands: Vec<BackendCommand>,
}

impl KinematicBackend {
    pub fn new(num_envs: usize, dt: f64) -> Self {
        Self {
            num_envs,
            dt,
            positions: vec![0.0; num_envs * NUM_JOINTS],
            velocities: vec![0.0; num_envs * NUM_JOINTS],
            targets: vec![0.0; num_envs * NUM_JOINTS],
            target_set: vec![false; num_envs * NUM_JOINTS],
            leaf_forces: vec![[DVec3::ZERO; 2]; num_envs],
            leaf_ang_vel: vec![[0.0; 2]; num_envs],
            record_commands: false,
            commands: Vec::new(),
        }
    }

    /// Enable the command log. Recording is off by default; tests turn
    /// it on to assert which control path touched which env.
    pub fn record_commands(&mut self, on: bool) {
        self.record_commands = on;
        if !on {
            self.commands.clear();
        }
    }

    /// Drain the recorded command log.
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Test hook: write a joint position directly without clearing
    /// velocity or targets.
    pub fn set_joint_position(&mut self, env: EnvId, joint: JointHandle, value: f64) {
        self.positions[env * NUM_JOINTS + joint] = value;
    }

    fn idx(&self, env: EnvId, joint: JointHandle) -> usize {
        env * NUM_JOINTS + joint
    }

    fn leaf_pose(&self, env: EnvId, leaf: usize) -> RigidPose {
        let (hinge, closed, sign) = if leaf == 0 {
            (HINGE_1, LEAF_1_CLOSED, 1.0)
        } else {
            (HINGE_2, LEAF_2_CLOSED, -1.0)
        };
        let theta = self.positions[self.idx(env, 6 + leaf)];
        let rot = glam::DQuat::from_rotation_z(sign * theta);
        // Rotate the closed pose about the hinge axis.
        let pos = hinge + rot * (closed - hinge);
        RigidPose::new(pos, rot)
    }

    fn clamp_to_limits(joint: JointHandle, value: f64) -> f64 {
        if joint < 6 {
            value.clamp(-SLIDE_LIMIT, SLIDE_LIMIT)
        } else {
            value.clamp(0.0, DOOR_UPPER_LIMIT)
        }
    }
}

impl SimulatorBackend for KinematicBackend {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn num_joints_per_env(&self) -> usize {
        NUM_JOINTS
    }

    fn num_bodies_per_env(&self) -> usize {
        NUM_BODIES
    }

    fn find_body(&self, name: &str) -> Option<BodyHandle> {
        BODY_NAMES.iter().position(|n| *n == name)
    }

    fn find_joint(&self, name: &str) -> Option<JointHandle> {
        JOINT_NAMES.iter().position(|n| *n == name)
    }

    fn joint_limits(&self, joint: JointHandle) -> Option<(f64, f64)> {
        if joint < 6 {
            Some((-SLIDE_LIMIT, SLIDE_LIMIT))
        } else if joint < NUM_JOINTS {
            Some((0.0, DOOR_UPPER_LIMIT))
        } else {
            None
        }
    }

    fn body_pose(&self, env: EnvId, body: BodyHandle) -> RigidPose {
        match body {
            0 | 1 => {
                let base = PROXY_ORIGINS[body];
                let j0 = body * 3;
                let offset = DVec3::new(
                    self.positions[self.idx(env, j0)],
                    self.positions[self.idx(env, j0 + 1)],
                    self.positions[self.idx(env, j0 + 2)],
                );
                RigidPose::new(base + offset, glam::DQuat::IDENTITY)
            }
            2 | 3 => self.leaf_pose(env, body - 2),
            _ => RigidPose::IDENTITY,
        }
    }

    fn joint_position(&self, env: EnvId, joint: JointHandle) -> f64 {
        self.positions[self.idx(env, joint)]
    }

    fn joint_velocity(&self, env: EnvId, joint: JointHandle) -> f64 {
        self.velocities[self.idx(env, joint)]
    }

    fn set_joint_position_targets(
        &mut self,
        envs: &[EnvId],
        joints: &[JointHandle],
        targets: &[f64],
    ) {
        debug_assert_eq!(targets.len(), envs.len() * joints.len());
        for (row, &env) in envs.iter().enumerate() {
            for (col, &joint) in joints.iter().enumerate() {
                let i = self.idx(env, joint);
                self.targets[i] = Self::clamp_to_limits(joint, targets[row * joints.len() + col]);
                self.target_set[i] = true;
            }
        }
        if self.record_commands {
            self.commands.push(BackendCommand::PositionTargets {
                envs: envs.to_vec(),
                joints: joints.to_vec(),
            });
        }
    }

    fn override_joint_states(&mut self, envs: &[EnvId], joints: &[JointHandle], positions: &[f64]) {
        debug_assert_eq!(positions.len(), envs.len() * joints.len());
        for (row, &env) in envs.iter().enumerate() {
            for (col, &joint) in joints.iter().enumerate() {
                let i = self.idx(env, joint);
                self.positions[i] = positions[row * joints.len() + col];
                self.velocities[i] = 0.0;
                self.target_set[i] = false;
            }
        }
        if self.record_commands {
            self.commands.push(BackendCommand::OverrideStates {
                envs: envs.to_vec(),
                joints: joints.to_vec(),
            });
        }
    }

    fn apply_body_force(&mut self, env: EnvId, body: BodyHandle, force: DVec3) {
        if let 2 | 3 = body {
            self.leaf_forces[env][body - 2] += force;
        }
        if self.record_commands {
            self.commands
                .push(BackendCommand::BodyForce { env, body, force });
        }
    }

    fn step(&mut self) {
        let max_delta = SLIDE_SPEED * self.dt;
        for env in 0..self.num_envs {
            // Rate-limited servo toward live position targets.
            for joint in 0..6 {
                let i = self.idx(env, joint);
                if !self.target_set[i] {
                    self.velocities[i] = 0.0;
                    continue;
                }
                let old = self.positions[i];
                let delta = (self.targets[i] - old).clamp(-max_delta, max_delta);
                self.positions[i] = Self::clamp_to_limits(joint, old + delta);
                self.velocities[i] = (self.positions[i] - old) / self.dt;
            }

            // Door leaves: integrate tangential torque about the hinge.
            for leaf in 0..2 {
                let joint = 6 + leaf;
                let i = self.idx(env, joint);
                let force = self.leaf_forces[env][leaf];
                let (hinge, sign) = if leaf == 0 {
                    (HINGE_1, 1.0)
                } else {
                    (HINGE_2, -1.0)
                };
                let lever = self.leaf_pose(env, leaf).pos - hinge;
                // z component of r x F is the torque about the hinge axis;
                // sign maps world torque onto the joint direction.
                let torque = sign * (lever.x * force.y - lever.y * force.x);
                let old = self.positions[i];
                let mut vel = self.leaf_ang_vel[env][leaf];
                vel = (vel + torque / LEAF_INERTIA * self.dt) * LEAF_DAMPING;
                let new = Self::clamp_to_limits(joint, old + vel * self.dt);
                if new == 0.0 || new == DOOR_UPPER_LIMIT {
                    vel = 0.0;
                }
                self.leaf_ang_vel[env][leaf] = vel;
                self.positions[i] = new;
                self.velocities[i] = (new - old) / self.dt;
            }
            self.leaf_forces[env] = [DVec3::ZERO; 2];
        }
    }

    fn reset_envs(&mut self, envs: &[EnvId], joint_positions: &[f64]) {
        debug_assert_eq!(joint_positions.len(), envs.len() * NUM_JOINTS);
        for (row, &env) in envs.iter().enumerate() {
            for joint in 0..NUM_JOINTS {
                let i = self.idx(env, joint);
                self.positions[i] = joint_positions[row * NUM_JOINTS + joint];
                self.velocities[i] = 0.0;
                self.targets[i] = self.positions[i];
                self.target_set[i] = false;
            }
            self.leaf_forces[env] = [DVec3::ZERO; 2];
            self.leaf_ang_vel[env] = [0.0; 2];
        }
    }
}
