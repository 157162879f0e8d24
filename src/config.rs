// src/config.rs
//
// Central configuration for the two-arm door task.
//
// This is the single source of truth for the tuning constants of the
// task: attachment proximity, control gains, reward strategy selection,
// episode horizon, observation scaling. Sub-configs mirror the
// subsystems that consume them.
//
// Selector enums (`RewardKind`, `RewardRemap`, `ActionType`) parse from
// lowercase strings; an unrecognized string is a setup-time
// configuration error, never a silent fallback.

use serde::{Deserialize, Serialize};

use crate::domain_rand::DomainRandConfig;
use crate::error::TaskError;

#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Human-readable config / release version.
    pub version: &'static str,
    /// Number of parallel environments in the batch.
    pub num_envs: usize,
    /// Action decoding + control gains.
    pub control: ControlConfig,
    /// Attachment proximity + registry filtering.
    pub attach: AttachConfig,
    /// Reward strategy + goal-layer constants.
    pub reward: RewardConfig,
    /// Episode horizon settings.
    pub episode: EpisodeConfig,
    /// Observation scaling.
    pub observation: ObservationConfig,
    /// Reset-noise domain randomization.
    pub domain_rand: DomainRandConfig,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            version: "dualdoor-0.1",
            num_envs: 16,
            control: ControlConfig::default(),
            attach: AttachConfig::default(),
            reward: RewardConfig::default(),
            episode: EpisodeConfig::default(),
            observation: ObservationConfig::default(),
            domain_rand: DomainRandConfig::default(),
        }
    }
}

impl TaskConfig {
    /// Validate value ranges and supported control paths.
    ///
    /// Called once at task construction; any error here aborts startup.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.num_envs == 0 {
            return Err(TaskError::Config("num_envs must be positive".to_string()));
        }
        if !self.control.use_relative_control {
            return Err(TaskError::Unimplemented(
                "absolute control is not implemented; set use_relative_control".to_string(),
            ));
        }
        if self.control.dt <= 0.0 {
            return Err(TaskError::Config(format!(
                "control dt must be positive, got {}",
                self.control.dt
            )));
        }
        if self.control.control_freq_inv == 0 {
            return Err(TaskError::Config(
                "control_freq_inv must be at least 1".to_string(),
            ));
        }
        if self.attach.proximity_threshold <= 0.0 {
            return Err(TaskError::Config(format!(
                "attachment proximity threshold must be positive, got {}",
                self.attach.proximity_threshold
            )));
        }
        if self.attach.height_band.0 >= self.attach.height_band.1 {
            return Err(TaskError::Config(format!(
                "attachment height band is empty: ({}, {})",
                self.attach.height_band.0, self.attach.height_band.1
            )));
        }
        if self.reward.success_tolerance <= 0.0 {
            return Err(TaskError::Config(
                "success tolerance must be positive".to_string(),
            ));
        }
        match self.control.action_type {
            ActionType::JointPose | ActionType::DummyInteractionSphere => {}
            other => {
                return Err(TaskError::Unimplemented(format!(
                    "action type '{}' is not supported by this task",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Effective episode horizon in control steps.
    ///
    /// When `reset_time` is set, the horizon is derived from wall-clock
    /// reset time and control frequency; otherwise `max_episode_length`
    /// is used directly.
    pub fn horizon(&self) -> u64 {
        self.episode
            .horizon(self.control.dt, self.control.control_freq_inv)
    }
}

/// Action vector layout / control path selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    /// Relative joint-position control of both arms; no attachment.
    JointPose,
    /// Attractor-driven end-effector control. Declared but unsupported.
    EndEffectorPose,
    /// Articulated dummy-interaction agent. Declared but unsupported.
    DummyInteraction,
    /// Free sphere proxy per arm: position servo until attached, then
    /// open-loop force on the attached body.
    DummyInteractionSphere,
}

impl ActionType {
    /// Stable lowercase name (used in logs / CLI).
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::JointPose => "joint_pose",
            ActionType::EndEffectorPose => "end_effector_pose",
            ActionType::DummyInteraction => "dummy_interaction",
            ActionType::DummyInteractionSphere => "dummy_interaction_sphere",
        }
    }

    /// Parse an action-type name. Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<ActionType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "joint_pose" => Some(ActionType::JointPose),
            "end_effector_pose" => Some(ActionType::EndEffectorPose),
            "dummy_interaction" => Some(ActionType::DummyInteraction),
            "dummy_interaction_sphere" => Some(ActionType::DummyInteractionSphere),
            _ => None,
        }
    }

    /// Whether this action type carries a force head and therefore
    /// exposes attachment state in observations.
    pub fn exposes_attachment(&self) -> bool {
        matches!(self, ActionType::DummyInteractionSphere)
    }

    /// Per-arm action dimension, given the number of actuated DOFs on
    /// one arm.
    pub fn per_arm_dim(&self, arm_dofs: usize) -> usize {
        match self {
            ActionType::JointPose => arm_dofs,
            // position head + force direction (3) + force magnitude (1)
            ActionType::DummyInteractionSphere => arm_dofs + 4,
            // 3 pos + 4 quat + 1 gripper
            ActionType::EndEffectorPose => 8,
            // (6 + 2) articulation + 3 force
            ActionType::DummyInteraction => 11,
        }
    }
}

/// Control gains and action decoding.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub action_type: ActionType,
    /// Only relative (delta) control is implemented; absolute control
    /// fails fast at construction.
    pub use_relative_control: bool,
    /// Scale applied to position-head actions before integration.
    pub dof_speed_scale: f64,
    /// Simulation timestep in seconds.
    pub dt: f64,
    /// Physics substeps per control step.
    pub control_freq_inv: u32,
    /// Global scale for post-attachment world-space forces.
    pub force_scale: f64,
    /// Joint position written to an arm's DOFs while it is force
    /// controlled, parking the proxy outside the workspace.
    pub passive_dof_value: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            action_type: ActionType::DummyInteractionSphere,
            use_relative_control: true,
            dof_speed_scale: 20.0,
            dt: 1.0 / 60.0,
            control_freq_inv: 1,
            force_scale: 500.0,
            passive_dof_value: 3.0,
        }
    }
}

/// Attachment proximity + registry filtering thresholds.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Latch distance between an arm proxy and a registered point.
    pub proximity_threshold: f64,
    /// Admissible world-height band for registered points; points whose
    /// computed world z falls outside are discarded at setup.
    pub height_band: (f64, f64),
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 0.1,
            height_band: (0.25, 0.70),
        }
    }
}

/// Reward strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardKind {
    /// Externally supplied embedding-distance value per environment.
    Embedding,
    /// Closed-form function of the two door-leaf angles.
    Handcrafted,
    /// One of a small family of generated candidate reward shapes,
    /// selected deterministically from `candidate_seed`.
    Candidate,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Embedding => "embedding",
            RewardKind::Handcrafted => "handcrafted",
            RewardKind::Candidate => "candidate",
        }
    }

    /// Parse a reward-kind name. Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<RewardKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedding" => Some(RewardKind::Embedding),
            "handcrafted" => Some(RewardKind::Handcrafted),
            "candidate" => Some(RewardKind::Candidate),
            _ => None,
        }
    }
}

/// Post-normalization remap applied to embedding rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardRemap {
    /// `reward = 3 - value`.
    Plain,
    /// Asymmetric exponential: compress negatives, amplify positives.
    Efficiency,
}

impl RewardRemap {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardRemap::Plain => "plain",
            RewardRemap::Efficiency => "efficiency",
        }
    }

    pub fn parse(s: &str) -> Option<RewardRemap> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Some(RewardRemap::Plain),
            "efficiency" => Some(RewardRemap::Efficiency),
            _ => None,
        }
    }
}

/// Reward strategy + goal-layer constants.
///
/// The goal layer (success / score) is independent of the selected
/// strategy: both are geometry-only functions of the leaf angles.
#[derive(Debug, Clone)]
pub struct RewardConfig {
    pub kind: RewardKind,
    /// Remap for the embedding strategy.
    pub remap: RewardRemap,
    /// Seed selecting the candidate variant (`seed % 3`).
    pub candidate_seed: u64,
    /// Tolerance around the goal angle (0) for `achieved_goal`, radians.
    pub success_tolerance: f64,
    /// Leaf angle treated as fully open for score normalization,
    /// radians. The door stop sits at 1.57, just inside pi/2, so the
    /// start-pose score is ~2e-4 rather than exactly 0.
    pub full_open_angle: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            kind: RewardKind::Handcrafted,
            remap: RewardRemap::Efficiency,
            candidate_seed: 0,
            success_tolerance: 0.2,
            full_open_angle: std::f64::consts::FRAC_PI_2,
        }
    }
}

/// Episode horizon settings.
#[derive(Debug, Clone)]
pub struct EpisodeConfig {
    /// Horizon in control steps (used when `reset_time` is unset).
    pub max_episode_length: u64,
    /// Wall-clock reset time in seconds; when positive the horizon is
    /// derived as `round(reset_time / (control_freq_inv * dt))`.
    pub reset_time: Option<f64>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            max_episode_length: 300,
            reset_time: None,
        }
    }
}

impl EpisodeConfig {
    pub fn horizon(&self, dt: f64, control_freq_inv: u32) -> u64 {
        match self.reset_time {
            Some(t) if t > 0.0 => (t / (control_freq_inv as f64 * dt)).round() as u64,
            _ => self.max_episode_length,
        }
    }
}

/// Observation scaling.
#[derive(Debug, Clone)]
pub struct ObservationConfig {
    /// Scale factor for joint velocities in the observation buffer.
    pub vel_obs_scale: f64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self { vel_obs_scale: 0.2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(TaskConfig::default().validate().is_ok());
    }

    #[test]
    fn absolute_control_fails_fast() {
        let mut cfg = TaskConfig::default();
        cfg.control.use_relative_control = false;
        assert!(matches!(cfg.validate(), Err(TaskError::Unimplemented(_))));
    }

    #[test]
    fn unsupported_action_types_fail_fast() {
        for at in [ActionType::EndEffectorPose, ActionType::DummyInteraction] {
            let mut cfg = TaskConfig::default();
            cfg.control.action_type = at;
            assert!(matches!(cfg.validate(), Err(TaskError::Unimplemented(_))));
        }
    }

    #[test]
    fn zero_envs_rejected() {
        let mut cfg = TaskConfig::default();
        cfg.num_envs = 0;
        assert!(matches!(cfg.validate(), Err(TaskError::Config(_))));
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(
            RewardKind::parse("Handcrafted"),
            Some(RewardKind::Handcrafted)
        );
        assert_eq!(RewardKind::parse("embedding"), Some(RewardKind::Embedding));
        assert_eq!(RewardKind::parse("nope"), None);
        assert_eq!(
            RewardRemap::parse("efficiency"),
            Some(RewardRemap::Efficiency)
        );
        assert_eq!(
            ActionType::parse("dummy_interaction_sphere"),
            Some(ActionType::DummyInteractionSphere)
        );
        assert_eq!(ActionType::parse(""), None);
    }

    #[test]
    fn horizon_derived_from_reset_time() {
        let mut cfg = TaskConfig::default();
        cfg.control.dt = 0.01;
        cfg.control.control_freq_inv = 2;
        cfg.episode.reset_time = Some(6.0);
        // 6.0 / (2 * 0.01) = 300
        assert_eq!(cfg.horizon(), 300);

        cfg.episode.reset_time = None;
        cfg.episode.max_episode_length = 123;
        assert_eq!(cfg.horizon(), 123);
    }

    #[test]
    fn action_dims_match_layout() {
        assert_eq!(ActionType::DummyInteractionSphere.per_arm_dim(3), 7);
        assert_eq!(ActionType::JointPose.per_arm_dim(9), 9);
        assert!(ActionType::DummyInteractionSphere.exposes_attachment());
        assert!(!ActionType::JointPose.exposes_attachment());
    }
}
