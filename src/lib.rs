//! Batched two-arm door manipulation task.
//!
//! This crate exposes a vectorized door-closing environment: two sphere
//! proxy arms that can latch onto authored grasp sites on a double
//! door, per-environment switching between position and force control,
//! and pluggable reward scoring. The binary (`src/bin/rollout.rs`) is
//! just a thin rollout / research harness around these components.

pub mod attach;
pub mod config;
pub mod control;
pub mod domain_rand;
pub mod error;
pub mod logging;
pub mod observation;
pub mod reward;
pub mod sim;
pub mod state;
pub mod task;
pub mod transform;

// --- Re-exports for ergonomic external use ---------------------------------

pub use attach::{
    default_door_points, AttachPointSpec, AttachablePoint, AttachmentRegistry, AttachmentTracker,
    DoorLeaf,
};

pub use config::{ActionType, RewardKind, RewardRemap, TaskConfig};

pub use control::{ActionLayout, ArmLayout, ControlDispatcher};

pub use domain_rand::{DomainRandConfig, DomainRandSampler};

pub use error::TaskError;

pub use logging::{EventSink, FileSink, NoopSink, StepRecord};

pub use observation::ObservationSpec;

pub use reward::{EmbeddingModel, Extras, RewardScorer, RewardStrategy};

pub use sim::{BodyHandle, EnvId, JointHandle, KinematicBackend, SimulatorBackend};

pub use state::{BatchState, NUM_ARMS};

pub use task::{DoorTask, EpisodeOutcome};

pub use transform::RigidPose;
