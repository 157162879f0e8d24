// src/error.rs
//
// Error taxonomy for the door task.
//
// Almost everything is surfaced at construction, before the first
// simulation step; the step loop itself only rejects malformed caller
// input (wrong action length, missing embedding values). Policy-level
// "errors" are environment resets, not exceptions.

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Unrecognized strategy / action-type / remap selector, or an invalid
    /// configuration value.
    Config(String),
    /// A control path that is declared but deliberately unsupported
    /// (absolute control, attractor-based end-effector control).
    Unimplemented(String),
    /// The simulator asset does not satisfy the contract the task assumes:
    /// a body/joint name lookup failed, or a joint was declared without
    /// limits. Downstream code assumes handles and limits always exist.
    AssetContract(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Config(msg) => write!(f, "configuration error: {msg}"),
            TaskError::Unimplemented(msg) => write!(f, "unimplemented path: {msg}"),
            TaskError::AssetContract(msg) => write!(f, "asset contract violation: {msg}"),
        }
    }
}

impl Error for TaskError {}
