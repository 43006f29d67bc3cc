//! Engine error types.

use thiserror::Error;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("invalid machine definition: {reason}")]
    Configuration { reason: String },

    #[error("no transition from state '{state}' on event '{event}'")]
    NoSuchTransition { state: String, event: String },

    #[error("machine is locked by another instance, ID={instance_id}")]
    LockConflict { instance_id: String },

    #[error("transition action failed in state '{state}': {reason}")]
    ActionExecution { state: String, reason: String },

    #[error("automatic transitions revisited state '{state}'")]
    InfiniteLoop { state: String },

    #[error("instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("instance must be locked before it can be mutated, ID={instance_id}")]
    LockRequired { instance_id: String },

    #[error("instance has not been assigned an id by the persistence layer")]
    NotPersisted,

    #[error("invalid stored value: {reason}")]
    Decode { reason: String },

    #[error("store error: {reason}")]
    Store { reason: String },
}

impl FsmError {
    /// Returns an error code suitable for adapter and service surfaces.
    pub fn error_code(&self) -> &'static str {
        match self {
            FsmError::Configuration { .. } => "INVALID_DEFINITION",
            FsmError::NoSuchTransition { .. } => "NO_SUCH_TRANSITION",
            FsmError::LockConflict { .. } => "LOCK_CONFLICT",
            FsmError::ActionExecution { .. } => "ACTION_FAILED",
            FsmError::InfiniteLoop { .. } => "INFINITE_LOOP",
            FsmError::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            FsmError::LockRequired { .. } => "LOCK_REQUIRED",
            FsmError::NotPersisted => "NOT_PERSISTED",
            FsmError::Decode { .. } => "BAD_RECORD",
            FsmError::Store { .. } => "STORE_ERROR",
        }
    }
}
