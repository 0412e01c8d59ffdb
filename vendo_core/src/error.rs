use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispenseError {
    /// User selected a size that is not in the volume table. Not a system
    /// fault; the controller stays in its current state.
    #[error("invalid size: {0:?}")]
    InvalidSize(String),
    /// A fill is already in progress on this controller.
    #[error("a fill is already running")]
    AlreadyRunning,
    /// The pulse counter was armed twice without completing or disarming.
    #[error("pulse counter is already armed")]
    AlreadyArmed,
    #[error("motor failed to start: {0}")]
    MotorStartFailure(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("invalid state: {0}")]
    State(String),
}

/// Why a fill ended in `Failed` instead of `Completed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbortReason {
    #[error("aborted by user")]
    UserRequest,
    #[error("max fill time exceeded")]
    MaxFillTime,
    #[error("motor failed to start")]
    MotorStart,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
