// Engine error types and constants

use crate::audio::EngineState;
use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants shared with the calling layer.
///
/// Error code range: 3001-3007
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// Device stream could not be opened
    pub const DEVICE_UNAVAILABLE: i32 = 3001;

    /// Operation requires the engine to be running
    pub const ENGINE_NOT_READY: i32 = 3002;

    /// Malformed input that cannot be clamped
    pub const INVALID_PARAMETER: i32 = 3003;

    /// Engine is in the terminal failed state
    pub const ALREADY_FAILED: i32 = 3004;

    /// Device stream failed while open or while closing
    pub const STREAM_FAILURE: i32 = 3005;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 3006;

    /// Blocking device task panicked or was cancelled
    pub const TASK_FAILED: i32 = 3007;
}

/// Log an engine error with structured context
///
/// Emits the numeric code, the component and the message in a single
/// line. Never call this from the render callback.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=AudioEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors surfaced to control-context callers
///
/// Render-context faults are never returned from here directly; they move
/// the engine to `Failed` and show up on the next status query or start.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Opening the device stream failed
    DeviceUnavailable { reason: String },

    /// Operation requires `Running`
    EngineNotReady { state: EngineState },

    /// Input could not be clamped into range (NaN, malformed enum)
    InvalidParameter { name: String, reason: String },

    /// Engine is `Failed` and needs an explicit reset
    AlreadyFailed,

    /// Device stream failed to start, stop or drain
    StreamFailure { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Blocking device task did not complete
    TaskFailed { reason: String },
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::DeviceUnavailable { .. } => EngineErrorCodes::DEVICE_UNAVAILABLE,
            EngineError::EngineNotReady { .. } => EngineErrorCodes::ENGINE_NOT_READY,
            EngineError::InvalidParameter { .. } => EngineErrorCodes::INVALID_PARAMETER,
            EngineError::AlreadyFailed => EngineErrorCodes::ALREADY_FAILED,
            EngineError::StreamFailure { .. } => EngineErrorCodes::STREAM_FAILURE,
            EngineError::LockPoisoned { .. } => EngineErrorCodes::LOCK_POISONED,
            EngineError::TaskFailed { .. } => EngineErrorCodes::TASK_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::DeviceUnavailable { reason } => {
                format!("Audio device unavailable: {}", reason)
            }
            EngineError::EngineNotReady { state } => {
                format!("Audio engine not ready (state: {}). Call open() first.", state)
            }
            EngineError::InvalidParameter { name, reason } => {
                format!("Invalid parameter '{}': {}", name, reason)
            }
            EngineError::AlreadyFailed => {
                "Audio engine failed. Call reset() before opening again.".to_string()
            }
            EngineError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            EngineError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            EngineError::TaskFailed { reason } => {
                format!("Engine task failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for EngineError {}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed {
            reason: err.to_string(),
        }
    }
}
