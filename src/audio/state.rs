//! Engine lifecycle state machine
//!
//! ```text
//! Uninitialized --Open--> Starting --DeviceReady--> Running
//!       ^                    |                         |
//!       |               OpenFailed                   Close
//!     Reset                  v                         v
//!       +--------------- Failed <--FatalError--    Stopping --DeviceStopped--> Stopped
//! ```
//!
//! `Stopped` re-opens like `Uninitialized`. Transitions are pure functions on
//! the tagged state; `SharedEngineState` publishes the current tag atomically
//! so status queries never wait on the lifecycle lock.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Lifecycle events driving `EngineState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Device stream open requested
    Open,
    /// First render callback observed
    DeviceReady,
    /// Device stream could not be opened
    OpenFailed,
    /// Close requested
    Close,
    /// Render context fully drained
    DeviceStopped,
    /// Device reported an unrecoverable error
    FatalError,
    /// Explicit recovery from `Failed`
    Reset,
}

/// Rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: EngineState,
    pub event: LifecycleEvent,
}

impl EngineState {
    /// Apply `event`, returning the next state or the rejected pair.
    pub fn on(self, event: LifecycleEvent) -> Result<EngineState, IllegalTransition> {
        use EngineState::*;
        use LifecycleEvent::*;

        let next = match (self, event) {
            (Uninitialized | Stopped, Open) => Starting,
            (Starting, DeviceReady) => Running,
            (Starting, OpenFailed) => Failed,
            (Starting | Running, Close) => Stopping,
            // Tear-down of a failed engine goes through Stopping as well
            (Failed, Close) => Stopping,
            (Stopping, DeviceStopped) => Stopped,
            (Starting | Running | Stopping, FatalError) => Failed,
            (Failed, FatalError) => Failed,
            (Failed | Stopped | Uninitialized, Reset) => Uninitialized,
            (from, event) => return Err(IllegalTransition { from, event }),
        };
        Ok(next)
    }

    /// A device stream is (or is about to be) delivering callbacks.
    pub fn is_live(self) -> bool {
        matches!(self, EngineState::Starting | EngineState::Running)
    }

    /// Parameter setters are accepted only while running.
    pub fn accepts_tone_control(self) -> bool {
        self == EngineState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
            EngineState::Failed => "failed",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            EngineState::Uninitialized => 0,
            EngineState::Starting => 1,
            EngineState::Running => 2,
            EngineState::Stopping => 3,
            EngineState::Stopped => 4,
            EngineState::Failed => 5,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Stopping,
            4 => EngineState::Stopped,
            5 => EngineState::Failed,
            _ => EngineState::Uninitialized,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically published engine state.
#[derive(Debug)]
pub struct SharedEngineState(AtomicU8);

impl SharedEngineState {
    pub fn new() -> Self {
        Self(AtomicU8::new(EngineState::Uninitialized.to_u8()))
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Apply `event` with a CAS loop so concurrent observers (status queries
    /// promoting Starting→Running) never lose a transition.
    pub fn apply(&self, event: LifecycleEvent) -> Result<EngineState, IllegalTransition> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = EngineState::from_u8(current).on(event)?;
            match self.0.compare_exchange_weak(
                current,
                next.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }
}

impl SharedEngineState {
    /// Apply `event` only if the state is still `from`. Used by observers
    /// that must not override a transition made by the lifecycle owner.
    pub fn promote(&self, from: EngineState, event: LifecycleEvent) -> bool {
        let Ok(next) = from.on(event) else {
            return false;
        };
        self.0
            .compare_exchange(from.to_u8(), next.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SharedEngineState {
    fn default() -> Self {
        Self::new()
    }
}
