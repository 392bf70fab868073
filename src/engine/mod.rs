//! Engine module housing the control plane.
//!
//! `backend` holds the device abstraction and its platform implementations;
//! `controller` is the async facade external callers drive.

pub mod backend;
pub mod controller;

#[cfg(target_os = "android")]
pub use backend::OboeBackend;
#[cfg(not(target_os = "android"))]
pub use backend::CpalBackend;
pub use backend::{
    AudioBackend, DeviceInfo, DeviceStream, SimulatedBackend, SimulatedDevice, StreamRequest,
    StubTimeSource, SystemTimeSource, TimeSource,
};
pub use controller::{EngineController, EngineStatus, ParamPatch};
