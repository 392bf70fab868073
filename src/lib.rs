// Tone Engine - Rust audio core
// Lifecycle-managed device stream with a lock-free parameter bridge

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod telemetry;

pub use audio::{EngineState, ToneParameters};
pub use engine::{DeviceInfo, EngineController, EngineStatus, ParamPatch};
pub use error::EngineError;

/// Install the process-wide tracing subscriber. Safe to call repeatedly.
pub fn init_logging() {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "android")] {
            use tracing_subscriber::prelude::*;
            match tracing_android::layer("ToneEngine") {
                Ok(layer) => {
                    let _ = tracing_subscriber::registry().with(layer).try_init();
                }
                Err(err) => eprintln!("Failed to create Android log layer: {}", err),
            }
        } else {
            // stderr keeps stdout free for JSON output from the CLI
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

/// JNI_OnLoad is called when the native library is loaded by Android
/// This function initializes the Android context required by oboe-rs
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: jni::JavaVM, _reserved: *mut std::ffi::c_void) -> jni::sys::jint {
    init_logging();

    log::info!("JNI_OnLoad called - initializing Android context");

    // SAFETY: the pointer comes from a JavaVM the runtime just handed us and
    // stays valid for the life of the process. Oboe only needs the VM to
    // open streams, so no application context is registered.
    let vm_ptr = vm.get_java_vm_pointer() as *mut std::ffi::c_void;
    unsafe {
        ndk_context::initialize_android_context(vm_ptr, std::ptr::null_mut());
    }

    log::info!("Android context initialized successfully");

    jni::sys::JNI_VERSION_1_6
}
