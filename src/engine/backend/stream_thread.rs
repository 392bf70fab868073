//! Owner thread for device streams that must not leave the thread that
//! created them (cpal and oboe streams are `!Send`).
//!
//! The thread opens the stream, reports the negotiated [`DeviceInfo`] back
//! over a channel, then parks until `close` drops the shutdown sender. It
//! halts the stream before exiting, so joining it is the close barrier.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::EngineError;

use super::{DeviceInfo, DeviceStream};

/// A device stream held on its owner thread.
pub(crate) trait HeldStream {
    /// Stop callbacks and release the device.
    fn halt(self) -> Result<(), EngineError>;
}

pub(crate) struct StreamThread {
    info: DeviceInfo,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<Result<(), EngineError>>>,
}

impl StreamThread {
    /// Run `open` on a new named thread and wait for it to report.
    pub(crate) fn spawn<S, F>(name: &str, open: F) -> Result<Self, EngineError>
    where
        S: HeldStream + 'static,
        F: FnOnce() -> Result<(S, DeviceInfo), EngineError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<DeviceInfo, EngineError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, info) = match open() {
                    Ok(opened) => opened,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return Ok(());
                    }
                };
                if ready_tx.send(Ok(info)).is_ok() {
                    // Err means the sender was dropped: close requested
                    let _ = shutdown_rx.recv();
                }
                stream.halt()
            })
            .map_err(|e| EngineError::DeviceUnavailable {
                reason: format!("Failed to spawn stream thread: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok(Self {
                info,
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EngineError::DeviceUnavailable {
                    reason: "Stream thread exited before reporting".to_string(),
                })
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.shutdown.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| EngineError::StreamFailure {
                reason: "Stream thread panicked".to_string(),
            })?,
            None => Ok(()),
        }
    }
}

impl DeviceStream for StreamThread {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn close(mut self: Box<Self>) -> Result<(), EngineError> {
        self.shutdown()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flagged(Arc<AtomicBool>);

    impl HeldStream for Flagged {
        fn halt(self) -> Result<(), EngineError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn info() -> DeviceInfo {
        DeviceInfo {
            sample_rate_hz: 48_000,
            buffer_size_frames: 256,
            output_channels: 2,
            input_channels: 0,
            device_name: "test".to_string(),
            backend: "test".to_string(),
        }
    }

    #[test]
    fn test_close_halts_stream_before_returning() {
        let halted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&halted);
        let stream = StreamThread::spawn("test-stream", move || Ok((Flagged(flag), info())))
            .expect("open should succeed");

        assert_eq!(stream.info().sample_rate_hz, 48_000);
        assert!(!halted.load(Ordering::SeqCst));

        Box::new(stream).close().expect("close should succeed");
        assert!(halted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_open_error_is_reported() {
        let result = StreamThread::spawn::<Flagged, _>("test-stream", || {
            Err(EngineError::DeviceUnavailable {
                reason: "no device".to_string(),
            })
        });

        match result {
            Err(EngineError::DeviceUnavailable { reason }) => assert_eq!(reason, "no device"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("open should fail"),
        }
    }
}
