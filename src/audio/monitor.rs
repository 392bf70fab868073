//! RenderMonitor - lock-free bookkeeping shared with the render callback
//!
//! Holds the render gate, callback counters and the device fault flag.
//! Every method the callback touches is a handful of atomic operations.
//!
//! # Gate
//! The callback enters through [`RenderMonitor::enter`], which bumps an
//! in-flight counter before checking the armed flag. Close disarms first,
//! then waits for the counter to reach zero. Both sides use `SeqCst`, so
//! once [`RenderMonitor::disarm_and_drain`] returns `true` no callback is
//! running and none will produce audio until the gate is re-armed.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct RenderMonitor {
    armed: AtomicBool,
    in_flight: AtomicU32,
    callbacks: AtomicU64,
    frames: AtomicU64,
    last_buffer_frames: AtomicU32,
    degraded_buffers: AtomicU64,
    fault: AtomicBool,
}

/// Proof that the gate was open when the callback entered.
pub struct RenderTicket<'a> {
    monitor: &'a RenderMonitor,
}

impl Drop for RenderTicket<'_> {
    fn drop(&mut self) {
        self.monitor.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RenderMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear counters and the fault flag, then open the gate.
    pub fn arm(&self) {
        self.callbacks.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.last_buffer_frames.store(0, Ordering::Relaxed);
        self.degraded_buffers.store(0, Ordering::Relaxed);
        self.fault.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Render-side entry. `None` means the gate is closed: output silence.
    #[inline]
    pub fn enter(&self) -> Option<RenderTicket<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let ticket = RenderTicket { monitor: self };
        if self.armed.load(Ordering::SeqCst) {
            Some(ticket)
        } else {
            None
        }
    }

    /// Close the gate and wait for in-flight callbacks, up to `timeout`.
    pub fn disarm_and_drain(&self, timeout: Duration) -> bool {
        self.armed.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_micros(100));
        }
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn record_buffer(&self, frames: usize) {
        // Sizes first: a reader that sees the callback count sees them too
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        self.last_buffer_frames
            .store(frames.min(u32::MAX as usize) as u32, Ordering::Relaxed);
        self.callbacks.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_degraded(&self) {
        self.degraded_buffers.fetch_add(1, Ordering::Relaxed);
    }

    /// Flag an unrecoverable device error. Callable from any thread.
    #[inline]
    pub fn raise_fault(&self) {
        self.fault.store(true, Ordering::SeqCst);
    }

    pub fn has_fault(&self) -> bool {
        self.fault.load(Ordering::SeqCst)
    }

    /// Number of buffers rendered since the last arm.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Acquire)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn last_buffer_frames(&self) -> u32 {
        self.last_buffer_frames.load(Ordering::Relaxed)
    }

    pub fn degraded_buffers(&self) -> u64 {
        self.degraded_buffers.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_gate_closed_until_armed() {
        let monitor = RenderMonitor::new();
        assert!(monitor.enter().is_none());
        assert_eq!(monitor.in_flight(), 0);

        monitor.arm();
        let ticket = monitor.enter();
        assert!(ticket.is_some());
        assert_eq!(monitor.in_flight(), 1);
        drop(ticket);
        assert_eq!(monitor.in_flight(), 0);
    }

    #[test]
    fn test_drain_waits_for_in_flight_callback() {
        let monitor = Arc::new(RenderMonitor::new());
        monitor.arm();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let worker = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let _ticket = monitor.enter().expect("gate armed");
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(30));
            })
        };

        entered_rx.recv().unwrap();
        let drained = monitor.disarm_and_drain(Duration::from_secs(2));
        assert!(drained);
        assert_eq!(monitor.in_flight(), 0);
        assert!(monitor.enter().is_none());
        worker.join().unwrap();
    }

    #[test]
    fn test_drain_times_out_on_stuck_callback() {
        let monitor = RenderMonitor::new();
        monitor.arm();
        let _stuck = monitor.enter();

        assert!(!monitor.disarm_and_drain(Duration::from_millis(5)));
    }

    #[test]
    fn test_arm_clears_counters_and_fault() {
        let monitor = RenderMonitor::new();
        monitor.arm();
        monitor.record_buffer(256);
        monitor.record_degraded();
        monitor.raise_fault();
        assert_eq!(monitor.callbacks(), 1);
        assert_eq!(monitor.frames(), 256);
        assert!(monitor.has_fault());

        monitor.arm();
        assert_eq!(monitor.callbacks(), 0);
        assert_eq!(monitor.degraded_buffers(), 0);
        assert!(!monitor.has_fault());
    }
}
