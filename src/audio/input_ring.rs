// InputRing - lock-free SPSC ring carrying microphone samples
//
// The capture callback and the render callback run on different device
// threads. Samples cross between them through an rtrb ring buffer:
//
// 1. Capture callback downmixes each frame to its first channel and pushes
// 2. Render callback pops up to one buffer's worth of samples per call
// 3. Missing samples are rendered as silence, overflow is dropped
//
// Neither side allocates or blocks after construction.

use rtrb::{Consumer, Producer, RingBuffer};

/// Factory for the capture/render ring pair
pub struct InputRing;

impl InputRing {
    /// Create a ring holding up to `capacity_frames` mono samples.
    pub fn new(capacity_frames: usize) -> (InputProducer, InputConsumer) {
        let (producer, consumer) = RingBuffer::<f32>::new(capacity_frames.max(1));
        (
            InputProducer {
                producer,
                dropped: 0,
            },
            InputConsumer { consumer },
        )
    }
}

/// Capture-side handle.
pub struct InputProducer {
    producer: Producer<f32>,
    dropped: u64,
}

impl InputProducer {
    /// Push interleaved capture data, keeping the first channel of each
    /// frame. Returns the number of frames accepted.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let mut accepted = 0;
        for frame in data.chunks(channels) {
            let sample = frame.first().copied().unwrap_or(0.0);
            if self.producer.push(sample).is_err() {
                self.dropped += 1;
            } else {
                accepted += 1;
            }
        }
        accepted
    }

    /// Frames discarded because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Render-side handle.
pub struct InputConsumer {
    consumer: Consumer<f32>,
}

impl InputConsumer {
    /// Fill `out` from the ring, zero-padding when capture is behind.
    ///
    /// When more than four buffers are queued the oldest samples are
    /// skipped so passthrough latency stays bounded. Returns the number of
    /// captured samples written.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let queued = self.consumer.slots();
        let limit = out.len().saturating_mul(4);
        if queued > limit {
            if let Ok(chunk) = self.consumer.read_chunk(queued - limit) {
                chunk.commit_all();
            }
        }

        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.consumer.pop() {
                Ok(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                Err(_) => *slot = 0.0,
            }
        }
        filled
    }

    pub fn queued(&self) -> usize {
        self.consumer.slots()
    }
}
