//! Controller telemetry.
//!
//! Lifecycle and parameter events fan out over a tokio broadcast channel.
//! Publishing never blocks; with no subscribers events are dropped.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::engine::backend::TimeSource;

pub mod events;

pub use events::{TelemetryEvent, TelemetryEventKind};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Timestamping broadcast publisher.
pub struct TelemetryPublisher {
    tx: broadcast::Sender<TelemetryEvent>,
    time_source: Arc<dyn TimeSource>,
    start_instant: Instant,
}

impl TelemetryPublisher {
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let start_instant = time_source.now();
        Self {
            tx,
            time_source,
            start_instant,
        }
    }

    pub fn publish(&self, kind: TelemetryEventKind, detail: Option<String>) {
        let timestamp_ms = self
            .time_source
            .now()
            .saturating_duration_since(self.start_instant)
            .as_millis() as u64;
        let _ = self.tx.send(TelemetryEvent {
            timestamp_ms,
            kind,
            detail,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::StubTimeSource;

    #[test]
    fn test_events_carry_monotonic_timestamps() {
        let publisher = TelemetryPublisher::new(Arc::new(StubTimeSource::new()));
        let mut rx = publisher.subscribe();

        publisher.publish(TelemetryEventKind::EngineStopped, None);
        publisher.publish(
            TelemetryEventKind::EffectToggled { enabled: false },
            Some("test".to_string()),
        );

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.kind, TelemetryEventKind::EngineStopped);
        assert!(second.timestamp_ms > first.timestamp_ms);
        assert_eq!(second.detail.as_deref(), Some("test"));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = TelemetryPublisher::new(Arc::new(StubTimeSource::new()));
        publisher.publish(TelemetryEventKind::Warning, None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = TelemetryEvent {
            timestamp_ms: 20,
            kind: TelemetryEventKind::EngineFailed {
                last_state: crate::audio::EngineState::Running,
            },
            detail: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "engine_failed");
        assert_eq!(json["kind"]["payload"]["last_state"], "running");
    }
}
