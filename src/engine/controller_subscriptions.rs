use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::EngineController;
use crate::telemetry::TelemetryEvent;

impl EngineController {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    /// Receive telemetry published after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry.subscribe()
    }

    /// Telemetry as a `Stream`. Events missed by a lagging subscriber are
    /// skipped rather than ending the stream.
    pub fn event_stream(&self) -> impl Stream<Item = TelemetryEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe_events()).filter_map(|event| event.ok())
    }
}
