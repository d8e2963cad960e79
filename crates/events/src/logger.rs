//! Event logging service.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes every received [`KbEvent`] to the tracing output. Operator alerts
//! are logged at `error` level. It runs as a long-lived background task and
//! shuts down when the bus sender is dropped.

use tokio::sync::broadcast;

use crate::bus::KbEvent;

/// Background service that logs knowledge-base events.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel is closed.
    pub async fn run(mut receiver: broadcast::Receiver<KbEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &KbEvent) {
        let payload = match serde_json::to_string(&event.payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, event_type = event.event_type(), "Failed to encode event");
                return;
            }
        };

        if event.payload.is_alert() {
            tracing::error!(event_type = event.event_type(), %payload, "Operator alert");
        } else {
            tracing::info!(event_type = event.event_type(), %payload, "Event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::{EventBus, EventPayload};

    #[tokio::test]
    async fn logger_exits_when_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EventLogger::run(bus.subscribe()));

        bus.publish(EventPayload::UnreviewedCount { count: 1 });
        bus.publish(EventPayload::SchemaMigrationFailed {
            generation: 2,
            error: "stream failed".into(),
        });
        drop(bus);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("logger should stop")
            .expect("logger task should not panic");
    }
}
