use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::perception::pipeline::PipelineStats;
use crate::perception::types::PixelRect;

const EVENT_CAPACITY: usize = 64;

/// Everything the detection core reports to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SymbolEvent {
    SessionStarted,
    /// Accepted detection of one frame, already mapped to display pixels.
    Overlay {
        frame_id: u64,
        label: String,
        confidence: f32,
        rect: PixelRect,
    },
    /// A symbol stayed accepted for the whole confirmation delay.
    SymbolConfirmed { label: String, confidence: f32 },
    /// Show the "could not identify" indicator.
    NotIdentified { reason: NotIdentifiedReason },
    /// Hide the "could not identify" indicator.
    IndicatorCleared,
    SessionFailed { reason: String },
    SessionStopped { stats: PipelineStats },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotIdentifiedReason {
    LowConfidence { label: String, confidence: f32 },
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub event: SymbolEvent,
}

/// Fan-out of session events. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    session_id: uuid::Uuid,
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(session_id: uuid::Uuid) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of listeners reached. No listeners is fine.
    pub fn publish(&self, event: SymbolEvent) -> usize {
        tracing::debug!(event = ?event, "publishing event");
        let envelope = EventEnvelope {
            session_id: self.session_id,
            timestamp: chrono::Utc::now(),
            event,
        };
        self.tx.send(envelope).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        let mut rx = bus.subscribe();
        let reached = bus.publish(SymbolEvent::SymbolConfirmed {
            label: "oil_pressure".into(),
            confidence: 0.98,
        });
        assert_eq!(reached, 1);

        let env = rx.recv().await.unwrap();
        assert_eq!(env.session_id, bus.session_id());
        assert_eq!(
            env.event,
            SymbolEvent::SymbolConfirmed {
                label: "oil_pressure".into(),
                confidence: 0.98
            }
        );
    }

    #[test]
    fn publishing_without_listeners_is_not_an_error() {
        let bus = EventBus::new(uuid::Uuid::new_v4());
        assert_eq!(bus.publish(SymbolEvent::IndicatorCleared), 0);
    }

    #[test]
    fn envelope_serializes_flat() {
        let env = EventEnvelope {
            session_id: uuid::Uuid::nil(),
            timestamp: chrono::Utc::now(),
            event: SymbolEvent::NotIdentified {
                reason: NotIdentifiedReason::Timeout,
            },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "not_identified");
        assert_eq!(json["reason"]["kind"], "timeout");
    }
}
