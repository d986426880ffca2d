// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Feeds the `/v1/events` SSE endpoint and any in-process observers.
// Events are never persisted; a slow subscriber loses the oldest ones.

use crate::domain::events::{MessagingEvent, SecurityEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Security(SecurityEvent),
    Messaging(MessagingEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before dropping old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_security_event(&self, event: SecurityEvent) {
        self.publish(DomainEvent::Security(event));
    }

    pub fn publish_messaging_event(&self, event: MessagingEvent) {
        self.publish(DomainEvent::Messaging(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to security events only.
    pub fn subscribe_security(&self) -> SecurityEventReceiver {
        SecurityEventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Hand the raw broadcast receiver to a stream adapter.
    pub fn into_inner(self) -> broadcast::Receiver<DomainEvent> {
        self.receiver
    }
}

/// Receiver that skips messaging traffic.
pub struct SecurityEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl SecurityEventReceiver {
    pub async fn recv(&mut self) -> Result<SecurityEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Security(security) = event {
                return Ok(security);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityId;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_security_event(SecurityEvent::EmergencyStopActivated {
            identity_id: IdentityId::new("controller-a"),
            stopped_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Security(SecurityEvent::EmergencyStopActivated { identity_id, .. }) => {
                assert_eq!(identity_id.as_str(), "controller-a");
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_security_receiver_skips_messaging() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_security();

        event_bus.publish_messaging_event(MessagingEvent::MessageErrored {
            message_id: Uuid::new_v4(),
            reason: "tag mismatch".into(),
            errored_at: Utc::now(),
        });
        event_bus.publish_security_event(SecurityEvent::SessionsExpired {
            count: 2,
            swept_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            SecurityEvent::SessionsExpired { count, .. } => assert_eq!(count, 2),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_security_event(SecurityEvent::AuthenticationFailed {
            identity_id: "mallory".into(),
            failed_at: Utc::now(),
        });

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_domain_event_serializes_with_type_tag() {
        let event = DomainEvent::Security(SecurityEvent::SessionsExpired {
            count: 1,
            swept_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "security");
    }
}
