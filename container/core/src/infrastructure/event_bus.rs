// Event Bus Implementation - Pub/Sub for Container Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Scope transitions, instance lifecycle and passivation activity are
// published here for the surrounding web/request layer and observers.
//
// In-memory only: events are lost on container restart.

use crate::domain::events::{InstanceEvent, PassivationEvent, ScopeEvent};
use crate::domain::scope::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified container event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    Scope(ScopeEvent),
    Instance(InstanceEvent),
    Passivation(PassivationEvent),
}

/// Event bus for publishing and subscribing to container events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ContainerEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before dropping
    /// old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_scope_event(&self, event: ScopeEvent) {
        self.publish(ContainerEvent::Scope(event));
    }

    pub fn publish_instance_event(&self, event: InstanceEvent) {
        self.publish(ContainerEvent::Instance(event));
    }

    pub fn publish_passivation_event(&self, event: PassivationEvent) {
        self.publish(ContainerEvent::Passivation(event));
    }

    /// Publish a container event to all subscribers
    fn publish(&self, event: ContainerEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all container events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Subscribe and filter for passivation activity of a single session
    pub fn subscribe_session(&self, session_id: SessionId) -> SessionEventReceiver {
        let receiver = self.sender.subscribe();
        SessionEventReceiver {
            receiver,
            session_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all container events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ContainerEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<ContainerEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ContainerEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for session-specific passivation events (filtered)
pub struct SessionEventReceiver {
    receiver: broadcast::Receiver<ContainerEvent>,
    session_id: SessionId,
}

impl SessionEventReceiver {
    /// Receive the next passivation event for the subscribed session,
    /// filtering out events from other sessions.
    pub async fn recv(&mut self) -> Result<PassivationEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;

            if let ContainerEvent::Passivation(passivation) = event {
                if self.matches_session(&passivation) {
                    return Ok(passivation);
                }
            }
            // Continue loop if event doesn't match
        }
    }

    fn matches_session(&self, event: &PassivationEvent) -> bool {
        match event {
            PassivationEvent::Passivated { session_id, .. } => session_id == &self.session_id,
            PassivationEvent::Activated { session_id, .. } => session_id == &self.session_id,
            PassivationEvent::Removed { session_id, .. } => session_id == &self.session_id,
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
