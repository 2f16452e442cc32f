use parley_models::{Envelope, ParticipantId, SessionId};
use serde_json::Value;
use tokio::sync::broadcast;

/// Delivery scope for one outbound event.
#[derive(Debug, Clone)]
pub enum Audience {
    /// Every registered session.
    Everyone,
    /// Every live session of the listed participants.
    Participants(Vec<ParticipantId>),
}

/// One outbound event published for fan-out.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub envelope: Envelope,
    pub audience: Audience,
    /// The session that originated the inbound event, when relaying. It is
    /// never delivered back to itself; other sessions of the same
    /// participant still receive the event.
    pub exclude_session: Option<SessionId>,
}

impl OutboundEvent {
    /// Whether a registered session should receive this event.
    pub fn is_for(&self, participant: &ParticipantId, session: SessionId) -> bool {
        if self.exclude_session == Some(session) {
            return false;
        }
        match &self.audience {
            Audience::Everyone => true,
            Audience::Participants(ids) => ids.contains(participant),
        }
    }
}

/// Broadcast-based event bus for real-time fan-out.
///
/// Publishing never blocks on receivers: a connection task that falls behind
/// sees a lagged error on its receiver and is disconnected by its own loop.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OutboundEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: OutboundEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Deliver `event` to every live session of `participants`.
    pub fn send_to(&self, participants: Vec<ParticipantId>, event: &str, data: Value) {
        self.publish(OutboundEvent {
            envelope: Envelope::new(event, data),
            audience: Audience::Participants(participants),
            exclude_session: None,
        });
    }

    /// Relay `event` to every live session of `participants` except the
    /// originating session itself.
    pub fn send_to_excluding(
        &self,
        participants: Vec<ParticipantId>,
        event: &str,
        data: Value,
        origin: SessionId,
    ) {
        self.publish(OutboundEvent {
            envelope: Envelope::new(event, data),
            audience: Audience::Participants(participants),
            exclude_session: Some(origin),
        });
    }

    /// Broadcast `event` to every registered session.
    pub fn send_all(&self, event: &str, data: Value) {
        self.publish(OutboundEvent {
            envelope: Envelope::new(event, data),
            audience: Audience::Everyone,
            exclude_session: None,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
