use dashmap::DashSet;
use parley_models::events::EVENT_PRESENCE;
use parley_models::ParticipantId;
use serde_json::json;

use crate::bus::EventBus;

/// Derives online/offline edges from registry changes and broadcasts deltas.
///
/// The registry reports every status-changing mutation synchronously; this
/// publisher additionally dedupes redundant signals (a second device
/// connecting while already online, late duplicate disconnects) so exactly
/// one edge is broadcast per uninterrupted online period.
///
/// Entirely in-memory: a restart resets everyone to offline, which is
/// correct because sessions do not survive a restart either.
pub struct PresencePublisher {
    bus: EventBus,
    online: DashSet<ParticipantId>,
}

impl PresencePublisher {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            online: DashSet::new(),
        }
    }

    /// Called by the registry in the same logical step as the mutation that
    /// changed the participant's session set.
    pub fn on_registry_change(&self, participant: &ParticipantId, now_online: bool) {
        let edge = if now_online {
            self.online.insert(participant.clone())
        } else {
            self.online.remove(participant).is_some()
        };
        if !edge {
            return;
        }

        tracing::info!(participant = %participant, online = now_online, "presence edge");
        self.bus.send_all(
            EVENT_PRESENCE,
            json!({ "userId": participant, "online": now_online }),
        );
    }

    /// Current online set, for the `online:users` snapshot at setup.
    pub fn online_snapshot(&self) -> Vec<ParticipantId> {
        self.online.iter().map(|p| p.clone()).collect()
    }

    pub fn is_online(&self, participant: &ParticipantId) -> bool {
        self.online.contains(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundEvent;
    use parley_models::SessionId;
    use tokio::sync::broadcast::error::TryRecvError;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) => return out,
                Err(e) => panic!("bus receiver failed: {e}"),
            }
        }
    }

    #[test]
    fn one_edge_per_online_period() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let presence = PresencePublisher::new(bus);
        let alice = ParticipantId::from("alice");

        // device 1 connects, device 2 connects, device 1 drops, device 2 drops
        presence.on_registry_change(&alice, true);
        presence.on_registry_change(&alice, true);
        presence.on_registry_change(&alice, false);

        // The middle signals are not edges; redundant offline came from a
        // stale notifier, the set is authoritative.
        presence.on_registry_change(&alice, false);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].envelope.data["online"], true);
        assert_eq!(events[1].envelope.data["online"], false);
        // Presence deltas go to every registered session.
        assert!(events[0].is_for(&ParticipantId::from("bob"), SessionId::new()));
    }

    #[test]
    fn snapshot_tracks_current_set() {
        let presence = PresencePublisher::new(EventBus::default());
        presence.on_registry_change(&ParticipantId::from("a"), true);
        presence.on_registry_change(&ParticipantId::from("b"), true);
        presence.on_registry_change(&ParticipantId::from("a"), false);

        let snapshot = presence.online_snapshot();
        assert_eq!(snapshot, vec![ParticipantId::from("b")]);
        assert!(presence.is_online(&ParticipantId::from("b")));
        assert!(!presence.is_online(&ParticipantId::from("a")));
    }
}
