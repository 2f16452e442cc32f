use std::collections::HashSet;

use dashmap::DashMap;
use parley_models::{ParticipantId, RoomId};

/// Maps chat rooms to the participants currently subscribed to their live
/// events.
///
/// Membership here is a live-event subscription only; the persisted chat
/// membership is an external concern. References are weak: a participant may
/// go offline while still joined, and fan-out simply finds no live sessions
/// for them.
pub struct RoomTracker {
    rooms: DashMap<RoomId, HashSet<ParticipantId>>,
    /// Reverse index so a participant's rooms can be cleared on full offline
    /// without scanning every room.
    joined: DashMap<ParticipantId, HashSet<RoomId>>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            joined: DashMap::new(),
        }
    }

    /// Subscribe a participant to a room. Idempotent.
    pub fn join(&self, room: &RoomId, participant: &ParticipantId) {
        let newly_joined = self
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(participant.clone());
        self.joined
            .entry(participant.clone())
            .or_default()
            .insert(room.clone());

        if newly_joined {
            tracing::debug!(room = %room, participant = %participant, "joined room");
        }
    }

    /// Unsubscribe. No-op when the participant was not joined.
    pub fn leave(&self, room: &RoomId, participant: &ParticipantId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(participant);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());

        if let Some(mut rooms) = self.joined.get_mut(participant) {
            rooms.remove(room);
        }
        self.joined.remove_if(participant, |_, rooms| rooms.is_empty());
    }

    /// Drop every subscription of a participant. Invoked when their last
    /// session closes so rooms do not accumulate stale fan-out targets.
    pub fn leave_all(&self, participant: &ParticipantId) {
        let Some((_, rooms)) = self.joined.remove(participant) else {
            return;
        };
        for room in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(participant);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        tracing::debug!(participant = %participant, rooms = rooms.len(), "left all rooms");
    }

    /// Current member set of a room, for fan-out.
    pub fn members_of(&self, room: &RoomId) -> Vec<ParticipantId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_leave_restores_membership() {
        let tracker = RoomTracker::new();
        let room = RoomId::from("r1");
        let (a, b) = (ParticipantId::from("a"), ParticipantId::from("b"));

        tracker.join(&room, &a);
        let before = tracker.members_of(&room);

        tracker.join(&room, &b);
        tracker.leave(&room, &b);
        assert_eq!(tracker.members_of(&room), before);
    }

    #[test]
    fn join_is_idempotent() {
        let tracker = RoomTracker::new();
        let room = RoomId::from("r1");
        let a = ParticipantId::from("a");

        tracker.join(&room, &a);
        tracker.join(&room, &a);
        assert_eq!(tracker.members_of(&room).len(), 1);
    }

    #[test]
    fn leave_absent_is_a_noop() {
        let tracker = RoomTracker::new();
        tracker.leave(&RoomId::from("nowhere"), &ParticipantId::from("ghost"));
        assert!(tracker.members_of(&RoomId::from("nowhere")).is_empty());
    }

    #[test]
    fn leave_all_clears_every_room() {
        let tracker = RoomTracker::new();
        let (r1, r2) = (RoomId::from("r1"), RoomId::from("r2"));
        let (a, b) = (ParticipantId::from("a"), ParticipantId::from("b"));

        tracker.join(&r1, &a);
        tracker.join(&r2, &a);
        tracker.join(&r1, &b);

        tracker.leave_all(&a);
        assert_eq!(tracker.members_of(&r1), vec![b]);
        assert!(tracker.members_of(&r2).is_empty());
    }
}
