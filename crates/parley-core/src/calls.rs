use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_models::{CallId, CallKind, ParticipantId};
use serde_json::{json, Value};

use crate::bus::EventBus;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;

/// Unordered participant pair: (a, b) == (b, a).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(ParticipantId, ParticipantId);

impl PairKey {
    fn new(a: &ParticipantId, b: &ParticipantId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Offer relayed, awaiting the recipient's answer.
    Ringing,
    /// Answer relayed; media is flowing peer-to-peer.
    Active,
}

/// Why an attempt reached its terminal state; carried in the end event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Hangup,
    Timeout,
    Disconnected,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::Timeout => "timeout",
            EndReason::Disconnected => "disconnected",
        }
    }
}

/// One in-progress call negotiation. Discarded on reaching a terminal state;
/// nothing survives the process.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub call_id: CallId,
    pub kind: CallKind,
    pub initiator: ParticipantId,
    pub recipient: ParticipantId,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
}

impl CallAttempt {
    fn is_party(&self, participant: &ParticipantId) -> bool {
        self.initiator == *participant || self.recipient == *participant
    }

    fn other_party(&self, participant: &ParticipantId) -> &ParticipantId {
        if self.initiator == *participant {
            &self.recipient
        } else {
            &self.initiator
        }
    }
}

/// Per-attempt call signaling state machine.
///
/// Keyed by server-generated `CallId`, with an unordered-pair index that
/// enforces at most one non-terminal attempt per pair per kind. The index is
/// also what lets the wire protocol omit call ids: `(actor, other, kind)`
/// resolves the pending attempt unambiguously.
#[derive(Clone)]
pub struct CallMap {
    inner: Arc<CallMapInner>,
}

struct CallMapInner {
    calls: DashMap<CallId, CallAttempt>,
    pending: DashMap<(PairKey, CallKind), CallId>,
    bus: EventBus,
    ring_timeout: Duration,
}

impl CallMap {
    pub fn new(bus: EventBus, ring_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CallMapInner {
                calls: DashMap::new(),
                pending: DashMap::new(),
                bus,
                ring_timeout,
            }),
        }
    }

    /// Start a negotiation and relay the offer to every live session of the
    /// recipient.
    ///
    /// Fails with `RecipientOffline` (and creates nothing) when the
    /// recipient has no live session, and with `InvalidState` when an
    /// attempt for this pair and kind is already pending — a second
    /// initiation does not supersede a ringing call.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &self,
        registry: &ConnectionRegistry,
        kind: CallKind,
        initiator: &ParticipantId,
        recipient: &ParticipantId,
        signal: Value,
        display_name: Option<String>,
        profile_pic: Option<String>,
    ) -> Result<CallId, RelayError> {
        if !registry.is_online(recipient) {
            return Err(RelayError::RecipientOffline);
        }

        let call_id = CallId::new();
        let key = (PairKey::new(initiator, recipient), kind);
        match self.inner.pending.entry(key) {
            Entry::Occupied(_) => {
                return Err(RelayError::InvalidState("a call for this pair is already pending"))
            }
            Entry::Vacant(slot) => {
                slot.insert(call_id);
            }
        }
        self.inner.calls.insert(
            call_id,
            CallAttempt {
                call_id,
                kind,
                initiator: initiator.clone(),
                recipient: recipient.clone(),
                state: CallState::Ringing,
                created_at: Utc::now(),
            },
        );

        tracing::info!(
            call_id = %call_id,
            kind = %kind,
            initiator = %initiator,
            recipient = %recipient,
            "call initiated"
        );
        self.inner.bus.send_to(
            vec![recipient.clone()],
            kind.offer_event(),
            json!({
                "signal": signal,
                "from": initiator,
                "name": display_name,
                "profilePic": profile_pic,
                "callId": call_id,
            }),
        );
        self.arm_ring_timeout(call_id);
        Ok(call_id)
    }

    /// Accept the pending attempt between `actor` and `other`. Only the
    /// recipient may accept, and only while the attempt is ringing. The
    /// answer is relayed as a bare signal to every session of the initiator.
    pub fn accept(
        &self,
        actor: &ParticipantId,
        other: &ParticipantId,
        kind: CallKind,
        signal: Value,
    ) -> Result<(), RelayError> {
        let key = (PairKey::new(actor, other), kind);
        let call_id = self
            .inner
            .pending
            .get(&key)
            .map(|id| *id)
            .ok_or(RelayError::InvalidState("no pending call for this pair"))?;

        let initiator = {
            let mut attempt = self
                .inner
                .calls
                .get_mut(&call_id)
                .ok_or(RelayError::InvalidState("no pending call for this pair"))?;
            if !attempt.is_party(actor) {
                return Err(RelayError::Forbidden);
            }
            if *actor != attempt.recipient {
                // The initiator cannot accept its own offer.
                return Err(RelayError::Forbidden);
            }
            if attempt.state != CallState::Ringing {
                return Err(RelayError::InvalidState("call is not ringing"));
            }
            attempt.state = CallState::Active;
            attempt.initiator.clone()
        };

        tracing::info!(call_id = %call_id, kind = %kind, recipient = %actor, "call accepted");
        self.inner
            .bus
            .send_to(vec![initiator], kind.accepted_event(), signal);
        Ok(())
    }

    /// Hang up the attempt between `actor` and `other`, relaying the end to
    /// the other party. Idempotent: ending an unknown or already-ended call
    /// is a no-op so disconnect races never surface as failures.
    pub fn end(&self, actor: &ParticipantId, other: &ParticipantId, kind: CallKind) {
        let key = (PairKey::new(actor, other), kind);
        let Some(call_id) = self.inner.pending.get(&key).map(|id| *id) else {
            return;
        };
        let Some(attempt) = self.discard(call_id) else {
            return;
        };
        if !attempt.is_party(actor) {
            return;
        }

        tracing::info!(call_id = %call_id, kind = %kind, by = %actor, "call ended");
        self.inner.bus.send_to(
            vec![attempt.other_party(actor).clone()],
            kind.ended_event(),
            json!({ "reason": EndReason::Hangup.as_str(), "callId": call_id }),
        );
    }

    /// Implicit end on disconnect: tear down every non-terminal attempt the
    /// participant holds, as if the remaining party had been hung up on.
    /// Best-effort reconciliation; never errors.
    pub fn end_all_for(&self, participant: &ParticipantId) {
        let held: Vec<CallId> = self
            .inner
            .calls
            .iter()
            .filter(|entry| entry.is_party(participant))
            .map(|entry| entry.call_id)
            .collect();

        for call_id in held {
            let Some(attempt) = self.discard(call_id) else {
                continue;
            };
            tracing::info!(
                call_id = %call_id,
                participant = %participant,
                "call ended by disconnect"
            );
            self.inner.bus.send_to(
                vec![attempt.other_party(participant).clone()],
                attempt.kind.ended_event(),
                json!({ "reason": EndReason::Disconnected.as_str(), "callId": call_id }),
            );
        }
    }

    /// Snapshot of an attempt, mainly for tests and introspection.
    pub fn get(&self, call_id: CallId) -> Option<CallAttempt> {
        self.inner.calls.get(&call_id).map(|a| a.clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner.calls.len()
    }

    fn arm_ring_timeout(&self, call_id: CallId) {
        let map = self.clone();
        let timeout = self.inner.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            map.expire_ringing(call_id);
        });
    }

    /// Fires once per attempt: ends it with a timeout reason if it is still
    /// ringing, otherwise does nothing.
    fn expire_ringing(&self, call_id: CallId) {
        let Some((_, attempt)) = self
            .inner
            .calls
            .remove_if(&call_id, |_, a| a.state == CallState::Ringing)
        else {
            return;
        };
        let key = (PairKey::new(&attempt.initiator, &attempt.recipient), attempt.kind);
        self.inner.pending.remove_if(&key, |_, id| *id == call_id);

        tracing::info!(call_id = %call_id, kind = %attempt.kind, "ringing call timed out");
        // Both parties learn about the timeout: the initiator per contract,
        // the recipient so its ringing UI stops.
        self.inner.bus.send_to(
            vec![attempt.initiator.clone(), attempt.recipient.clone()],
            attempt.kind.ended_event(),
            json!({ "reason": EndReason::Timeout.as_str(), "callId": call_id }),
        );
    }

    /// Remove an attempt and its pair-index entry. The index entry is only
    /// removed when it still points at this attempt, so a pair that was
    /// re-initiated in the meantime is left alone.
    fn discard(&self, call_id: CallId) -> Option<CallAttempt> {
        let (_, attempt) = self.inner.calls.remove(&call_id)?;
        let key = (PairKey::new(&attempt.initiator, &attempt.recipient), attempt.kind);
        self.inner.pending.remove_if(&key, |_, id| *id == call_id);
        Some(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundEvent;
    use crate::presence::PresencePublisher;
    use parley_models::SessionId;

    struct Fixture {
        registry: ConnectionRegistry,
        calls: CallMap,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::default();
        let registry =
            ConnectionRegistry::new(Arc::new(PresencePublisher::new(bus.clone())));
        let calls = CallMap::new(bus.clone(), Duration::from_secs(45));
        Fixture { registry, calls, bus }
    }

    fn online(fx: &Fixture, id: &str) -> ParticipantId {
        let participant = ParticipantId::from(id);
        fx.registry.register(SessionId::new(), &participant).unwrap();
        participant
    }

    fn next_event(rx: &mut tokio::sync::broadcast::Receiver<OutboundEvent>) -> OutboundEvent {
        rx.try_recv().expect("expected a bus event")
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_terminal_state() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");
        let mut rx = fx.bus.subscribe();

        let call_id = fx
            .calls
            .initiate(
                &fx.registry,
                CallKind::Video,
                &u1,
                &u2,
                json!({"sdp": "offer"}),
                Some("U One".into()),
                None,
            )
            .unwrap();

        let offer = next_event(&mut rx);
        assert_eq!(offer.envelope.event, "callUser");
        assert_eq!(offer.envelope.data["from"], "u1");
        assert_eq!(offer.envelope.data["signal"]["sdp"], "offer");
        assert!(offer.is_for(&u2, SessionId::new()));
        assert!(!offer.is_for(&u1, SessionId::new()));

        fx.calls
            .accept(&u2, &u1, CallKind::Video, json!({"sdp": "answer"}))
            .unwrap();
        assert_eq!(fx.calls.get(call_id).unwrap().state, CallState::Active);

        let answer = next_event(&mut rx);
        assert_eq!(answer.envelope.event, "callAccepted");
        // The original client feeds the payload straight into the peer
        // connection, so the answer goes out as the bare signal.
        assert_eq!(answer.envelope.data["sdp"], "answer");
        assert!(answer.is_for(&u1, SessionId::new()));

        fx.calls.end(&u1, &u2, CallKind::Video);
        assert!(fx.calls.get(call_id).is_none());
        let ended = next_event(&mut rx);
        assert_eq!(ended.envelope.event, "callEnded");
        assert_eq!(ended.envelope.data["reason"], "hangup");
        assert!(ended.is_for(&u2, SessionId::new()));

        // Second end is a silent no-op.
        fx.calls.end(&u1, &u2, CallKind::Video);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipient_rejected_without_state() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = ParticipantId::from("u2");

        let err = fx
            .calls
            .initiate(&fx.registry, CallKind::Audio, &u1, &u2, json!({}), None, None)
            .unwrap_err();
        assert_eq!(err, RelayError::RecipientOffline);
        assert_eq!(fx.calls.active_count(), 0);
    }

    #[tokio::test]
    async fn second_initiation_is_rejected_either_direction() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");

        let first = fx
            .calls
            .initiate(&fx.registry, CallKind::Video, &u1, &u2, json!({}), None, None)
            .unwrap();
        // Same pair, same kind: rejected no matter who initiates.
        assert!(matches!(
            fx.calls
                .initiate(&fx.registry, CallKind::Video, &u1, &u2, json!({}), None, None),
            Err(RelayError::InvalidState(_))
        ));
        assert!(matches!(
            fx.calls
                .initiate(&fx.registry, CallKind::Video, &u2, &u1, json!({}), None, None),
            Err(RelayError::InvalidState(_))
        ));
        // The first attempt is untouched.
        assert_eq!(fx.calls.get(first).unwrap().state, CallState::Ringing);

        // A different kind for the same pair is independent.
        fx.calls
            .initiate(&fx.registry, CallKind::Audio, &u1, &u2, json!({}), None, None)
            .unwrap();
        assert_eq!(fx.calls.active_count(), 2);
    }

    #[tokio::test]
    async fn only_the_recipient_may_accept() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");
        online(&fx, "u3");

        fx.calls
            .initiate(&fx.registry, CallKind::Video, &u1, &u2, json!({}), None, None)
            .unwrap();

        // The initiator answering its own offer is refused.
        assert_eq!(
            fx.calls.accept(&u1, &u2, CallKind::Video, json!({})),
            Err(RelayError::Forbidden)
        );
        // A third participant has no pending attempt with either party.
        assert!(matches!(
            fx.calls
                .accept(&ParticipantId::from("u3"), &u1, CallKind::Video, json!({})),
            Err(RelayError::InvalidState(_))
        ));
        // Wrong kind does not match the pending attempt.
        assert!(matches!(
            fx.calls.accept(&u2, &u1, CallKind::Audio, json!({})),
            Err(RelayError::InvalidState(_))
        ));

        fx.calls.accept(&u2, &u1, CallKind::Video, json!({})).unwrap();
        // Accepting twice: no longer ringing.
        assert!(matches!(
            fx.calls.accept(&u2, &u1, CallKind::Video, json!({})),
            Err(RelayError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_ends_held_calls_once() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");
        let mut rx = fx.bus.subscribe();

        fx.calls
            .initiate(&fx.registry, CallKind::Video, &u1, &u2, json!({}), None, None)
            .unwrap();
        let _offer = next_event(&mut rx);

        fx.calls.end_all_for(&u2);
        let ended = next_event(&mut rx);
        assert_eq!(ended.envelope.event, "callEnded");
        assert_eq!(ended.envelope.data["reason"], "disconnected");
        assert!(ended.is_for(&u1, SessionId::new()));

        // Exactly once: a repeat (disconnect race) produces nothing.
        fx.calls.end_all_for(&u2);
        assert!(rx.try_recv().is_err());
        assert_eq!(fx.calls.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ring_times_out() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");
        let mut rx = fx.bus.subscribe();

        let call_id = fx
            .calls
            .initiate(&fx.registry, CallKind::Audio, &u1, &u2, json!({}), None, None)
            .unwrap();
        let _offer = next_event(&mut rx);

        tokio::time::sleep(Duration::from_secs(46)).await;

        assert!(fx.calls.get(call_id).is_none());
        let ended = next_event(&mut rx);
        assert_eq!(ended.envelope.event, "audioCallEnded");
        assert_eq!(ended.envelope.data["reason"], "timeout");
        // Both parties are told so the recipient's ringing UI stops too.
        assert!(ended.is_for(&u1, SessionId::new()));
        assert!(ended.is_for(&u2, SessionId::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_accepted_calls_alone() {
        let fx = fixture();
        let u1 = online(&fx, "u1");
        let u2 = online(&fx, "u2");

        let call_id = fx
            .calls
            .initiate(&fx.registry, CallKind::Video, &u1, &u2, json!({}), None, None)
            .unwrap();
        fx.calls.accept(&u2, &u1, CallKind::Video, json!({})).unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fx.calls.get(call_id).unwrap().state, CallState::Active);
    }
}
