use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parley_models::{ParticipantId, SessionId};

use crate::error::RelayError;
use crate::presence::PresencePublisher;

/// Result of removing a session from the registry.
#[derive(Debug, Clone)]
pub struct UnregisterOutcome {
    pub participant: ParticipantId,
    /// True when this was the participant's last live session.
    pub went_offline: bool,
}

/// Maps durable participant identities to their live sessions.
///
/// A participant may hold several sessions at once (one per device); a
/// session belongs to at most one participant. A participant is online iff
/// its session set is non-empty. Status-changing mutations notify the
/// presence publisher in the same logical step, so presence is never
/// observably stale relative to registry state.
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, ParticipantId>,
    participants: DashMap<ParticipantId, HashSet<SessionId>>,
    presence: Arc<PresencePublisher>,
}

impl ConnectionRegistry {
    pub fn new(presence: Arc<PresencePublisher>) -> Self {
        Self {
            sessions: DashMap::new(),
            participants: DashMap::new(),
            presence,
        }
    }

    /// Bind a session to a participant. Idempotent per session; rebinding a
    /// live session to a different participant is refused.
    pub fn register(
        &self,
        session: SessionId,
        participant: &ParticipantId,
    ) -> Result<(), RelayError> {
        if let Some(existing) = self.sessions.get(&session) {
            if *existing == *participant {
                return Ok(());
            }
            return Err(RelayError::AlreadyBound);
        }
        self.sessions.insert(session, participant.clone());

        let went_online = {
            let mut set = self.participants.entry(participant.clone()).or_default();
            let was_offline = set.is_empty();
            set.insert(session);
            was_offline
        };

        tracing::debug!(
            session = %session,
            participant = %participant,
            online_sessions = self.session_count(participant),
            "session registered"
        );

        if went_online {
            self.presence.on_registry_change(participant, true);
        }
        Ok(())
    }

    /// Remove a session. Unknown sessions are a no-op, not an error: late
    /// and duplicate disconnect events are expected.
    pub fn unregister(&self, session: SessionId) -> Option<UnregisterOutcome> {
        let (_, participant) = self.sessions.remove(&session)?;

        let went_offline = {
            match self.participants.get_mut(&participant) {
                Some(mut set) => {
                    set.remove(&session);
                    set.is_empty()
                }
                None => false,
            }
        };
        if went_offline {
            self.participants.remove_if(&participant, |_, set| set.is_empty());
            self.presence.on_registry_change(&participant, false);
        }

        tracing::debug!(
            session = %session,
            participant = %participant,
            went_offline,
            "session unregistered"
        );
        Some(UnregisterOutcome {
            participant,
            went_offline,
        })
    }

    /// Live sessions of a participant, for fan-out. Empty when offline.
    pub fn sessions_for(&self, participant: &ParticipantId) -> Vec<SessionId> {
        self.participants
            .get(participant)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, participant: &ParticipantId) -> bool {
        self.participants
            .get(participant)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub fn participant_of(&self, session: SessionId) -> Option<ParticipantId> {
        self.sessions.get(&session).map(|p| p.clone())
    }

    fn session_count(&self, participant: &ParticipantId) -> usize {
        self.participants
            .get(participant)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}
