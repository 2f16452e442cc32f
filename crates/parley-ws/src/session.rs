use parley_models::{ParticipantId, SessionId};
use tokio::time::Instant;

/// Per-connection state owned by the connection task.
pub struct Session {
    pub session_id: SessionId,
    /// Set once `setup` succeeds; events that relay or mutate shared state
    /// are refused until then.
    pub participant: Option<ParticipantId>,
    pub connected_at: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            participant: None,
            connected_at: Instant::now(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
