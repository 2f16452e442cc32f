pub mod events;
pub mod ids;

pub use events::Envelope;
pub use ids::{CallId, CallKind, ParticipantId, RoomId, SessionId};
