pub mod bus;
pub mod calls;
pub mod error;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod state;

pub use bus::{Audience, EventBus, OutboundEvent};
pub use calls::{CallAttempt, CallMap, CallState, EndReason};
pub use error::RelayError;
pub use presence::PresencePublisher;
pub use registry::{ConnectionRegistry, UnregisterOutcome};
pub use rooms::RoomTracker;
pub use state::AppState;
