use std::sync::Arc;
use std::time::Duration;

use crate::bus::EventBus;
use crate::calls::CallMap;
use crate::presence::PresencePublisher;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomTracker;

/// Shared relay state handed to every connection task.
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomTracker>,
    pub presence: Arc<PresencePublisher>,
    pub calls: CallMap,
}

impl AppState {
    pub fn new(ring_timeout: Duration) -> Self {
        let bus = EventBus::default();
        let presence = Arc::new(PresencePublisher::new(bus.clone()));
        let registry = Arc::new(ConnectionRegistry::new(presence.clone()));
        let rooms = Arc::new(RoomTracker::new());
        let calls = CallMap::new(bus.clone(), ring_timeout);
        Self {
            bus,
            registry,
            rooms,
            presence,
            calls,
        }
    }
}
