use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use parley_models::ParticipantId;
use tokio::time::Duration;

/// Participant-level rate limiters shared across all connections of the same
/// participant, so limits cannot be bypassed by opening more tabs.
pub struct RateLimits {
    /// Any inbound event except typing signals.
    messages: DefaultKeyedRateLimiter<ParticipantId>,
    /// `typing` / `stop typing`, limited separately and dropped silently.
    typing: DefaultKeyedRateLimiter<ParticipantId>,
}

impl RateLimits {
    pub fn new(messages_per_minute: u32, typing_per_minute: u32) -> Self {
        Self {
            messages: RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(messages_per_minute.max(1)).unwrap(),
            )),
            typing: RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(typing_per_minute.max(1)).unwrap(),
            )),
        }
    }

    /// `Ok(())` when allowed, `Err(retry_after_ms)` when limited.
    pub fn check_message(&self, participant: &ParticipantId) -> Result<(), u64> {
        match self.messages.check_key(participant) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(wait.as_millis().max(1) as u64)
            }
        }
    }

    pub fn check_typing(&self, participant: &ParticipantId) -> bool {
        self.typing.check_key(participant).is_ok()
    }

    /// Periodic pruning of stale limiter entries to keep memory bounded.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let limits = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await; // skip immediate first tick
            loop {
                interval.tick().await;
                limits.messages.retain_recent();
                limits.typing.retain_recent();
                limits.messages.shrink_to_fit();
                limits.typing.shrink_to_fit();
                tracing::trace!("rate limiter cleanup: pruned stale entries");
            }
        });
    }
}
