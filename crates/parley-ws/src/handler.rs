use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parley_models::events::{EVENT_STOP_TYPING, EVENT_TYPING};
use parley_models::Envelope;
use tokio::time::Duration;

use crate::dispatcher;
use crate::session::Session;
use crate::GatewayState;

const PING_INTERVAL_SECS: u64 = 20;

/// Global connection ceiling. Admission is an atomic compare-exchange so a
/// burst of upgrades cannot overshoot the limit.
pub struct ConnectionCapacity {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionCapacity {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(AtomicOrdering::SeqCst)
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut current = self.active.load(AtomicOrdering::SeqCst);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(ConnectionGuard {
                        capacity: self.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }
}

struct ConnectionGuard {
    capacity: Arc<ConnectionCapacity>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.capacity.active.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let Some(_guard) = state.capacity.try_acquire() else {
        let (mut sender, _) = socket.split();
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 1013,
                reason: "relay is at connection capacity".into(),
            })))
            .await;
        tracing::warn!("connection refused: at capacity");
        return;
    };

    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new();
    let mut event_rx = state.core.bus.subscribe();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::debug!(session = %session.session_id, "connection opened");

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
                            tracing::debug!(session = %session.session_id, "unparseable frame dropped");
                            continue;
                        };
                        if let Some(participant) = &session.participant {
                            if envelope.event == EVENT_TYPING || envelope.event == EVENT_STOP_TYPING {
                                if !state.limits.check_typing(participant) {
                                    // Silent drop for high-frequency signals
                                    tracing::debug!(
                                        participant = %participant,
                                        "typing rate limited (silent drop)"
                                    );
                                    continue;
                                }
                            } else if let Err(retry_after_ms) = state.limits.check_message(participant) {
                                let reply = Envelope::new(
                                    "error",
                                    serde_json::json!({
                                        "code": "RATE_LIMITED",
                                        "message": "rate limited",
                                        "retryAfterMs": retry_after_ms,
                                    }),
                                );
                                if send_envelope(&mut sender, &reply).await.is_err() {
                                    break "websocket send error".to_string();
                                }
                                continue;
                            }
                        }
                        let mut failed = false;
                        for reply in dispatcher::dispatch(&state.core, &mut session, envelope) {
                            if send_envelope(&mut sender, &reply).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break "websocket send error".to_string();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break if let Some(frame) = frame {
                            format!("client close frame (code={}, reason={})", frame.code, frame.reason)
                        } else {
                            "client close frame (no code/reason)".to_string()
                        };
                    }
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        let Some(participant) = &session.participant else {
                            continue;
                        };
                        if !event.is_for(participant, session.session_id) {
                            continue;
                        }
                        if send_envelope(&mut sender, &event.envelope).await.is_err() {
                            break "websocket send error".to_string();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            session = %session.session_id,
                            skipped,
                            "event stream lagged; forcing reconnect"
                        );
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 1013,
                                reason: "event stream fell behind; reconnect required".into(),
                            })))
                            .await;
                        break format!("event stream lagged by {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break "event stream closed".to_string();
                    }
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error".to_string();
                }
            }
        }
    };

    dispatcher::cleanup_session(&state.core, session.session_id);
    tracing::info!(
        session = %session.session_id,
        participant = session.participant.as_ref().map(|p| p.as_str()),
        connected_secs = session.connected_at.elapsed().as_secs(),
        "disconnected: {disconnect_reason}"
    );
}

async fn send_envelope(
    sender: &mut (impl SinkExt<Message> + Unpin),
    envelope: &Envelope,
) -> Result<(), ()> {
    let Ok(payload) = serde_json::to_string(envelope) else {
        return Ok(());
    };
    sender.send(Message::Text(payload.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_releases_on_guard_drop() {
        let capacity = Arc::new(ConnectionCapacity::new(2));
        let a = capacity.try_acquire().unwrap();
        let _b = capacity.try_acquire().unwrap();
        assert!(capacity.try_acquire().is_none());
        assert_eq!(capacity.active(), 2);

        drop(a);
        assert_eq!(capacity.active(), 1);
        assert!(capacity.try_acquire().is_some());
    }
}
