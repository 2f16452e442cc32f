use parley_core::{AppState, RelayError};
use parley_models::events::*;
use parley_models::{CallKind, Envelope, ParticipantId, RoomId, SessionId};
use serde_json::{json, Value};

use crate::session::Session;

/// Handle one inbound envelope, mutating shared state and publishing fan-out
/// through the bus. Returned envelopes are direct replies for the originating
/// session only.
pub fn dispatch(core: &AppState, session: &mut Session, envelope: Envelope) -> Vec<Envelope> {
    match handle(core, session, envelope) {
        Ok(replies) => replies,
        Err(err) => {
            tracing::debug!(session = %session.session_id, error = %err, "event rejected");
            vec![error_envelope(&err)]
        }
    }
}

fn handle(
    core: &AppState,
    session: &mut Session,
    envelope: Envelope,
) -> Result<Vec<Envelope>, RelayError> {
    match envelope.event.as_str() {
        EVENT_SETUP => {
            let payload: SetupPayload = parse(envelope.data)?;
            bind(core, session, &payload.id)?;
            tracing::info!(
                session = %session.session_id,
                participant = %payload.id,
                username = payload.username.as_deref(),
                "session setup"
            );
            Ok(vec![
                Envelope::new(EVENT_CONNECTED, Value::Null),
                Envelope::new(EVENT_ONLINE_USERS, json!(core.presence.online_snapshot())),
            ])
        }
        EVENT_USER_ONLINE => {
            let payload: UserStatusPayload = parse(envelope.data)?;
            bind(core, session, &payload.user_id)?;
            Ok(vec![])
        }
        EVENT_USER_OFFLINE => {
            let payload: UserStatusPayload = parse(envelope.data)?;
            let me = authenticated(session)?;
            if payload.user_id != *me {
                return Err(RelayError::Forbidden);
            }
            cleanup_session(core, session.session_id);
            session.participant = None;
            Ok(vec![])
        }
        EVENT_JOIN_CHAT => {
            let me = authenticated(session)?.clone();
            let room = room_id(&envelope.data)?;
            core.rooms.join(&room, &me);
            Ok(vec![])
        }
        EVENT_TYPING | EVENT_STOP_TYPING => {
            let _ = authenticated(session)?;
            let room = room_id(&envelope.data)?;
            // Relayed verbatim; the payload is the room id the clients key
            // their indicators on. Only the originating session is excluded,
            // so the typist's other devices still see the indicator.
            let audience = core.rooms.members_of(&room);
            core.bus
                .send_to_excluding(audience, &envelope.event, envelope.data, session.session_id);
            Ok(vec![])
        }
        EVENT_NEW_MESSAGE => {
            let me = authenticated(session)?.clone();
            let message: NewMessage = parse(envelope.data.clone())?;
            if message.sender.id != me {
                return Err(RelayError::Forbidden);
            }
            // Session-level exclusion only: the sender's other devices get
            // the message too, so multi-device clients stay in sync.
            let audience = core.rooms.members_of(&message.chat.id);
            core.bus.send_to_excluding(
                audience,
                EVENT_MESSAGE_RECEIVED,
                envelope.data,
                session.session_id,
            );
            Ok(vec![])
        }
        EVENT_CALL_USER | EVENT_AUDIO_CALL_USER => {
            let me = authenticated(session)?.clone();
            let kind = call_kind(&envelope.event);
            let offer: CallOffer = parse(envelope.data)?;
            if offer.from != me {
                return Err(RelayError::Forbidden);
            }
            if offer.user_to_call == me {
                return Err(RelayError::BadRequest("cannot call yourself"));
            }
            core.calls.initiate(
                &core.registry,
                kind,
                &me,
                &offer.user_to_call,
                offer.signal_data,
                offer.name,
                offer.profile_pic,
            )?;
            Ok(vec![])
        }
        EVENT_ANSWER_CALL | EVENT_ANSWER_AUDIO_CALL => {
            let me = authenticated(session)?.clone();
            let kind = call_kind(&envelope.event);
            let answer: CallAnswer = parse(envelope.data)?;
            core.calls.accept(&me, &answer.to, kind, answer.signal)?;
            Ok(vec![])
        }
        EVENT_CALL_ENDED | EVENT_AUDIO_CALL_ENDED => {
            let me = authenticated(session)?.clone();
            let kind = call_kind(&envelope.event);
            let hangup: CallHangup = parse(envelope.data)?;
            core.calls.end(&me, &hangup.to, kind);
            Ok(vec![])
        }
        other => {
            tracing::debug!(session = %session.session_id, event = other, "unknown event ignored");
            Ok(vec![])
        }
    }
}

/// Shared teardown for socket close and the `user:offline` event. Unknown
/// sessions are a no-op so the two paths can race safely.
pub fn cleanup_session(core: &AppState, session_id: SessionId) {
    let Some(outcome) = core.registry.unregister(session_id) else {
        return;
    };
    if outcome.went_offline {
        core.rooms.leave_all(&outcome.participant);
        core.calls.end_all_for(&outcome.participant);
    }
}

fn bind(core: &AppState, session: &mut Session, participant: &ParticipantId) -> Result<(), RelayError> {
    core.registry.register(session.session_id, participant)?;
    session.participant = Some(participant.clone());
    Ok(())
}

fn authenticated(session: &Session) -> Result<&ParticipantId, RelayError> {
    session.participant.as_ref().ok_or(RelayError::Unauthenticated)
}

fn parse<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, RelayError> {
    serde_json::from_value(data).map_err(|_| RelayError::BadRequest("malformed payload"))
}

fn room_id(data: &Value) -> Result<RoomId, RelayError> {
    data.as_str()
        .map(RoomId::from)
        .ok_or(RelayError::BadRequest("expected a room id"))
}

fn call_kind(event: &str) -> CallKind {
    match event {
        EVENT_AUDIO_CALL_USER | EVENT_ANSWER_AUDIO_CALL | EVENT_AUDIO_CALL_ENDED => CallKind::Audio,
        _ => CallKind::Video,
    }
}

fn error_envelope(err: &RelayError) -> Envelope {
    let mut data = json!({
        "code": err.code(),
        "message": err.to_string(),
    });
    if let RelayError::RateLimited { retry_after_ms } = err {
        data["retryAfterMs"] = json!(retry_after_ms);
    }
    Envelope::new(EVENT_ERROR, data)
}
