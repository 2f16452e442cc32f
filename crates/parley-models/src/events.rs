use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CallKind, ParticipantId, RoomId};

// Client -> server events
pub const EVENT_SETUP: &str = "setup";
pub const EVENT_USER_ONLINE: &str = "user:online";
pub const EVENT_USER_OFFLINE: &str = "user:offline";
pub const EVENT_JOIN_CHAT: &str = "join chat";
pub const EVENT_NEW_MESSAGE: &str = "new message";
pub const EVENT_ANSWER_CALL: &str = "answerCall";
pub const EVENT_ANSWER_AUDIO_CALL: &str = "answerAudioCall";

// Both directions
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_STOP_TYPING: &str = "stop typing";
pub const EVENT_CALL_USER: &str = "callUser";
pub const EVENT_AUDIO_CALL_USER: &str = "audioCallUser";
pub const EVENT_CALL_ENDED: &str = "callEnded";
pub const EVENT_AUDIO_CALL_ENDED: &str = "audioCallEnded";

// Server -> client events
pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_ONLINE_USERS: &str = "online:users";
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_MESSAGE_RECEIVED: &str = "message received";
pub const EVENT_CALL_ACCEPTED: &str = "callAccepted";
pub const EVENT_AUDIO_CALL_ACCEPTED: &str = "audioCallAccepted";
pub const EVENT_ERROR: &str = "error";

/// Wire envelope, both directions: `{"event": <name>, "data": <value>}`.
///
/// Payloads are kept as raw JSON so relayed events go out byte-for-byte
/// equivalent to what came in; typed structs below parse only the fields the
/// relay itself acts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

impl CallKind {
    /// Event name that carries the offer to the recipient.
    pub fn offer_event(self) -> &'static str {
        match self {
            CallKind::Video => EVENT_CALL_USER,
            CallKind::Audio => EVENT_AUDIO_CALL_USER,
        }
    }

    /// Event name that carries the answer back to the initiator.
    pub fn accepted_event(self) -> &'static str {
        match self {
            CallKind::Video => EVENT_CALL_ACCEPTED,
            CallKind::Audio => EVENT_AUDIO_CALL_ACCEPTED,
        }
    }

    /// Event name that tells the other party the attempt is over.
    pub fn ended_event(self) -> &'static str {
        match self {
            CallKind::Video => EVENT_CALL_ENDED,
            CallKind::Audio => EVENT_AUDIO_CALL_ENDED,
        }
    }
}

/// `setup` payload: the user object the client identifies as. Profile fields
/// beyond the id are ignored by the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct SetupPayload {
    #[serde(rename = "_id")]
    pub id: ParticipantId,
    #[serde(default)]
    pub username: Option<String>,
}

/// `user:online` / `user:offline` payload (the status-only client socket).
#[derive(Debug, Clone, Deserialize)]
pub struct UserStatusPayload {
    #[serde(rename = "userId")]
    pub user_id: ParticipantId,
}

/// Inbound call offer (`callUser` / `audioCallUser`).
#[derive(Debug, Clone, Deserialize)]
pub struct CallOffer {
    #[serde(rename = "userToCall")]
    pub user_to_call: ParticipantId,
    #[serde(rename = "signalData")]
    pub signal_data: Value,
    pub from: ParticipantId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "profilePic")]
    pub profile_pic: Option<String>,
}

/// Inbound call answer (`answerCall` / `answerAudioCall`). `to` is the
/// initiator's participant id; there is no call id on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct CallAnswer {
    pub signal: Value,
    pub to: ParticipantId,
}

/// Inbound hangup (`callEnded` / `audioCallEnded`).
#[derive(Debug, Clone, Deserialize)]
pub struct CallHangup {
    pub to: ParticipantId,
}

/// The slice of a `new message` payload the relay needs for fan-out; the
/// full payload is relayed verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub chat: ChatRef,
    pub sender: UserRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRef {
    #[serde(rename = "_id")]
    pub id: RoomId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    #[serde(rename = "_id")]
    pub id: ParticipantId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_omits_null_data() {
        let env = Envelope::new(EVENT_CONNECTED, Value::Null);
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"event":"connected"}"#);
    }

    #[test]
    fn envelope_missing_data_parses_as_null() {
        let env: Envelope = serde_json::from_str(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(env.event, EVENT_TYPING);
        assert!(env.data.is_null());
    }

    #[test]
    fn call_offer_uses_client_field_names() {
        let offer: CallOffer = serde_json::from_value(json!({
            "userToCall": "u2",
            "signalData": {"type": "offer", "sdp": "v=0"},
            "from": "u1",
            "name": "Ada",
        }))
        .unwrap();
        assert_eq!(offer.user_to_call.as_str(), "u2");
        assert_eq!(offer.from.as_str(), "u1");
        assert!(offer.profile_pic.is_none());
        assert_eq!(offer.signal_data["type"], "offer");
    }

    #[test]
    fn new_message_extracts_room_and_sender() {
        let msg: NewMessage = serde_json::from_value(json!({
            "_id": "m1",
            "content": "hi",
            "chat": {"_id": "room-9", "users": [{"_id": "a"}, {"_id": "b"}]},
            "sender": {"_id": "a", "username": "ada"},
        }))
        .unwrap();
        assert_eq!(msg.chat.id.as_str(), "room-9");
        assert_eq!(msg.sender.id.as_str(), "a");
    }

    #[test]
    fn call_kind_event_families() {
        assert_eq!(CallKind::Video.offer_event(), "callUser");
        assert_eq!(CallKind::Audio.offer_event(), "audioCallUser");
        assert_eq!(CallKind::Video.accepted_event(), "callAccepted");
        assert_eq!(CallKind::Audio.ended_event(), "audioCallEnded");
    }
}
