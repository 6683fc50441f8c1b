//! The realtime event union carried by the relay.
//!
//! Every event is a tagged variant: `{"type": "...", "payload": {...}}`.
//! Deserializing through this enum is the relay's schema validation —
//! anything that doesn't parse is dropped as malformed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::character::{Character, CharacterUpdateInput};
use crate::dice::{DiceRollInput, RollOutcome};
use crate::map::{MapLayerUpdate, MapState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollClear {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameUpdate {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSwitch {
    pub module: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatTick {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
}

/// A structured event exchanged between session participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RealtimeEvent {
    /// Opaque whole-session state blob; the relay does not interpret it.
    SessionState(Value),
    RollInitiate(DiceRollInput),
    RollResult(RollOutcome),
    RollClear(RollClear),
    NameUpdate(NameUpdate),
    MapUpdate(MapLayerUpdate),
    MapSync(MapState),
    CharacterUpdate(CharacterUpdateInput),
    CharacterSync(Vec<Character>),
    ChatMessage(ChatMessage),
    ModuleSwitch(ModuleSwitch),
    Heartbeat(HeartbeatTick),
}

impl RealtimeEvent {
    /// The wire tag for this event, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::SessionState(_) => "sessionState",
            RealtimeEvent::RollInitiate(_) => "rollInitiate",
            RealtimeEvent::RollResult(_) => "rollResult",
            RealtimeEvent::RollClear(_) => "rollClear",
            RealtimeEvent::NameUpdate(_) => "nameUpdate",
            RealtimeEvent::MapUpdate(_) => "mapUpdate",
            RealtimeEvent::MapSync(_) => "mapSync",
            RealtimeEvent::CharacterUpdate(_) => "characterUpdate",
            RealtimeEvent::CharacterSync(_) => "characterSync",
            RealtimeEvent::ChatMessage(_) => "chatMessage",
            RealtimeEvent::ModuleSwitch(_) => "moduleSwitch",
            RealtimeEvent::Heartbeat(_) => "heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn roll_result_uses_camel_case_tag() {
        let event = RealtimeEvent::RollResult(RollOutcome {
            id: "roll_1".to_string(),
            session_id: "ses_1".to_string(),
            user_id: "usr_1".to_string(),
            results: vec![],
            successes: 2,
            crit: false,
            panic: false,
            created_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rollResult");
        assert_eq!(json["payload"]["successes"], 2);
        assert_eq!(json["payload"]["crit"], false);
    }

    #[test]
    fn chat_message_round_trips() {
        let json = serde_json::json!({
            "type": "chatMessage",
            "payload": { "messageId": "msg_1", "content": "hello" }
        });
        let event: RealtimeEvent = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(event.kind(), "chatMessage");
        assert_eq!(serde_json::to_value(&event).unwrap(), json);
    }

    #[test]
    fn session_state_payload_is_opaque() {
        let json = serde_json::json!({
            "type": "sessionState",
            "payload": { "anything": ["goes", 1, null] }
        });
        let event: RealtimeEvent = serde_json::from_value(json).unwrap();
        match event {
            RealtimeEvent::SessionState(v) => assert_eq!(v["anything"][1], 1),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let json = serde_json::json!({ "type": "teleport", "payload": {} });
        assert!(serde_json::from_value::<RealtimeEvent>(json).is_err());
    }

    #[test]
    fn schema_violation_is_rejected() {
        // rollClear requires a sessionId.
        let json = serde_json::json!({ "type": "rollClear", "payload": {} });
        assert!(serde_json::from_value::<RealtimeEvent>(json).is_err());
    }
}
