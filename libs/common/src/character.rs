//! Character sheet payloads exchanged over the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named attribute on a character sheet (0-10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: u8,
}

/// An inventory line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    pub quantity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CharacterRole {
    Player,
    Npc,
    Ally,
    Enemy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterStatus {
    Healthy,
    Injured,
    Critical,
    Dead,
}

/// A full character record, used for whole-roster syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    pub name: String,
    pub role: CharacterRole,
    pub attributes: Vec<Attribute>,
    pub inventory: Vec<InventoryItem>,
    pub status: CharacterStatus,
    pub updated_at: DateTime<Utc>,
}

/// A partial character update keyed by id and session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdateInput {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<InventoryItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CharacterStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(CharacterRole::Npc).unwrap(),
            serde_json::json!("NPC")
        );
    }

    #[test]
    fn update_input_accepts_partial_payload() {
        let input: CharacterUpdateInput = serde_json::from_value(serde_json::json!({
            "id": "chr_1",
            "sessionId": "ses_1",
            "status": "injured"
        }))
        .unwrap();
        assert_eq!(input.status, Some(CharacterStatus::Injured));
        assert!(input.attributes.is_none());
        assert!(input.inventory.is_none());
    }
}
