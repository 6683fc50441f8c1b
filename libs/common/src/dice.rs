//! Dice roll payload types shared between the relay and its clients.
//!
//! The relay never interprets these — it only validates shape on the way
//! through. Roll resolution happens elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The category a die in the pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DieKind {
    Attribute,
    Skill,
    Bonus,
    Stress,
    Special,
}

/// A single six-sided die in a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Die {
    /// Always 6 for this system.
    pub sides: u8,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: DieKind,
}

/// How many dice of each kind a roll is made up of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicePool {
    pub attribute: u8,
    pub skill: u8,
    pub bonus: u8,
    pub stress: u8,
    pub special: u8,
}

/// A roll request as initiated by a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRollInput {
    pub session_id: String,
    pub user_id: String,
    pub pool: DicePool,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One resolved die within a roll outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DieResult {
    pub die: Die,
    pub value: u8,
}

/// A fully resolved roll, broadcast to the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollOutcome {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub results: Vec<DieResult>,
    pub successes: u32,
    pub crit: bool,
    pub panic: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn die_kind_serializes_lowercase() {
        let die = Die {
            sides: 6,
            label: "STR".to_string(),
            kind: DieKind::Attribute,
        };
        let json = serde_json::to_value(&die).unwrap();
        assert_eq!(json["type"], "attribute");
        assert_eq!(json["sides"], 6);
    }

    #[test]
    fn roll_input_defaults_advantage() {
        let input: DiceRollInput = serde_json::from_value(serde_json::json!({
            "sessionId": "ses_1",
            "userId": "usr_1",
            "pool": { "attribute": 3, "skill": 2, "bonus": 0, "stress": 1, "special": 0 }
        }))
        .unwrap();
        assert!(!input.advantage);
        assert!(input.comment.is_none());
    }
}
