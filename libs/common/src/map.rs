//! Shared map state and layer update payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_opacity() -> f32 {
    1.0
}

/// A drawable layer on the session map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLayer {
    pub id: String,
    pub name: String,
    pub visible: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// A token placed on a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapToken {
    pub id: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub layer_id: String,
}

/// The full map state for a session, used for whole-map syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub session_id: String,
    pub background_url: Option<String>,
    pub layers: Vec<MapLayer>,
    pub tokens: Vec<MapToken>,
    /// Revealed fog-of-war circles as (x, y, radius).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fog_of_war: Option<Vec<(f64, f64, f64)>>,
    pub updated_at: DateTime<Utc>,
}

/// A partial change to a single layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapLayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
}

/// An incremental layer update broadcast to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapLayerUpdate {
    pub session_id: String,
    pub layer_id: String,
    pub changes: MapLayerPatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_opacity_defaults_to_one() {
        let layer: MapLayer = serde_json::from_value(serde_json::json!({
            "id": "l1",
            "name": "Terrain",
            "visible": true
        }))
        .unwrap();
        assert_eq!(layer.opacity, 1.0);
    }

    #[test]
    fn layer_update_round_trips() {
        let update = MapLayerUpdate {
            session_id: "ses_1".to_string(),
            layer_id: "l1".to_string(),
            changes: MapLayerPatch {
                visible: Some(false),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["sessionId"], "ses_1");
        assert_eq!(json["changes"]["visible"], false);
        assert!(json["changes"].get("opacity").is_none());
    }
}
