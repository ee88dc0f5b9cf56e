use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local mirror of a backend shift. The backend owns its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "startTime")]
    pub start_timestamp: DateTime<Utc>,
    #[serde(default, alias = "endTime")]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_distance: f64,
    #[serde(default)]
    pub is_in_geofence: bool,
}

impl Shift {
    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }
}

/// Body of the start-shift / end-shift calls and their socket twins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    pub is_in_geofence: bool,
    pub geofence_id: Option<String>,
    pub override_geofence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
