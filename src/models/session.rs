use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    #[default]
    Inactive,
    Active,
    Paused,
    Error,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Inactive => "inactive",
            TrackingStatus::Active => "active",
            TrackingStatus::Paused => "paused",
            TrackingStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inactive" => Some(TrackingStatus::Inactive),
            "active" => Some(TrackingStatus::Active),
            "paused" => Some(TrackingStatus::Paused),
            "error" => Some(TrackingStatus::Error),
            _ => None,
        }
    }

    /// ACTIVE or PAUSED: a session id exists and the OS task may be running.
    pub fn is_running(&self) -> bool {
        matches!(self, TrackingStatus::Active | TrackingStatus::Paused)
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub status: TrackingStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Session fields attached to every outbound location update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: String,
    pub status: TrackingStatus,
    pub is_in_geofence: bool,
    pub geofence_id: Option<String>,
}
