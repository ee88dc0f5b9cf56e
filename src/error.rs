use thiserror::Error;

use crate::models::TrackingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionScope::Foreground => f.write_str("foreground"),
            PermissionScope::Background => f.write_str("background"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("{0} location permission denied")]
    PermissionDenied(PermissionScope),

    #[error("location services are disabled")]
    ServicesDisabled,

    /// Blocked by geofence policy. The caller must ask the user and retry with
    /// an explicit override.
    #[error("outside every geofence{}", violation_detail(.nearest_name, .distance_to_nearest_m))]
    GeofenceViolation {
        nearest_name: Option<String>,
        distance_to_nearest_m: Option<f64>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("persisted status {persisted} disagrees with background task state")]
    StaleState { persisted: TrackingStatus },

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: TrackingStatus,
        action: &'static str,
    },

    #[error("another tracking transition is in progress")]
    TransitionInProgress,

    #[error("no location fix available")]
    LocationUnavailable,

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("location platform failure: {0}")]
    Platform(String),

    #[error("storage error: {0}")]
    Storage(String),
}

fn violation_detail(nearest_name: &Option<String>, distance_m: &Option<f64>) -> String {
    match distance_m {
        Some(d) => format!(
            " ({d:.0} m from {})",
            nearest_name.as_deref().unwrap_or("nearest site")
        ),
        None => String::new(),
    }
}

impl TrackingError {
    /// Errors the UI has to resolve with the user before anything can proceed.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            TrackingError::PermissionDenied(_)
                | TrackingError::ServicesDisabled
                | TrackingError::GeofenceViolation { .. }
        )
    }
}

impl From<anyhow::Error> for TrackingError {
    fn from(err: anyhow::Error) -> Self {
        TrackingError::Storage(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for TrackingError {
    fn from(err: reqwest::Error) -> Self {
        TrackingError::Network(err.to_string())
    }
}

pub type TrackingResult<T> = std::result::Result<T, TrackingError>;
