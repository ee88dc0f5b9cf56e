use serde::{Deserialize, Serialize};

use crate::models::{
    GeofenceMembership, GeofenceTransition, LocationSample, TrackingSession,
};
use crate::transport::socket::RemoteTransition;

/// Pushed to UI subscribers of [`TrackingController::subscribe`](super::TrackingController::subscribe).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackingEvent {
    StatusChanged {
        session: TrackingSession,
    },
    Sample {
        sample: LocationSample,
        membership: GeofenceMembership,
    },
    Transition {
        transition: GeofenceTransition,
    },
    /// Transition computed by the server, relayed as-is.
    ServerTransition {
        transition: RemoteTransition,
    },
    Error {
        message: String,
        needs_user_action: bool,
    },
}

/// Foreground/background state reported by the host app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    #[default]
    Active,
    Background,
    Inactive,
}
