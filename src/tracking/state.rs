use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{TrackingError, TrackingResult};
use crate::geofence::MembershipTracker;
use crate::models::{
    GeofenceMembership, GeofenceTransition, LocationSample, SessionMeta, TrackingSession,
    TrackingStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    Resume,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
        }
    }

    fn allowed_from(&self, status: TrackingStatus) -> bool {
        use TrackingStatus::*;
        match self {
            Action::Start => matches!(status, Inactive | Error),
            Action::Pause => status == Active,
            Action::Resume => status == Paused,
            Action::Stop => matches!(status, Active | Paused | Error),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub status: TrackingStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub membership: GeofenceMembership,
    /// Survives errors and stops so the UI can keep showing a position.
    pub last_location: Option<LocationSample>,
    pub last_error: Option<String>,
    #[serde(skip)]
    tracker: MembershipTracker,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, action: Action) -> TrackingResult<()> {
        if action.allowed_from(self.status) {
            Ok(())
        } else {
            Err(TrackingError::InvalidTransition {
                from: self.status,
                action: action.as_str(),
            })
        }
    }

    pub fn activate(&mut self, session_id: String, now: DateTime<Utc>) {
        if self.session_id.as_deref() != Some(session_id.as_str()) || self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = TrackingStatus::Active;
        self.session_id = Some(session_id);
        self.last_error = None;
    }

    pub fn pause(&mut self) {
        self.status = TrackingStatus::Paused;
    }

    /// Puts a relaunched process back into PAUSED without a foreground watch.
    pub fn restore_paused(&mut self, session_id: String) {
        self.status = TrackingStatus::Paused;
        self.session_id = Some(session_id);
    }

    /// Keeps the session id so a later `start()` continues the same session.
    pub fn fail(&mut self, message: String) {
        self.status = TrackingStatus::Error;
        self.last_error = Some(message);
    }

    pub fn stop(&mut self) {
        let last_location = self.last_location.take();
        *self = Self {
            last_location,
            ..Self::default()
        };
    }

    /// Records an accepted sample and returns the boundary crossings it caused.
    pub fn record_sample(
        &mut self,
        sample: LocationSample,
        membership: GeofenceMembership,
    ) -> Vec<GeofenceTransition> {
        let transitions = self.tracker.observe(membership.clone(), sample.timestamp);
        self.last_sample_at = Some(sample.timestamp);
        self.last_location = Some(sample);
        self.membership = membership;
        transitions
    }

    pub fn seed_location(&mut self, sample: LocationSample) {
        if self.last_location.is_none() {
            self.last_location = Some(sample);
        }
    }

    pub fn session(&self) -> TrackingSession {
        TrackingSession {
            status: self.status,
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            last_sample_at: self.last_sample_at,
        }
    }

    pub fn meta(&self) -> Option<SessionMeta> {
        let session_id = self.session_id.clone()?;
        Some(SessionMeta {
            session_id,
            status: self.status,
            is_in_geofence: self.membership.is_inside,
            geofence_id: self.membership.geofence_id.clone(),
        })
    }
}
