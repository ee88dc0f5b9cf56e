use std::sync::{Arc, RwLock};

use chrono::{Duration, NaiveDate, NaiveTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::Database;
use crate::error::{TrackingError, TrackingResult};
use crate::geofence::GeofenceSet;
use crate::location::{AccuracyTier, LocationSourceAdapter};
use crate::models::{Shift, ShiftRequest};
use crate::tracking::TrackingController;
use crate::transport::{ClientEvent, SocketChannel, TrackingBackend};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Employees allowed to clock in from anywhere skip the geofence check.
    #[serde(default)]
    pub can_submit_anywhere: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftOptions {
    /// The user saw the geofence warning and chose to continue.
    #[serde(default)]
    pub override_confirmed: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftAction {
    Start,
    End,
}

/// Gates shift start/end on geofence membership and keeps the local shift
/// mirror in line with the backend.
#[derive(Clone)]
pub struct ShiftController {
    adapter: LocationSourceAdapter,
    geofences: GeofenceSet,
    backend: Arc<dyn TrackingBackend>,
    socket: Arc<dyn SocketChannel>,
    tracking: TrackingController,
    db: Database,
    profile: Arc<RwLock<UserProfile>>,
    current: Arc<Mutex<Option<Shift>>>,
}

impl ShiftController {
    pub fn new(
        tracking: TrackingController,
        backend: Arc<dyn TrackingBackend>,
        socket: Arc<dyn SocketChannel>,
        db: Database,
    ) -> Self {
        Self {
            adapter: tracking.location().clone(),
            geofences: tracking.geofences(),
            backend,
            socket,
            tracking,
            db,
            profile: Arc::new(RwLock::new(UserProfile::default())),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_profile(&self, profile: UserProfile) {
        match self.profile.write() {
            Ok(mut guard) => *guard = profile,
            Err(poisoned) => *poisoned.into_inner() = profile,
        }
    }

    pub fn profile(&self) -> UserProfile {
        match self.profile.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Starts a shift and, once the backend accepts it, tracking.
    ///
    /// Outside every geofence this fails with `GeofenceViolation` unless the
    /// profile allows it or `options.override_confirmed` is set.
    pub async fn start_shift(&self, options: ShiftOptions) -> TrackingResult<Shift> {
        let request = self.prepare(ShiftAction::Start, options).await?;
        self.announce(ClientEvent::ShiftStart(request.clone())).await;

        let shift = self.backend.start_shift(&request).await?;
        info!("Shift {} started", shift.id);
        self.remember(&shift).await;

        if let Err(err) = self.tracking.start().await {
            warn!("Shift {} started but tracking did not: {err}", shift.id);
        }
        Ok(shift)
    }

    pub async fn end_shift(&self, options: ShiftOptions) -> TrackingResult<Shift> {
        let request = self.prepare(ShiftAction::End, options).await?;
        self.announce(ClientEvent::ShiftEnd(request.clone())).await;

        let shift = self.backend.end_shift(&request).await?;
        info!("Shift {} ended", shift.id);
        self.remember(&shift).await;

        match self.tracking.stop().await {
            Ok(_) | Err(TrackingError::InvalidTransition { .. }) => {}
            Err(err) => warn!("Shift {} ended but tracking did not stop: {err}", shift.id),
        }
        Ok(shift)
    }

    /// Asks the backend for the open shift and refreshes the mirror.
    pub async fn current_shift(&self) -> TrackingResult<Option<Shift>> {
        let shift = self.backend.current_shift().await?;
        match &shift {
            Some(shift) => self.remember(shift).await,
            None => *self.current.lock().await = None,
        }
        Ok(shift)
    }

    pub async fn shift_history(&self, start: NaiveDate, end: NaiveDate) -> TrackingResult<Vec<Shift>> {
        let shifts = self.backend.shift_history(start, end).await?;
        if let Err(err) = self.db.upsert_shifts(&shifts).await {
            warn!("Failed to mirror shift history: {err:#}");
        }
        Ok(shifts)
    }

    /// History mirrored by earlier [`shift_history`](Self::shift_history)
    /// calls, for when the backend is out of reach.
    pub async fn cached_shift_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TrackingResult<Vec<Shift>> {
        let from = start.and_time(NaiveTime::MIN).and_utc();
        let to = end.and_time(NaiveTime::MIN).and_utc() + Duration::seconds(86_399);
        Ok(self.db.list_shifts_between(from, to).await?)
    }

    /// The last known open shift, without touching the network.
    pub async fn cached_shift(&self) -> TrackingResult<Option<Shift>> {
        if let Some(shift) = self.current.lock().await.clone() {
            return Ok(Some(shift));
        }
        Ok(self.db.get_open_shift().await?)
    }

    async fn prepare(&self, action: ShiftAction, options: ShiftOptions) -> TrackingResult<ShiftRequest> {
        let sample = self
            .adapter
            .get_once(AccuracyTier::High)
            .await?
            .ok_or(TrackingError::LocationUnavailable)?;
        let membership = self.geofences.evaluate(&sample);

        if !membership.is_inside
            && !self.profile().can_submit_anywhere
            && !options.override_confirmed
        {
            let nearest = self.geofences.nearest(&sample);
            info!("{action:?} shift blocked outside every geofence");
            return Err(TrackingError::GeofenceViolation {
                nearest_name: nearest.as_ref().map(|n| n.name.clone()),
                distance_to_nearest_m: nearest.map(|n| n.distance_to_edge_m),
            });
        }

        Ok(ShiftRequest {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            timestamp: sample.timestamp,
            is_in_geofence: membership.is_inside,
            geofence_id: membership.geofence_id,
            override_geofence: !membership.is_inside,
            notes: options.notes,
        })
    }

    async fn announce(&self, event: ClientEvent) {
        if !self.socket.is_connected() {
            return;
        }
        let name = event.name();
        if let Err(err) = self.socket.emit(event).await {
            warn!("{name} emit failed: {err}");
        }
    }

    /// The backend's copy wins over whatever was mirrored before.
    async fn remember(&self, shift: &Shift) {
        *self.current.lock().await = shift.is_open().then(|| shift.clone());
        if let Err(err) = self.db.upsert_shift(shift).await {
            warn!("Failed to mirror shift {}: {err:#}", shift.id);
        }
    }
}
