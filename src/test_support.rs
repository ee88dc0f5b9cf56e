//! Fakes for the platform, socket and backend seams, shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};

use crate::dispatch::PendingUpdate;
use crate::error::{TrackingError, TrackingResult};
use crate::geofence::EARTH_RADIUS_METERS;
use crate::location::{
    AccuracyTier, BackgroundConfig, ForegroundConfig, LocationPlatform, PermissionStatus,
    PlatformUpdate, WatchId,
};
use crate::models::{
    GeoPoint, LocationSample, RawLocation, SessionMeta, Shift, ShiftRequest, TrackingStatus,
};
use crate::transport::{ClientEvent, ServerEvent, SocketChannel, TrackingBackend};

pub const OFFICE: GeoPoint = GeoPoint {
    latitude: 12.9716,
    longitude: 77.5946,
};

/// A point `meters` due north of `origin` along the meridian.
pub fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint {
        latitude: origin.latitude + (meters / EARTH_RADIUS_METERS).to_degrees(),
        longitude: origin.longitude,
    }
}

pub fn raw_at(point: GeoPoint) -> RawLocation {
    RawLocation::flat(point.latitude, point.longitude)
}

pub fn sample_at(point: GeoPoint) -> LocationSample {
    LocationSample::from_raw(&raw_at(point), Some(0.5), Utc::now()).unwrap()
}

pub fn meta() -> SessionMeta {
    SessionMeta {
        session_id: "session-1".into(),
        status: TrackingStatus::Active,
        is_in_geofence: true,
        geofence_id: Some("office-1".into()),
    }
}

pub struct FakePlatform {
    foreground: Mutex<PermissionStatus>,
    background: Mutex<PermissionStatus>,
    services_enabled: AtomicBool,
    background_running: AtomicBool,
    background_failures: AtomicUsize,
    current: Mutex<Option<RawLocation>>,
    watch: Mutex<Option<(WatchId, mpsc::Sender<PlatformUpdate>)>>,
    next_watch: AtomicU64,
    watches_started: AtomicUsize,
    background_starts: AtomicUsize,
    background_stops: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            foreground: Mutex::new(PermissionStatus::Granted),
            background: Mutex::new(PermissionStatus::Granted),
            services_enabled: AtomicBool::new(true),
            background_running: AtomicBool::new(false),
            background_failures: AtomicUsize::new(0),
            current: Mutex::new(None),
            watch: Mutex::new(None),
            next_watch: AtomicU64::new(1),
            watches_started: AtomicUsize::new(0),
            background_starts: AtomicUsize::new(0),
            background_stops: AtomicUsize::new(0),
        }
    }

    pub fn set_foreground_permission(&self, status: PermissionStatus) {
        *self.foreground.lock().unwrap() = status;
    }

    pub fn set_background_permission(&self, status: PermissionStatus) {
        *self.background.lock().unwrap() = status;
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.services_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Simulates the OS killing (or keeping) the background task.
    pub fn set_background_running(&self, running: bool) {
        self.background_running.store(running, Ordering::SeqCst);
    }

    /// The next `times` background registrations are refused.
    pub fn fail_background_starts(&self, times: usize) {
        self.background_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_current(&self, raw: Option<RawLocation>) {
        *self.current.lock().unwrap() = raw;
    }

    pub fn watch_count(&self) -> usize {
        self.watches_started.load(Ordering::SeqCst)
    }

    pub fn watch_open(&self) -> bool {
        self.watch.lock().unwrap().is_some()
    }

    pub fn background_starts(&self) -> usize {
        self.background_starts.load(Ordering::SeqCst)
    }

    pub fn background_stops(&self) -> usize {
        self.background_stops.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Option<mpsc::Sender<PlatformUpdate>> {
        self.watch.lock().unwrap().as_ref().map(|(_, tx)| tx.clone())
    }

    /// Delivers a fix through the open watch, if any.
    pub async fn push(&self, raw: RawLocation) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(Ok(raw)).await;
        }
    }

    pub async fn fail(&self, err: TrackingError) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(Err(err)).await;
        }
    }
}

#[async_trait]
impl LocationPlatform for FakePlatform {
    async fn request_foreground_permission(&self) -> PermissionStatus {
        *self.foreground.lock().unwrap()
    }

    async fn request_background_permission(&self) -> PermissionStatus {
        *self.background.lock().unwrap()
    }

    async fn location_services_enabled(&self) -> bool {
        self.services_enabled.load(Ordering::SeqCst)
    }

    async fn watch_position(
        &self,
        _config: &ForegroundConfig,
        updates: mpsc::Sender<PlatformUpdate>,
    ) -> TrackingResult<WatchId> {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::SeqCst));
        self.watches_started.fetch_add(1, Ordering::SeqCst);
        *self.watch.lock().unwrap() = Some((id, updates));
        Ok(id)
    }

    async fn clear_watch(&self, id: WatchId) {
        let mut watch = self.watch.lock().unwrap();
        if watch.as_ref().map(|(current, _)| *current) == Some(id) {
            *watch = None;
        }
    }

    async fn current_position(&self, _accuracy: AccuracyTier) -> TrackingResult<Option<RawLocation>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn start_background_updates(&self, _config: &BackgroundConfig) -> TrackingResult<()> {
        self.background_starts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .background_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TrackingError::Platform("task registration refused".into()));
        }
        self.background_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_background_updates(&self) -> TrackingResult<()> {
        self.background_stops.fetch_add(1, Ordering::SeqCst);
        self.background_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn background_updates_running(&self) -> bool {
        self.background_running.load(Ordering::SeqCst)
    }

    async fn battery_level(&self) -> Option<f32> {
        Some(0.75)
    }
}

pub struct FakeSocket {
    connected: AtomicBool,
    fail: AtomicBool,
    emitted: Mutex<Vec<ClientEvent>>,
    inbound: broadcast::Sender<ServerEvent>,
}

impl FakeSocket {
    fn with_state(connected: bool) -> Self {
        let (inbound, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(connected),
            fail: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
            inbound,
        }
    }

    pub fn connected() -> Self {
        Self::with_state(true)
    }

    pub fn disconnected() -> Self {
        Self::with_state(false)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_emits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn emitted_names(&self) -> Vec<&'static str> {
        self.emitted.lock().unwrap().iter().map(ClientEvent::name).collect()
    }

    pub fn push_server(&self, event: ServerEvent) {
        let _ = self.inbound.send(event);
    }
}

#[async_trait]
impl SocketChannel for FakeSocket {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: ClientEvent) -> TrackingResult<()> {
        if !self.is_connected() || self.fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Network("socket emit failed".into()));
        }
        self.emitted.lock().unwrap().push(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inbound.subscribe()
    }
}

pub struct FakeBackend {
    location_failures: AtomicUsize,
    posted: Mutex<Vec<PendingUpdate>>,
    shifts_fail: AtomicBool,
    shift_requests: Mutex<Vec<ShiftRequest>>,
    current: Mutex<Option<Shift>>,
    history: Mutex<Vec<Shift>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            location_failures: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
            shifts_fail: AtomicBool::new(false),
            shift_requests: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_locations(&self, count: usize) {
        self.location_failures.store(count, Ordering::SeqCst);
    }

    pub fn posted_locations(&self) -> usize {
        self.posted.lock().unwrap().len()
    }

    pub fn fail_shifts(&self, fail: bool) {
        self.shifts_fail.store(fail, Ordering::SeqCst);
    }

    pub fn shift_requests(&self) -> Vec<ShiftRequest> {
        self.shift_requests.lock().unwrap().clone()
    }

    pub fn set_current(&self, shift: Option<Shift>) {
        *self.current.lock().unwrap() = shift;
    }

    pub fn set_history(&self, shifts: Vec<Shift>) {
        *self.history.lock().unwrap() = shifts;
    }

    fn record_shift_call(&self, request: &ShiftRequest) -> TrackingResult<()> {
        self.shift_requests.lock().unwrap().push(request.clone());
        if self.shifts_fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Network("503 Service Unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackingBackend for FakeBackend {
    async fn post_location(&self, update: &PendingUpdate) -> TrackingResult<()> {
        let remaining = self.location_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.location_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TrackingError::Network("connection reset".into()));
        }
        self.posted.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn start_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift> {
        self.record_shift_call(request)?;
        let shift = Shift {
            id: "shift-1".into(),
            start_timestamp: request.timestamp,
            end_timestamp: None,
            total_distance: 0.0,
            is_in_geofence: request.is_in_geofence,
        };
        *self.current.lock().unwrap() = Some(shift.clone());
        Ok(shift)
    }

    async fn end_shift(&self, request: &ShiftRequest) -> TrackingResult<Shift> {
        self.record_shift_call(request)?;
        let open = self.current.lock().unwrap().take();
        let mut shift = open.unwrap_or(Shift {
            id: "shift-1".into(),
            start_timestamp: request.timestamp,
            end_timestamp: None,
            total_distance: 0.0,
            is_in_geofence: request.is_in_geofence,
        });
        shift.end_timestamp = Some(request.timestamp);
        shift.total_distance = 1_250.0;
        Ok(shift)
    }

    async fn current_shift(&self) -> TrackingResult<Option<Shift>> {
        if self.shifts_fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Network("503 Service Unavailable".into()));
        }
        Ok(self.current.lock().unwrap().clone())
    }

    async fn shift_history(&self, start: NaiveDate, end: NaiveDate) -> TrackingResult<Vec<Shift>> {
        if self.shifts_fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Network("503 Service Unavailable".into()));
        }
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|shift| {
                let day = shift.start_timestamp.date_naive();
                day >= start && day <= end
            })
            .cloned()
            .collect())
    }
}
