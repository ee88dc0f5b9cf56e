use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{keys, Database};
use crate::dispatch::{DispatchStats, RoutePoint, UpdateDispatcher};
use crate::error::{TrackingError, TrackingResult};
use crate::geofence::GeofenceSet;
use crate::location::{LocationSourceAdapter, Subscription, WatchId};
use crate::models::{Geofence, RawLocation, TrackingSession, TrackingStatus};
use crate::settings::TrackingSettings;
use crate::transport::{ClientEvent, ServerEvent, SocketChannel, TrackingBackend};

use super::events::{AppState, TrackingEvent};
use super::pump::{flush_loop, sample_loop};
use super::state::{Action, TrackingState};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub state: TrackingState,
    pub app_state: AppState,
    pub route: Vec<RoutePoint>,
    pub route_length_meters: f64,
    pub pending_updates: usize,
    pub dispatch: DispatchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Idle,
    Resumed,
    // persisted as running but the OS task was gone
    Healed,
    Paused,
}

struct Workers {
    watch_id: WatchId,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

// Commands that find the transition lock taken fail with
// TransitionInProgress. App state changes and source failures wait for it.
#[derive(Clone)]
pub struct TrackingController {
    state: Arc<Mutex<TrackingState>>,
    transitions: Arc<Mutex<()>>,
    adapter: LocationSourceAdapter,
    dispatcher: Arc<Mutex<UpdateDispatcher>>,
    socket: Arc<dyn SocketChannel>,
    geofences: GeofenceSet,
    db: Database,
    settings: Arc<TrackingSettings>,
    events: broadcast::Sender<TrackingEvent>,
    workers: Arc<Mutex<Option<Workers>>>,
    app_state: Arc<Mutex<AppState>>,
    shutdown: CancellationToken,
}

impl TrackingController {
    pub fn new(
        adapter: LocationSourceAdapter,
        socket: Arc<dyn SocketChannel>,
        backend: Arc<dyn TrackingBackend>,
        geofences: GeofenceSet,
        db: Database,
        settings: TrackingSettings,
    ) -> Self {
        let dispatcher = UpdateDispatcher::new(socket.clone(), backend, &settings.dispatch);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            state: Arc::new(Mutex::new(TrackingState::new())),
            transitions: Arc::new(Mutex::new(())),
            adapter,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            socket,
            geofences,
            db,
            settings: Arc::new(settings),
            events,
            workers: Arc::new(Mutex::new(None)),
            app_state: Arc::new(Mutex::new(AppState::Active)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    pub fn geofences(&self) -> GeofenceSet {
        self.geofences.clone()
    }

    pub fn set_geofences(&self, geofences: Vec<Geofence>) {
        self.geofences.replace(geofences);
    }

    pub fn location(&self) -> &LocationSourceAdapter {
        &self.adapter
    }

    pub async fn session(&self) -> TrackingSession {
        self.state.lock().await.session()
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        let state = self.state.lock().await.clone();
        let app_state = *self.app_state.lock().await;
        let dispatcher = self.dispatcher.lock().await;
        TrackingSnapshot {
            state,
            app_state,
            route: dispatcher.route().points(),
            route_length_meters: dispatcher.route().length_meters(),
            pending_updates: dispatcher.pending(),
            dispatch: dispatcher.stats(),
        }
    }

    pub async fn route(&self) -> Vec<RoutePoint> {
        self.dispatcher.lock().await.route().points()
    }

    pub async fn start(&self) -> TrackingResult<TrackingSession> {
        let _guard = self.begin_transition()?;
        self.start_inner().await
    }

    pub async fn pause(&self) -> TrackingResult<TrackingSession> {
        let _guard = self.begin_transition()?;
        self.state.lock().await.check(Action::Pause)?;

        self.stop_workers().await;
        self.state.lock().await.pause();
        self.db.set_tracking_status(TrackingStatus::Paused).await?;

        info!("Tracking paused; background task left running");
        Ok(self.publish_status().await)
    }

    pub async fn resume(&self) -> TrackingResult<TrackingSession> {
        let _guard = self.begin_transition()?;
        let session_id = {
            let state = self.state.lock().await;
            state.check(Action::Resume)?;
            state
                .session_id
                .clone()
                .ok_or(TrackingError::InvalidTransition {
                    from: state.status,
                    action: Action::Resume.as_str(),
                })?
        };

        let subscription = self.adapter.start_foreground(&self.settings.foreground).await?;
        let watch_id = subscription.id();
        if let Err(err) = self.db.set_tracking_status(TrackingStatus::Active).await {
            self.adapter.stop(watch_id).await;
            return Err(err.into());
        }

        self.state.lock().await.activate(session_id.clone(), Utc::now());
        self.spawn_workers(subscription).await;

        info!("Tracking session {session_id} resumed");
        Ok(self.publish_status().await)
    }

    pub async fn stop(&self) -> TrackingResult<TrackingSession> {
        let _guard = self.begin_transition()?;
        let session_id = {
            let state = self.state.lock().await;
            state.check(Action::Stop)?;
            state.session_id.clone()
        };

        self.stop_workers().await;
        self.adapter.stop_background().await;

        {
            let mut dispatcher = self.dispatcher.lock().await;
            if let Some(session_id) = &session_id {
                dispatcher.send_status(session_id, TrackingStatus::Inactive).await;
            }
            dispatcher.end_session();
        }

        self.state.lock().await.stop();
        self.db.set_tracking_status(TrackingStatus::Inactive).await?;
        self.db.remove_state(keys::TRACKING_SESSION_ID).await?;

        info!(
            "Tracking session {} stopped",
            session_id.as_deref().unwrap_or("<none>")
        );
        Ok(self.publish_status().await)
    }

    pub async fn restore(&self) -> TrackingResult<RestoreOutcome> {
        match self.adapter.last_known().await {
            Ok(Some(saved)) => self.state.lock().await.seed_location(saved.sample),
            Ok(None) => {}
            Err(err) => warn!("Could not read last known location: {err}"),
        }

        let persisted = self.db.tracking_status().await?;
        if !persisted.is_running() {
            debug!("Persisted tracking status is {persisted}; nothing to restore");
            return Ok(RestoreOutcome::Idle);
        }

        let background_enabled = self.db.background_tracking_enabled().await?;
        let stale = background_enabled && !self.adapter.is_background_active().await;
        if stale {
            warn!("{}", TrackingError::StaleState { persisted });
        }

        let _guard = self.begin_transition()?;
        if persisted == TrackingStatus::Paused {
            let Some(session_id) = self.db.tracking_session_id().await? else {
                warn!("Persisted PAUSED status has no session id; resetting");
                self.db.set_tracking_status(TrackingStatus::Inactive).await?;
                return Ok(RestoreOutcome::Idle);
            };
            self.state.lock().await.restore_paused(session_id);
            if stale {
                self.restart_background().await?;
            }
            self.publish_status().await;
            return Ok(RestoreOutcome::Paused);
        }

        self.restart_session().await?;
        Ok(if stale {
            RestoreOutcome::Healed
        } else {
            RestoreOutcome::Resumed
        })
    }

    // true when coming back to the foreground triggered a self-heal
    pub async fn handle_app_state(&self, next: AppState) -> TrackingResult<bool> {
        let _guard = self.transitions.clone().lock_owned().await;
        let previous = std::mem::replace(&mut *self.app_state.lock().await, next);
        if let Err(err) = self.db.set_state(keys::APP_STATE, &next).await {
            warn!("Failed to persist app state: {err:#}");
        }

        if previous == AppState::Active || next != AppState::Active {
            return Ok(false);
        }
        if !self.db.background_tracking_enabled().await? {
            return Ok(false);
        }
        if self.adapter.is_background_active().await {
            return Ok(false);
        }

        let status = self.state.lock().await.status;
        let persisted = self.db.tracking_status().await?;
        if !status.is_running() && !persisted.is_running() {
            return Ok(false);
        }

        warn!(
            "Background task not running on return to foreground ({})",
            TrackingError::StaleState { persisted }
        );
        if status.is_running() {
            self.restart_background().await?;
        } else {
            self.restart_session().await?;
        }
        Ok(true)
    }

    pub async fn set_background_enabled(&self, enabled: bool) -> TrackingResult<()> {
        let _guard = self.begin_transition()?;
        self.db
            .set_state(keys::BACKGROUND_TRACKING_ENABLED, &enabled)
            .await?;

        if !self.state.lock().await.status.is_running() {
            return Ok(());
        }
        if enabled {
            if !self.adapter.start_background(&self.settings.background).await? {
                return Err(TrackingError::Platform(
                    "background location task could not be registered".into(),
                ));
            }
        } else {
            self.adapter.stop_background().await;
        }
        Ok(())
    }

    pub async fn ingest_background(&self, raws: Vec<RawLocation>) -> usize {
        self.adapter.ingest_background(raws).await
    }

    pub fn listen_server_events(&self) -> JoinHandle<()> {
        let mut inbound = self.socket.subscribe();
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    event = inbound.recv() => match event {
                        Ok(event) => this.on_server_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Missed {missed} server events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    // Leaves the persisted session alone for the next launch.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop_workers().await;
    }

    fn begin_transition(&self) -> TrackingResult<OwnedMutexGuard<()>> {
        self.transitions
            .clone()
            .try_lock_owned()
            .map_err(|_| TrackingError::TransitionInProgress)
    }

    async fn start_inner(&self) -> TrackingResult<TrackingSession> {
        let existing = {
            let state = self.state.lock().await;
            if state.status == TrackingStatus::Active {
                debug!("start() while already active");
                return Ok(state.session());
            }
            state.check(Action::Start)?;
            state.session_id.clone()
        };

        let subscription = self.adapter.start_foreground(&self.settings.foreground).await?;
        let watch_id = subscription.id();

        let session_id = match existing {
            Some(id) => id,
            None => match self.db.tracking_session_id().await {
                Ok(Some(id)) => id,
                Ok(None) => Uuid::new_v4().to_string(),
                Err(err) => {
                    self.adapter.stop(watch_id).await;
                    return Err(err.into());
                }
            },
        };

        if let Err(err) = self.persist_active(&session_id).await {
            self.adapter.stop(watch_id).await;
            return Err(err);
        }

        self.start_background_if_enabled().await;

        self.state.lock().await.activate(session_id.clone(), Utc::now());
        self.spawn_workers(subscription).await;
        self.request_server_interval().await;

        info!("Tracking session {session_id} active");
        Ok(self.publish_status().await)
    }

    async fn persist_active(&self, session_id: &str) -> TrackingResult<()> {
        self.db.set_tracking_status(TrackingStatus::Active).await?;
        self.db.set_state(keys::TRACKING_SESSION_ID, session_id).await?;
        self.db.set_state(keys::TRACKING_INITIALIZED, &true).await?;
        Ok(())
    }

    // Failures here degrade to foreground-only tracking.
    async fn start_background_if_enabled(&self) {
        match self.db.background_tracking_enabled().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!("Could not read background preference: {err:#}");
                return;
            }
        }

        match self.adapter.start_background(&self.settings.background).await {
            Ok(true) => {}
            Ok(false) => self.publish_error(&TrackingError::Platform(
                "background location task could not be registered".into(),
            )),
            Err(err) => {
                warn!("Continuing with foreground tracking only: {err}");
                self.publish_error(&err);
            }
        }
    }

    async fn restart_session(&self) -> TrackingResult<TrackingSession> {
        let this = self.clone();
        self.settings
            .restart_policy
            .run("tracking restart", move |_| {
                let this = this.clone();
                async move { this.start_inner().await }
            })
            .await
    }

    async fn restart_background(&self) -> TrackingResult<()> {
        let this = self.clone();
        self.settings
            .restart_policy
            .run("background task restart", move |_| {
                let this = this.clone();
                async move {
                    if this.adapter.start_background(&this.settings.background).await? {
                        Ok(())
                    } else {
                        Err(TrackingError::Platform(
                            "background location task could not be registered".into(),
                        ))
                    }
                }
            })
            .await
    }

    async fn spawn_workers(&self, subscription: Subscription) {
        let mut workers = self.workers.lock().await;
        if let Some(previous) = workers.take() {
            warn!("Replacing live sample pump for {:?}", previous.watch_id);
            previous.cancel.cancel();
            previous.flusher.abort();
            self.adapter.stop(previous.watch_id).await;
        }

        let cancel = CancellationToken::new();
        let watch_id = subscription.id();
        let pump = tokio::spawn(sample_loop(self.clone(), subscription, cancel.clone()));
        let flusher = tokio::spawn(flush_loop(
            self.dispatcher.clone(),
            self.settings.dispatch.flush_interval(),
            cancel.clone(),
        ));

        *workers = Some(Workers {
            watch_id,
            cancel,
            pump,
            flusher,
        });
    }

    async fn stop_workers(&self) {
        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };
        workers.cancel.cancel();
        if let Err(err) = workers.pump.await {
            error!("Sample pump failed to join: {err}");
        }
        if let Err(err) = workers.flusher.await {
            error!("Flush loop failed to join: {err}");
        }
        self.adapter.stop(workers.watch_id).await;
    }

    pub(super) async fn on_fix(&self, raw: RawLocation) {
        let sample = match self.adapter.record(&raw).await {
            Ok(sample) => sample,
            Err(err) => {
                warn!("Dropping location fix: {err}");
                return;
            }
        };
        let membership = self.geofences.evaluate(&sample);

        let (transitions, meta) = {
            let mut state = self.state.lock().await;
            if state.status != TrackingStatus::Active {
                return;
            }
            let transitions = state.record_sample(sample.clone(), membership.clone());
            (transitions, state.meta())
        };

        for transition in transitions {
            info!(
                "Geofence {:?} {}",
                transition.kind, transition.geofence_id
            );
            self.publish(TrackingEvent::Transition { transition });
        }
        self.publish(TrackingEvent::Sample {
            sample: sample.clone(),
            membership,
        });

        if let Some(meta) = meta {
            self.dispatcher.lock().await.on_sample(sample, meta).await;
        }
    }

    // Runs on the pump task, so the pump is detached rather than joined.
    pub(super) async fn on_source_failure(&self, err: TrackingError, cancel: &CancellationToken) {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Location source failure after the pump was cancelled: {err}");
                return;
            }
            guard = self.transitions.clone().lock_owned() => guard,
        };
        if cancel.is_cancelled() {
            return;
        }

        {
            let mut state = self.state.lock().await;
            if state.status != TrackingStatus::Active {
                return;
            }
            state.fail(err.to_string());
        }
        error!("Location source failed; tracking moved to error: {err}");

        if let Some(workers) = self.workers.lock().await.take() {
            workers.cancel.cancel();
            if let Err(join_err) = workers.flusher.await {
                error!("Flush loop failed to join: {join_err}");
            }
            self.adapter.stop(workers.watch_id).await;
        }

        if let Err(persist_err) = self.db.set_tracking_status(TrackingStatus::Error).await {
            warn!("Failed to persist error status: {persist_err:#}");
        }
        self.publish_error(&err);
        self.publish_status().await;
    }

    async fn on_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::UpdateInterval { interval } => {
                self.dispatcher
                    .lock()
                    .await
                    .set_min_interval(Duration::from_millis(interval));
            }
            ServerEvent::GeofenceTransition(transition) => {
                self.publish(TrackingEvent::ServerTransition { transition });
            }
            ServerEvent::LocationError { message } => {
                warn!("Server rejected location data: {message}");
                self.publish(TrackingEvent::Error {
                    message,
                    needs_user_action: false,
                });
            }
        }
    }

    async fn request_server_interval(&self) {
        if !self.socket.is_connected() {
            return;
        }
        if let Err(err) = self.socket.emit(ClientEvent::GetInterval).await {
            debug!("Interval request not sent: {err}");
        }
    }

    fn publish(&self, event: TrackingEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_error(&self, err: &TrackingError) {
        self.publish(TrackingEvent::Error {
            message: err.to_string(),
            needs_user_action: err.needs_user_action(),
        });
    }

    async fn publish_status(&self) -> TrackingSession {
        let session = self.state.lock().await.session();
        self.publish(TrackingEvent::StatusChanged {
            session: session.clone(),
        });
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PermissionScope;
    use crate::location::PermissionStatus;
    use crate::models::{GeofenceMembership, TransitionKind};
    use crate::test_support::{north_of, raw_at, FakeBackend, FakePlatform, FakeSocket, OFFICE};
    use crate::tracking::RetryPolicy;
    use crate::transport::socket::StatusUpdate;

    struct Harness {
        platform: Arc<FakePlatform>,
        socket: Arc<FakeSocket>,
        db: Database,
        controller: TrackingController,
    }

    fn harness() -> Harness {
        let platform = Arc::new(FakePlatform::new());
        let socket = Arc::new(FakeSocket::connected());
        let backend = Arc::new(FakeBackend::new());
        let db = Database::in_memory().unwrap();

        let mut settings = TrackingSettings::default();
        settings.restart_policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: vec![0],
            jitter_ms: 0,
        };

        let controller = TrackingController::new(
            LocationSourceAdapter::new(platform.clone(), db.clone()),
            socket.clone(),
            backend,
            GeofenceSet::new(vec![Geofence::new("office-1", "Office", OFFICE, 100.0)]),
            db.clone(),
            settings,
        );
        Harness {
            platform,
            socket,
            db,
            controller,
        }
    }

    async fn next_event<F>(rx: &mut broadcast::Receiver<TrackingEvent>, mut matches: F) -> TrackingEvent
    where
        F: FnMut(&TrackingEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.unwrap();
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not published in time")
    }

    #[tokio::test]
    async fn start_persists_and_repeats_as_a_no_op() {
        let h = harness();

        let first = h.controller.start().await.unwrap();
        assert_eq!(first.status, TrackingStatus::Active);
        let session_id = first.session_id.clone().unwrap();

        let second = h.controller.start().await.unwrap();
        assert_eq!(second.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(h.platform.watch_count(), 1);

        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Active);
        assert_eq!(
            h.db.tracking_session_id().await.unwrap(),
            Some(session_id)
        );
        let initialized: Option<bool> = h.db.get_state(keys::TRACKING_INITIALIZED).await.unwrap();
        assert_eq!(initialized, Some(true));
        assert_eq!(h.socket.emitted_names(), vec!["location:get_interval"]);
    }

    #[tokio::test]
    async fn denied_permission_leaves_tracking_inactive() {
        let h = harness();
        h.platform
            .set_foreground_permission(PermissionStatus::Denied);

        let err = h.controller.start().await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::PermissionDenied(PermissionScope::Foreground)
        ));
        assert_eq!(h.controller.session().await.status, TrackingStatus::Inactive);
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Inactive);
        assert_eq!(h.db.tracking_session_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn pause_and_resume_keep_the_session() {
        let h = harness();
        h.db
            .set_state(keys::BACKGROUND_TRACKING_ENABLED, &true)
            .await
            .unwrap();
        let started = h.controller.start().await.unwrap();
        assert_eq!(h.platform.background_starts(), 1);

        let paused = h.controller.pause().await.unwrap();
        assert_eq!(paused.status, TrackingStatus::Paused);
        assert!(!h.platform.watch_open());
        assert_eq!(h.platform.background_stops(), 0);
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Paused);

        let resumed = h.controller.resume().await.unwrap();
        assert_eq!(resumed.status, TrackingStatus::Active);
        assert_eq!(resumed.session_id, started.session_id);
        assert_eq!(resumed.started_at, started.started_at);
        assert!(h.platform.watch_open());
        assert_eq!(h.platform.watch_count(), 2);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let h = harness();
        assert!(matches!(
            h.controller.pause().await,
            Err(TrackingError::InvalidTransition {
                from: TrackingStatus::Inactive,
                action: "pause"
            })
        ));
        assert!(h.controller.stop().await.is_err());

        h.controller.start().await.unwrap();
        assert!(matches!(
            h.controller.resume().await,
            Err(TrackingError::InvalidTransition {
                from: TrackingStatus::Active,
                action: "resume"
            })
        ));
    }

    #[tokio::test]
    async fn overlapping_transitions_are_rejected() {
        let h = harness();
        let guard = h.controller.begin_transition().unwrap();
        assert!(matches!(
            h.controller.start().await,
            Err(TrackingError::TransitionInProgress)
        ));
        drop(guard);
        assert!(h.controller.start().await.is_ok());
    }

    #[tokio::test]
    async fn stop_sends_a_final_inactive_status() {
        let h = harness();
        let session_id = h.controller.start().await.unwrap().session_id.unwrap();

        let stopped = h.controller.stop().await.unwrap();
        assert_eq!(stopped.status, TrackingStatus::Inactive);
        assert_eq!(stopped.session_id, None);
        assert!(!h.platform.watch_open());
        assert_eq!(h.platform.background_stops(), 1);

        let last = h.socket.emitted().pop().unwrap();
        match last {
            ClientEvent::StatusUpdate(StatusUpdate {
                session_id: sent, status, ..
            }) => {
                assert_eq!(sent, session_id);
                assert_eq!(status, TrackingStatus::Inactive);
            }
            other => panic!("unexpected final event {other:?}"),
        }
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Inactive);
        assert_eq!(h.db.tracking_session_id().await.unwrap(), None);

        let next = h.controller.start().await.unwrap();
        assert_ne!(next.session_id.as_deref(), Some(session_id.as_str()));
    }

    #[tokio::test]
    async fn fixes_update_membership_and_reach_the_socket() {
        let h = harness();
        let mut events = h.controller.subscribe();
        h.controller.start().await.unwrap();

        h.platform.push(raw_at(north_of(OFFICE, 50.0))).await;

        let transition = next_event(&mut events, |e| matches!(e, TrackingEvent::Transition { .. })).await;
        match transition {
            TrackingEvent::Transition { transition } => {
                assert_eq!(transition.kind, TransitionKind::Enter);
                assert_eq!(transition.geofence_id, "office-1");
            }
            _ => unreachable!(),
        }
        next_event(&mut events, |e| matches!(e, TrackingEvent::Sample { .. })).await;

        // dispatch happens right after the sample is published
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.socket.emitted_names().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("update not dispatched");

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state.membership, GeofenceMembership::inside("office-1"));
        assert_eq!(snapshot.route.len(), 1);
        assert_eq!(snapshot.route_length_meters, 0.0);
        assert_eq!(
            h.socket.emitted_names(),
            vec!["location:get_interval", "location:update"]
        );
    }

    #[tokio::test]
    async fn source_failure_moves_to_error_and_start_recovers() {
        let h = harness();
        let mut events = h.controller.subscribe();
        let session_id = h.controller.start().await.unwrap().session_id;

        h.platform.push(raw_at(OFFICE)).await;
        next_event(&mut events, |e| matches!(e, TrackingEvent::Sample { .. })).await;

        h.platform
            .fail(TrackingError::Platform("gps lost".into()))
            .await;
        next_event(&mut events, |e| {
            matches!(e, TrackingEvent::StatusChanged { session } if session.status == TrackingStatus::Error)
        })
        .await;

        let snapshot = h.controller.snapshot().await;
        assert_eq!(snapshot.state.status, TrackingStatus::Error);
        assert!(snapshot.state.last_location.is_some());
        assert!(snapshot.state.last_error.unwrap().contains("gps lost"));
        assert!(!h.platform.watch_open());
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Error);

        let restarted = h.controller.start().await.unwrap();
        assert_eq!(restarted.status, TrackingStatus::Active);
        assert_eq!(restarted.session_id, session_id);
    }

    #[tokio::test]
    async fn restore_heals_a_dead_background_task() {
        let h = harness();
        h.db.set_tracking_status(TrackingStatus::Active).await.unwrap();
        h.db
            .set_state(keys::TRACKING_SESSION_ID, "persisted-1")
            .await
            .unwrap();
        h.db
            .set_state(keys::BACKGROUND_TRACKING_ENABLED, &true)
            .await
            .unwrap();
        h.platform.set_background_running(false);

        assert_eq!(h.controller.restore().await.unwrap(), RestoreOutcome::Healed);

        let session = h.controller.session().await;
        assert_eq!(session.status, TrackingStatus::Active);
        assert_eq!(session.session_id.as_deref(), Some("persisted-1"));
        assert_eq!(h.platform.background_starts(), 1);
    }

    #[tokio::test]
    async fn restore_without_background_resumes_in_foreground() {
        let h = harness();
        h.db.set_tracking_status(TrackingStatus::Active).await.unwrap();
        h.db
            .set_state(keys::TRACKING_SESSION_ID, "persisted-2")
            .await
            .unwrap();

        assert_eq!(h.controller.restore().await.unwrap(), RestoreOutcome::Resumed);
        assert_eq!(
            h.controller.session().await.session_id.as_deref(),
            Some("persisted-2")
        );
        assert_eq!(h.platform.background_starts(), 0);
        assert!(h.platform.watch_open());
    }

    #[tokio::test]
    async fn restore_keeps_a_paused_session_paused() {
        let h = harness();
        h.db.set_tracking_status(TrackingStatus::Paused).await.unwrap();
        h.db
            .set_state(keys::TRACKING_SESSION_ID, "persisted-3")
            .await
            .unwrap();

        assert_eq!(h.controller.restore().await.unwrap(), RestoreOutcome::Paused);
        assert_eq!(h.controller.session().await.status, TrackingStatus::Paused);
        assert!(!h.platform.watch_open());

        let resumed = h.controller.resume().await.unwrap();
        assert_eq!(resumed.session_id.as_deref(), Some("persisted-3"));
    }

    #[tokio::test]
    async fn restore_with_nothing_persisted_is_idle() {
        let h = harness();
        assert_eq!(h.controller.restore().await.unwrap(), RestoreOutcome::Idle);
        assert_eq!(h.platform.watch_count(), 0);
    }

    #[tokio::test]
    async fn returning_to_foreground_heals_exactly_once() {
        let h = harness();
        h.controller.set_background_enabled(true).await.unwrap();
        h.controller.start().await.unwrap();
        assert_eq!(h.platform.background_starts(), 1);

        assert!(!h.controller.handle_app_state(AppState::Background).await.unwrap());
        h.platform.set_background_running(false);

        assert!(h.controller.handle_app_state(AppState::Active).await.unwrap());
        assert_eq!(h.platform.background_starts(), 2);

        // Already in the foreground: no transition, no second heal.
        assert!(!h.controller.handle_app_state(AppState::Active).await.unwrap());
        assert_eq!(h.platform.background_starts(), 2);

        let stored: Option<AppState> = h.db.get_state(keys::APP_STATE).await.unwrap();
        assert_eq!(stored, Some(AppState::Active));
    }

    #[tokio::test]
    async fn source_failure_waits_for_a_running_transition() {
        let h = harness();
        let mut events = h.controller.subscribe();
        h.controller.start().await.unwrap();

        let guard = h.controller.begin_transition().unwrap();
        h.platform
            .fail(TrackingError::Platform("gps lost".into()))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.controller.session().await.status, TrackingStatus::Active);
        drop(guard);

        next_event(&mut events, |e| {
            matches!(e, TrackingEvent::StatusChanged { session } if session.status == TrackingStatus::Error)
        })
        .await;
        assert!(!h.platform.watch_open());
        assert!(h.controller.workers.lock().await.is_none());
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Error);
    }

    #[tokio::test]
    async fn refused_background_task_falls_back_to_foreground() {
        let h = harness();
        h.controller.set_background_enabled(true).await.unwrap();
        h.platform.fail_background_starts(1);
        let mut events = h.controller.subscribe();

        let session = h.controller.start().await.unwrap();
        assert_eq!(session.status, TrackingStatus::Active);

        match next_event(&mut events, |e| matches!(e, TrackingEvent::Error { .. })).await {
            TrackingEvent::Error {
                message,
                needs_user_action,
            } => {
                assert!(message.contains("could not be registered"));
                assert!(!needs_user_action);
            }
            _ => unreachable!(),
        }
        assert!(h.platform.watch_open());
        assert_eq!(h.platform.background_starts(), 1);
        assert!(!h.controller.location().is_background_active().await);
    }

    #[tokio::test]
    async fn denied_background_permission_asks_the_user() {
        let h = harness();
        h.controller.set_background_enabled(true).await.unwrap();
        h.platform
            .set_background_permission(PermissionStatus::Denied);
        let mut events = h.controller.subscribe();

        let session = h.controller.start().await.unwrap();
        assert_eq!(session.status, TrackingStatus::Active);

        match next_event(&mut events, |e| matches!(e, TrackingEvent::Error { .. })).await {
            TrackingEvent::Error {
                needs_user_action, ..
            } => assert!(needs_user_action),
            _ => unreachable!(),
        }
        assert!(h.platform.watch_open());
        assert_eq!(h.platform.background_starts(), 0);
        assert_eq!(h.db.tracking_status().await.unwrap(), TrackingStatus::Active);
    }

    #[tokio::test]
    async fn foreground_heal_retries_a_refused_registration() {
        let h = harness();
        h.controller.set_background_enabled(true).await.unwrap();
        h.controller.start().await.unwrap();
        h.controller.handle_app_state(AppState::Background).await.unwrap();
        h.platform.set_background_running(false);
        h.platform.fail_background_starts(1);

        assert!(h.controller.handle_app_state(AppState::Active).await.unwrap());
        assert_eq!(h.platform.background_starts(), 3);
        assert!(h.controller.location().is_background_active().await);
        assert_eq!(h.controller.session().await.status, TrackingStatus::Active);
    }

    #[tokio::test]
    async fn app_state_change_waits_for_a_running_transition() {
        let h = harness();
        h.controller.set_background_enabled(true).await.unwrap();
        h.controller.start().await.unwrap();
        h.controller.handle_app_state(AppState::Background).await.unwrap();
        h.platform.set_background_running(false);

        let guard = h.controller.begin_transition().unwrap();
        let controller = h.controller.clone();
        let heal = tokio::spawn(async move { controller.handle_app_state(AppState::Active).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!heal.is_finished());
        assert_eq!(h.controller.snapshot().await.app_state, AppState::Background);
        drop(guard);

        assert!(heal.await.unwrap().unwrap());
        assert_eq!(h.platform.background_starts(), 2);
    }

    #[tokio::test]
    async fn toggling_background_mode_while_running() {
        let h = harness();
        h.controller.start().await.unwrap();
        assert_eq!(h.platform.background_starts(), 0);

        h.controller.set_background_enabled(true).await.unwrap();
        assert_eq!(h.platform.background_starts(), 1);
        assert!(h.db.background_tracking_enabled().await.unwrap());

        h.controller.set_background_enabled(false).await.unwrap();
        assert_eq!(h.platform.background_stops(), 1);
        assert!(!h.db.background_tracking_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn server_interval_updates_the_throttle() {
        let h = harness();
        let listener = h.controller.listen_server_events();

        h.socket
            .push_server(ServerEvent::UpdateInterval { interval: 10_000 });

        tokio::time::timeout(Duration::from_secs(2), async {
            while h.controller.dispatcher.lock().await.min_interval() != Duration::from_secs(10) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("interval not applied");

        h.controller.shutdown().await;
        listener.await.unwrap();
    }
}
