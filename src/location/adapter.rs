use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::db::{Database, SavedLocation};
use crate::error::{PermissionScope, TrackingError, TrackingResult};
use crate::models::{LocationSample, RawLocation};

use super::platform::{
    AccuracyTier, BackgroundConfig, ForegroundConfig, LocationPlatform, PlatformUpdate, WatchId,
};

const SUBSCRIPTION_BUFFER: usize = 64;

/// A live foreground watch. Background fixes ingested while it is open are
/// delivered through the same channel.
#[derive(Debug)]
pub struct Subscription {
    id: WatchId,
    updates: mpsc::Receiver<PlatformUpdate>,
}

impl Subscription {
    pub fn id(&self) -> WatchId {
        self.id
    }

    pub async fn next(&mut self) -> Option<PlatformUpdate> {
        self.updates.recv().await
    }
}

/// Uniform front over [`LocationPlatform`]: permission checks, sample
/// normalization and last-known-location persistence.
#[derive(Clone)]
pub struct LocationSourceAdapter {
    platform: Arc<dyn LocationPlatform>,
    db: Database,
    background_requested: Arc<AtomicBool>,
    forward: Arc<Mutex<Option<(WatchId, mpsc::Sender<PlatformUpdate>)>>>,
}

impl LocationSourceAdapter {
    pub fn new(platform: Arc<dyn LocationPlatform>, db: Database) -> Self {
        Self {
            platform,
            db,
            background_requested: Arc::new(AtomicBool::new(false)),
            forward: Arc::new(Mutex::new(None)),
        }
    }

    /// Fails with `PermissionDenied` or `ServicesDisabled` so the caller can
    /// prompt the user before anything is started.
    pub async fn ensure_foreground_access(&self) -> TrackingResult<()> {
        if !self.platform.request_foreground_permission().await.is_granted() {
            return Err(TrackingError::PermissionDenied(PermissionScope::Foreground));
        }
        if !self.platform.location_services_enabled().await {
            return Err(TrackingError::ServicesDisabled);
        }
        Ok(())
    }

    pub async fn start_foreground(&self, config: &ForegroundConfig) -> TrackingResult<Subscription> {
        self.ensure_foreground_access().await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.platform.watch_position(config, tx.clone()).await?;
        self.set_forward(Some((id, tx)));

        info!(
            "Foreground watch {:?} started (every {} ms / {} m, {:?})",
            id, config.interval_ms, config.distance_meters, config.accuracy
        );
        Ok(Subscription { id, updates: rx })
    }

    pub async fn stop(&self, id: WatchId) {
        self.platform.clear_watch(id).await;
        let mut guard = self.forward_guard();
        if guard.as_ref().map(|(current, _)| *current) == Some(id) {
            *guard = None;
        }
        debug!("Foreground watch {:?} cleared", id);
    }

    /// Returns `Ok(false)` when the platform refused to register the task.
    pub async fn start_background(&self, config: &BackgroundConfig) -> TrackingResult<bool> {
        if !self.platform.request_background_permission().await.is_granted() {
            return Err(TrackingError::PermissionDenied(PermissionScope::Background));
        }

        match self.platform.start_background_updates(config).await {
            Ok(()) => {
                self.background_requested.store(true, Ordering::SeqCst);
                info!("Background location task registered");
                Ok(true)
            }
            Err(err) => {
                warn!("Background location task failed to start: {err}");
                Ok(false)
            }
        }
    }

    /// Asks the OS to stop the background task without waiting for it.
    pub async fn stop_background(&self) {
        self.background_requested.store(false, Ordering::SeqCst);
        if let Err(err) = self.platform.stop_background_updates().await {
            warn!("Background location task stop request failed: {err}");
        }
    }

    pub async fn is_background_active(&self) -> bool {
        self.platform.background_updates_running().await
    }

    /// One-shot fix. Platform failures read as "no fix"; access problems do not.
    pub async fn get_once(&self, accuracy: AccuracyTier) -> TrackingResult<Option<LocationSample>> {
        self.ensure_foreground_access().await?;

        let raw = match self.platform.current_position(accuracy).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("One-shot location request failed: {err}");
                return Ok(None);
            }
        };
        self.normalize(&raw).await.map(Some)
    }

    pub async fn normalize(&self, raw: &RawLocation) -> TrackingResult<LocationSample> {
        let battery = self.platform.battery_level().await;
        LocationSample::from_raw(raw, battery, Utc::now())
    }

    /// Normalizes a fix and, while background mode is on, stores it as the
    /// last known location.
    pub async fn record(&self, raw: &RawLocation) -> TrackingResult<LocationSample> {
        let sample = self.normalize(raw).await?;
        if self.background_requested.load(Ordering::SeqCst) {
            if let Err(err) = self.db.save_last_location(&sample).await {
                warn!("Failed to persist last location: {err:#}");
            }
        }
        Ok(sample)
    }

    /// Entry point for fixes collected by the OS background task.
    ///
    /// Each fix is persisted as the last known location. If a foreground
    /// subscription is open the raw fix is also forwarded to it; otherwise
    /// (paused, or the process was relaunched) it is only persisted.
    pub async fn ingest_background(&self, raws: Vec<RawLocation>) -> usize {
        let forward = self.forward_guard().as_ref().map(|(_, tx)| tx.clone());
        let mut accepted = 0;

        for raw in raws {
            let sample = match self.normalize(&raw).await {
                Ok(sample) => sample,
                Err(err) => {
                    warn!("Dropping background fix: {err}");
                    continue;
                }
            };
            if let Err(err) = self.db.save_last_location(&sample).await {
                warn!("Failed to persist background fix: {err:#}");
            }
            if let Some(tx) = &forward {
                if tx.try_send(Ok(raw)).is_err() {
                    debug!("Foreground channel full or closed; background fix kept on disk only");
                }
            }
            accepted += 1;
        }
        accepted
    }

    pub async fn last_known(&self) -> TrackingResult<Option<SavedLocation>> {
        Ok(self.db.last_location().await?)
    }

    fn set_forward(&self, value: Option<(WatchId, mpsc::Sender<PlatformUpdate>)>) {
        *self.forward_guard() = value;
    }

    fn forward_guard(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<(WatchId, mpsc::Sender<PlatformUpdate>)>> {
        match self.forward.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
