//! The seam to the OS location services.
//!
//! The mobile shells implement [`LocationPlatform`] over the native APIs.
//! Everything above this trait only sees normalized samples.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TrackingResult;
use crate::models::RawLocation;

/// What the platform pushes through a watch: a fix, or the reason it stopped.
pub type PlatformUpdate = TrackingResult<RawLocation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccuracyTier {
    Lowest,
    Low,
    Balanced,
    High,
    Highest,
    BestForNavigation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundConfig {
    pub interval_ms: u64,
    pub distance_meters: f64,
    pub accuracy: AccuracyTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub interval_ms: u64,
    pub distance_meters: f64,
    pub accuracy: AccuracyTier,
    /// Android needs a foreground-service notification to keep the task alive.
    pub notification_title: String,
    pub notification_body: String,
    pub pauses_automatically: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            distance_meters: 20.0,
            accuracy: AccuracyTier::Balanced,
            notification_title: "Shift tracking".into(),
            notification_body: "Location is shared while your shift is active".into(),
            pauses_automatically: false,
        }
    }
}

#[async_trait]
pub trait LocationPlatform: Send + Sync {
    async fn request_foreground_permission(&self) -> PermissionStatus;

    async fn request_background_permission(&self) -> PermissionStatus;

    async fn location_services_enabled(&self) -> bool;

    /// Starts a continuous watch that pushes into `updates` until cleared.
    async fn watch_position(
        &self,
        config: &ForegroundConfig,
        updates: mpsc::Sender<PlatformUpdate>,
    ) -> TrackingResult<WatchId>;

    async fn clear_watch(&self, id: WatchId);

    async fn current_position(&self, accuracy: AccuracyTier) -> TrackingResult<Option<RawLocation>>;

    /// Registers the OS background task. Fixes it collects come back through
    /// [`LocationSourceAdapter::ingest_background`](super::LocationSourceAdapter::ingest_background).
    async fn start_background_updates(&self, config: &BackgroundConfig) -> TrackingResult<()>;

    /// Requests the OS to stop the task; the stop itself may lag.
    async fn stop_background_updates(&self) -> TrackingResult<()>;

    /// Queries the OS task registry.
    async fn background_updates_running(&self) -> bool;

    /// Battery charge in `0.0..=1.0`, when the platform exposes it.
    async fn battery_level(&self) -> Option<f32>;
}
