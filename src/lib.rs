pub mod db;
pub mod dispatch;
pub mod error;
pub mod geofence;
pub mod location;
pub mod models;
pub mod settings;
pub mod shift;
pub mod tracking;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;

pub use db::Database;
pub use error::{PermissionScope, TrackingError, TrackingResult};
pub use location::{LocationPlatform, LocationSourceAdapter};
pub use settings::{SettingsStore, TrackingSettings};
pub use shift::{ShiftController, ShiftOptions, UserProfile};
pub use tracking::{AppState, RestoreOutcome, TrackingController, TrackingEvent};
pub use transport::{AuthToken, HttpBackend, WsChannel};
pub use utils::init_logging;

use geofence::GeofenceSet;

/// Everything a host app needs, wired together over one data directory.
pub struct FieldTrack {
    pub db: Database,
    pub settings: SettingsStore,
    pub auth: AuthToken,
    pub tracking: TrackingController,
    pub shifts: ShiftController,
    socket: Arc<WsChannel>,
    listener: JoinHandle<()>,
}

impl FieldTrack {
    /// Opens storage under `data_dir`, connects the transports and restores
    /// whatever session the previous process left behind.
    pub async fn open(
        data_dir: &Path,
        platform: Arc<dyn LocationPlatform>,
        auth: AuthToken,
    ) -> TrackingResult<(Self, RestoreOutcome)> {
        init_logging();
        info!("fieldtrack starting up in {}", data_dir.display());

        std::fs::create_dir_all(data_dir).map_err(|err| {
            TrackingError::Storage(format!("cannot create {}: {err}", data_dir.display()))
        })?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let config = settings.tracking();

        let db = match Database::new(data_dir.join("fieldtrack.sqlite3")) {
            Ok(db) => db,
            Err(err) => {
                warn!("Falling back to in-memory storage: {err:#}");
                Database::in_memory()?
            }
        };

        let backend = Arc::new(HttpBackend::new(config.api_base_url.clone(), auth.clone())?);
        let socket = Arc::new(WsChannel::connect(config.socket_url.clone(), auth.clone()));

        let tracking = TrackingController::new(
            LocationSourceAdapter::new(platform, db.clone()),
            socket.clone(),
            backend.clone(),
            GeofenceSet::default(),
            db.clone(),
            config,
        );
        let shifts = ShiftController::new(tracking.clone(), backend, socket.clone(), db.clone());
        let listener = tracking.listen_server_events();

        let outcome = match tracking.restore().await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Could not restore previous tracking session: {err}");
                RestoreOutcome::Idle
            }
        };
        info!("Restore finished: {outcome:?}");

        Ok((
            Self {
                db,
                settings,
                auth,
                tracking,
                shifts,
                socket,
                listener,
            },
            outcome,
        ))
    }

    /// Releases tasks and the socket. Persisted tracking state is kept for
    /// the next launch.
    pub async fn shutdown(self) {
        self.tracking.shutdown().await;
        self.socket.close();
        if let Err(err) = self.listener.await {
            warn!("Server event listener failed to join: {err}");
        }
    }
}
