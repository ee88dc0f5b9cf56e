//! Key/value state that lets a relaunched process pick up where it left off.
//!
//! Values are stored as JSON text. This is a cache: while a controller is
//! alive its in-memory state wins.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::db::Database;
use crate::models::{LocationSample, TrackingStatus};

pub mod keys {
    pub const TRACKING_STATUS: &str = "trackingStatus";
    pub const BACKGROUND_TRACKING_ENABLED: &str = "backgroundTrackingEnabled";
    pub const LAST_LOCATION: &str = "lastLocation";
    pub const TRACKING_SESSION_ID: &str = "trackingSessionId";
    pub const TRACKING_INITIALIZED: &str = "tracking_initialized";
    pub const APP_STATE: &str = "app_state";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLocation {
    #[serde(flatten)]
    pub sample: LocationSample,
    pub saved_at: DateTime<Utc>,
}

impl Database {
    pub async fn get_state<T>(&self, key: &'static str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM local_state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            raw.map(|value| {
                serde_json::from_str(&value)
                    .with_context(|| format!("failed to decode local state {key}"))
            })
            .transpose()
        })
        .await
    }

    pub async fn set_state<T>(&self, key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("failed to encode local state {key}"))?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO local_state (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, encoded, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn remove_state(&self, key: &'static str) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM local_state WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    /// Unknown or undecodable values read as `Inactive`.
    pub async fn tracking_status(&self) -> Result<TrackingStatus> {
        let raw: Option<String> = self.get_state(keys::TRACKING_STATUS).await?;
        Ok(raw
            .as_deref()
            .and_then(TrackingStatus::parse)
            .unwrap_or_default())
    }

    pub async fn set_tracking_status(&self, status: TrackingStatus) -> Result<()> {
        self.set_state(keys::TRACKING_STATUS, status.as_str()).await
    }

    pub async fn tracking_session_id(&self) -> Result<Option<String>> {
        self.get_state(keys::TRACKING_SESSION_ID).await
    }

    pub async fn background_tracking_enabled(&self) -> Result<bool> {
        Ok(self
            .get_state(keys::BACKGROUND_TRACKING_ENABLED)
            .await?
            .unwrap_or(false))
    }

    pub async fn last_location(&self) -> Result<Option<SavedLocation>> {
        self.get_state(keys::LAST_LOCATION).await
    }

    pub async fn save_last_location(&self, sample: &LocationSample) -> Result<()> {
        let saved = SavedLocation {
            sample: sample.clone(),
            saved_at: Utc::now(),
        };
        self.set_state(keys::LAST_LOCATION, &saved).await
    }
}
