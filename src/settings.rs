use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::location::{AccuracyTier, BackgroundConfig, ForegroundConfig};
use crate::tracking::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub min_interval_ms: u64,
    pub flush_interval_ms: u64,
    pub route_capacity: usize,
    pub route_min_spacing_m: f64,
    pub outbox_capacity: usize,
    pub max_delivery_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 3_000,
            flush_interval_ms: 30_000,
            route_capacity: 500,
            route_min_spacing_m: 5.0,
            outbox_capacity: 200,
            max_delivery_attempts: 5,
        }
    }
}

impl DispatchSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub api_base_url: String,
    pub socket_url: String,
    pub foreground: ForegroundConfig,
    pub background: BackgroundConfig,
    pub dispatch: DispatchSettings,
    pub restart_policy: RetryPolicy,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".into(),
            socket_url: "ws://localhost:3000/ws".into(),
            foreground: ForegroundConfig {
                interval_ms: 5_000,
                distance_meters: 10.0,
                accuracy: AccuracyTier::High,
            },
            background: BackgroundConfig::default(),
            dispatch: DispatchSettings::default(),
            restart_policy: RetryPolicy::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackingSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings at {}: {err}; using defaults",
                    path.display()
                );
                TrackingSettings::default()
            })
        } else {
            TrackingSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracking(&self) -> TrackingSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: TrackingSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackingSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
