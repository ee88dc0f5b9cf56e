//! Location samples and the raw shapes they are normalized from.
//!
//! Platforms hand in fixes either flat (`{latitude, longitude, ...}`) or
//! nested (`{coords: {latitude, longitude, ...}, timestamp}`). Both are
//! accepted by [`RawLocation`] and turned into one [`LocationSample`] by
//! [`LocationSample::from_raw`]; nothing downstream looks at the raw shape.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};

/// Speed above which a sample counts as moving.
pub const MOVING_SPEED_THRESHOLD_MPS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn validate(self) -> TrackingResult<Self> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(TrackingError::InvalidLocation(
                "coordinates must be finite".into(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(TrackingError::InvalidLocation(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(TrackingError::InvalidLocation(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCoords {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

impl RawCoords {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            heading: None,
            speed: None,
        }
    }
}

/// A fix as delivered by the platform, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLocation {
    #[serde(rename_all = "camelCase")]
    Nested {
        coords: RawCoords,
        /// Milliseconds since the Unix epoch; some platforms send fractions.
        #[serde(default)]
        timestamp: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Flat {
        #[serde(flatten)]
        coords: RawCoords,
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

impl RawLocation {
    pub fn flat(latitude: f64, longitude: f64) -> Self {
        RawLocation::Flat {
            coords: RawCoords::at(latitude, longitude),
            timestamp: None,
        }
    }

    pub fn coords(&self) -> &RawCoords {
        match self {
            RawLocation::Nested { coords, .. } | RawLocation::Flat { coords, .. } => coords,
        }
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            RawLocation::Nested { timestamp, .. } | RawLocation::Flat { timestamp, .. } => {
                timestamp.filter(|ms| ms.is_finite()).map(|ms| ms as i64)
            }
        }
    }
}

impl TryFrom<&RawLocation> for GeoPoint {
    type Error = TrackingError;

    fn try_from(raw: &RawLocation) -> TrackingResult<Self> {
        let coords = raw.coords();
        GeoPoint::new(coords.latitude, coords.longitude).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub battery_level: Option<f32>,
    pub is_moving: bool,
}

impl LocationSample {
    /// Normalizes a raw fix. A missing timestamp falls back to `received_at`;
    /// negative speeds (platform "unknown") are dropped.
    pub fn from_raw(
        raw: &RawLocation,
        battery_level: Option<f32>,
        received_at: DateTime<Utc>,
    ) -> TrackingResult<Self> {
        let point = GeoPoint::try_from(raw)?;
        let coords = raw.coords();

        let timestamp = raw
            .timestamp_ms()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(received_at);

        let speed = coords.speed.filter(|s| s.is_finite() && *s >= 0.0);
        let is_moving = speed.map_or(false, |s| s > MOVING_SPEED_THRESHOLD_MPS);

        Ok(Self {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: coords
                .accuracy
                .filter(|a| a.is_finite() && *a >= 0.0)
                .unwrap_or(0.0),
            altitude: coords.altitude.filter(|a| a.is_finite()),
            heading: coords.heading.filter(|h| h.is_finite() && *h >= 0.0),
            speed,
            timestamp,
            battery_level: battery_level.filter(|b| (0.0..=1.0).contains(b)),
            is_moving,
        })
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

impl From<&LocationSample> for GeoPoint {
    fn from(sample: &LocationSample) -> Self {
        sample.point()
    }
}
