use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geofence::distance_meters;
use crate::models::{GeoPoint, LocationSample};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl RoutePoint {
    fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Recent points for drawing the on-screen polyline. Display only; the
/// backend keeps the authoritative trail.
#[derive(Debug, Clone)]
pub struct RouteBuffer {
    points: VecDeque<RoutePoint>,
    capacity: usize,
    min_spacing_m: f64,
}

impl RouteBuffer {
    pub fn new(capacity: usize, min_spacing_m: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            min_spacing_m,
        }
    }

    /// Appends unless the sample is within `min_spacing_m` of the last kept
    /// point. Evicts the oldest point when full.
    pub fn push(&mut self, sample: &LocationSample) -> bool {
        if let Some(last) = self.points.back() {
            if distance_meters(last.point(), sample.point()) < self.min_spacing_m {
                return false;
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(RoutePoint {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> Vec<RoutePoint> {
        self.points.iter().cloned().collect()
    }

    /// Sum of the retained segments, for display.
    pub fn length_meters(&self) -> f64 {
        self.points
            .iter()
            .zip(self.points.iter().skip(1))
            .map(|(a, b)| distance_meters(a.point(), b.point()))
            .sum()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
