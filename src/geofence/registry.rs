use std::sync::{Arc, RwLock};

use log::{info, warn};

use crate::models::{GeoPoint, Geofence, GeofenceMembership};

use super::evaluator::{evaluate, nearest, NearestGeofence};

/// The geofences assigned to the employee, shared by the tracking and shift
/// controllers. Order matters: the first containing geofence wins.
#[derive(Debug, Clone, Default)]
pub struct GeofenceSet {
    inner: Arc<RwLock<Vec<Geofence>>>,
}

impl GeofenceSet {
    pub fn new(geofences: Vec<Geofence>) -> Self {
        report_unusable(&geofences);
        Self {
            inner: Arc::new(RwLock::new(geofences)),
        }
    }

    pub fn replace(&self, geofences: Vec<Geofence>) {
        info!("Geofence list replaced ({} entries)", geofences.len());
        report_unusable(&geofences);
        match self.inner.write() {
            Ok(mut guard) => *guard = geofences,
            Err(poisoned) => *poisoned.into_inner() = geofences,
        }
    }

    pub fn snapshot(&self) -> Vec<Geofence> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn evaluate(&self, point: impl Into<GeoPoint>) -> GeofenceMembership {
        evaluate(point, &self.snapshot())
    }

    pub fn nearest(&self, point: impl Into<GeoPoint>) -> Option<NearestGeofence> {
        nearest(point, &self.snapshot())
    }
}

/// Warns once per list instead of on every fix.
fn report_unusable(geofences: &[Geofence]) -> usize {
    let mut unusable = 0;
    for geofence in geofences {
        if geofence.radius_meters.meters().is_none() {
            warn!(
                "Geofence {} ({}) has unusable radius {:?}; it will never contain a fix",
                geofence.id, geofence.name, geofence.radius_meters
            );
            unusable += 1;
        }
    }
    unusable
}
