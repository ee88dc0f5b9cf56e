//! Stateless geofence containment.
//!
//! Containment uses the haversine great-circle distance. When regions
//! overlap, the first geofence in list order wins; there is no
//! nearest-center tie break.

use crate::error::TrackingResult;
use crate::models::{GeoPoint, Geofence, GeofenceMembership, RawLocation};

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// A geofence with an unusable radius never contains anything.
pub fn contains_point(point: impl Into<GeoPoint>, geofence: &Geofence) -> bool {
    let Some(radius) = geofence.radius_meters.meters() else {
        return false;
    };
    distance_meters(point.into(), geofence.center) <= radius
}

pub fn evaluate<'a, I>(point: impl Into<GeoPoint>, geofences: I) -> GeofenceMembership
where
    I: IntoIterator<Item = &'a Geofence>,
{
    let point = point.into();
    geofences
        .into_iter()
        .find(|geofence| contains_point(point, geofence))
        .map(|geofence| GeofenceMembership::inside(geofence.id.clone()))
        .unwrap_or_else(GeofenceMembership::outside)
}

/// Evaluates a platform fix in either coordinate shape.
pub fn evaluate_raw<'a, I>(raw: &RawLocation, geofences: I) -> TrackingResult<GeofenceMembership>
where
    I: IntoIterator<Item = &'a Geofence>,
{
    let point = GeoPoint::try_from(raw)?;
    Ok(evaluate(point, geofences))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearestGeofence {
    pub geofence_id: String,
    pub name: String,
    /// Distance to the boundary; zero when inside.
    pub distance_to_edge_m: f64,
}

/// Closest geofence boundary, skipping geofences with an unusable radius.
pub fn nearest<'a, I>(point: impl Into<GeoPoint>, geofences: I) -> Option<NearestGeofence>
where
    I: IntoIterator<Item = &'a Geofence>,
{
    let point = point.into();
    geofences
        .into_iter()
        .filter_map(|geofence| {
            let radius = geofence.radius_meters.meters()?;
            let edge = (distance_meters(point, geofence.center) - radius).max(0.0);
            Some((geofence, edge))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(geofence, edge)| NearestGeofence {
            geofence_id: geofence.id.clone(),
            name: geofence.name.clone(),
            distance_to_edge_m: edge,
        })
}
