pub mod evaluator;
pub mod registry;
pub mod tracker;

pub use evaluator::{
    contains_point, distance_meters, evaluate, evaluate_raw, nearest, NearestGeofence, EARTH_RADIUS_METERS,
};
pub use registry::GeofenceSet;
pub use tracker::MembershipTracker;
