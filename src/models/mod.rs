pub mod geofence;
pub mod sample;
pub mod session;
pub mod shift;

pub use geofence::{Geofence, GeofenceMembership, GeofenceTransition, Radius, TransitionKind};
pub use sample::{GeoPoint, LocationSample, RawCoords, RawLocation, MOVING_SPEED_THRESHOLD_MPS};
pub use session::{SessionMeta, TrackingSession, TrackingStatus};
pub use shift::{Shift, ShiftRequest};
