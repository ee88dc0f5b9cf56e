pub mod dispatcher;
pub mod outbox;
pub mod route;
pub mod throttle;

pub use dispatcher::{DispatchOutcome, DispatchStats, UpdateDispatcher};
pub use outbox::{Outbox, PendingUpdate};
pub use route::{RouteBuffer, RoutePoint};
pub use throttle::Throttle;
