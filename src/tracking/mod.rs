pub mod controller;
pub mod events;
mod pump;
pub mod retry;
pub mod state;

pub use controller::{RestoreOutcome, TrackingController, TrackingSnapshot};
pub use events::{AppState, TrackingEvent};
pub use retry::RetryPolicy;
pub use state::{Action, TrackingState};
