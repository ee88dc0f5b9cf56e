pub mod controller;

pub use controller::{ShiftController, ShiftOptions, UserProfile};
