pub mod adapter;
pub mod platform;

pub use adapter::{LocationSourceAdapter, Subscription};
pub use platform::{
    AccuracyTier, BackgroundConfig, ForegroundConfig, LocationPlatform, PermissionStatus,
    PlatformUpdate, WatchId,
};
