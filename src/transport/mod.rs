pub mod auth;
pub mod rest;
pub mod socket;

pub use auth::AuthToken;
pub use rest::{HttpBackend, TrackingBackend};
pub use socket::{ClientEvent, ServerEvent, SocketChannel, WsChannel};
