pub mod actor;
pub mod handler;
pub mod locations;
pub mod reaper;
pub mod registry;
pub mod router;

use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel. Any part of the hub can
/// clone this to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Opaque per-socket identifier, assigned at upgrade time.
pub type ConnectionId = String;
