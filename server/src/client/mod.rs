//! Device-side components: the transport client that owns the hub
//! connection, the location capture agent that filters GPS samples into it,
//! and the session-scoped notification store fed by inbound events.

pub mod agent;
pub mod notifications;
pub mod transport;
