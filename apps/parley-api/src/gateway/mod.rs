//! The real-time gateway: connection/session registry, room-subscription
//! index, and the dispatch/fan-out engine.

pub mod dispatcher;
pub mod events;
pub mod presence;
pub mod rooms;
pub mod server;
pub mod session;
