//! parley-gateway - WebSocket and REST transport for the router
//!
//! Clients connect over `/ws` to send human messages and collaboration
//! commands; every router event is broadcast back to all of them. A small REST
//! surface exposes health, session listing and stop controls.

pub mod events;
pub mod protocol;
pub mod server;

pub use events::EventBus;
pub use server::{GatewayServer, KeyStatus};
