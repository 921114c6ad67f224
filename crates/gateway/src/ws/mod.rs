// WebSocket broadcast layer.
//
// `hub` owns the session registry and fan-out, `session` runs the two
// per-connection loops, `handler` wires both into the HTTP surface.

pub mod handler;
pub mod hub;
pub mod session;

pub use handler::router;
pub use hub::{Hub, HubHandle, SessionId};
