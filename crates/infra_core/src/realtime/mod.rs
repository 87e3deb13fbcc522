//! Realtime relay between game servers and the proxy.
//!
//! The proxy runs the server role and every game server connects to it as a
//! client. Frames are length-prefixed binary (see [`protocol`]) and are
//! addressed by server id; the proxy forwards frames between peers.

mod channel;
mod client;
pub mod protocol;
mod registry;
mod server;
mod settings;

pub use channel::{RealtimeOptions, RealtimeRole, TcpRealtimeChannel};
pub use client::OutboundQueue;
pub use protocol::{Activity, Frame, ProtocolError};
pub use registry::{Delivery, PeerHandle, PeerRegistry};
pub use settings::RealtimeSettings;
