//! # Lattice Server
//! Authoritative end of the scene replication protocol: owns the scene,
//! the connection registry and a server-mode sync manager.

mod server;

pub use server::Server;

pub use lattice_shared::{
    ConnectionId, ConnectionKind, ProtocolVersion, Scene, SceneEvent, SyncConfig,
};
