//! # Lattice Client
//! Client end of the scene replication protocol: mirrors the server's
//! scene, interpolates rigid-body motion between snapshots and pushes
//! client-originated edits (under unacked ids) back upstream.

mod client;

pub use client::Client;

pub use lattice_shared::{ConnectionKind, ProtocolVersion, Scene, SceneEvent, SyncConfig};
