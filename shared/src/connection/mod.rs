mod protocol_version;
mod registry;
mod user_connection;

pub use protocol_version::{Capability, ProtocolVersion};
pub use registry::ConnectionRegistry;
pub use user_connection::{ConnectionKind, UserConnection};
