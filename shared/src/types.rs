/// Transport-level packet counter, compared wrap-aware.
pub type PacketId = u16;

/// One scene per connection for now; carried on the wire for forward
/// compatibility with multi-scene addressing.
pub type SceneId = u32;

pub type ConnectionId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
}

impl HostType {
    pub fn is_server(self) -> bool {
        self == HostType::Server
    }
}
