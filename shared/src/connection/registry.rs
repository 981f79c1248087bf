use std::collections::BTreeMap;

use crate::{
    connection::user_connection::{ConnectionKind, UserConnection},
    connection::ProtocolVersion,
    types::ConnectionId,
};

/// Authoritative list of live connections, keyed by id. Dropping an entry
/// cancels every pending flush for that peer because the connection owns
/// its sync state outright.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, UserConnection>,
    next_id: ConnectionId,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ConnectionKind, protocol_version: ProtocolVersion) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        self.connections
            .insert(id, UserConnection::new(id, kind, protocol_version));
        id
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<UserConnection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&UserConnection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut UserConnection> {
        self.connections.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UserConnection> {
        self.connections.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserConnection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
