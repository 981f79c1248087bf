use log::error;

use lattice_shared::{
    ConnectionId, ConnectionKind, ConnectionRegistry, HostType, OutgoingMessage, PacketId,
    ProtocolVersion, Scene, SceneEvent, SyncConfig, SyncManager, UserConnection,
};

/// The authoritative host. Connections attach unauthenticated; once
/// authenticated they get a sync state seeded with the whole scene and
/// start receiving deltas on every tick.
pub struct Server {
    scene: Scene,
    sync: SyncManager,
    connections: ConnectionRegistry,
}

impl Server {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            scene: Scene::new(0),
            sync: SyncManager::new(HostType::Server, config),
            connections: ConnectionRegistry::new(),
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncManager {
        &mut self.sync
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&UserConnection> {
        self.connections.get(id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut UserConnection> {
        self.connections.get_mut(id)
    }

    /// Registers a transport-level connection. No replication happens
    /// until the login/auth flow calls [`Self::authenticate`].
    pub fn connect(&mut self, kind: ConnectionKind, protocol_version: ProtocolVersion) -> ConnectionId {
        self.connections.insert(kind, protocol_version)
    }

    /// Grants the connection a sync state: every non-local entity is
    /// marked dirty-new and will reach the client over the next ticks.
    pub fn authenticate(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        connection.authenticated = true;
        self.sync.on_user_connected(connection, &self.scene);
        true
    }

    /// Dropping the connection cancels all pending flushes for it.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.connections.remove(id);
    }

    pub fn tick(&mut self, frametime: f64) {
        self.sync
            .tick(frametime, &mut self.scene, &mut self.connections);
    }

    /// Feeds one inbound frame. Returns false when the frame was
    /// malformed and the connection has been closed.
    pub fn receive(
        &mut self,
        source: ConnectionId,
        packet_id: PacketId,
        message_id: u16,
        data: &[u8],
    ) -> bool {
        match self.sync.handle_message(
            source,
            packet_id,
            message_id,
            data,
            &mut self.scene,
            &mut self.connections,
        ) {
            Ok(()) => true,
            Err(err) => {
                error!("exception while handling scene sync message {message_id}: {err}, disconnecting user {source}");
                self.disconnect(source);
                false
            }
        }
    }

    pub fn take_outgoing(&mut self, id: ConnectionId) -> Vec<OutgoingMessage> {
        self.connections
            .get_mut(id)
            .map(|c| c.take_outgoing())
            .unwrap_or_default()
    }

    pub fn take_app_events(&mut self) -> Vec<SceneEvent> {
        self.sync.take_app_events()
    }

    /// Sends an entity action to a single authenticated user, bypassing
    /// the peers fan-out. Executes as Local on the receiver.
    pub fn send_action_to(
        &mut self,
        id: ConnectionId,
        entity: lattice_shared::EntityId,
        action: &str,
        params: Vec<String>,
    ) -> bool {
        if !self.scene.contains_entity(entity) {
            return false;
        }
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        if !connection.authenticated {
            return false;
        }
        let msg = lattice_shared::EntityActionMsg {
            entity_id: entity,
            name: action.to_string(),
            exec_type: lattice_shared::ExecType::LOCAL,
            params,
        };
        connection.send(lattice_shared::MessageId::EntityAction, true, msg.write());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_shared::{ChangeOrigin, MessageId, NAME_TYPE_ID};

    #[test]
    fn fresh_join_sends_create_entity() {
        let mut server = Server::new(SyncConfig::default());
        let entity_id = server.scene_mut().next_free_id();
        server
            .scene_mut()
            .create_entity(entity_id, ChangeOrigin::Replicate)
            .unwrap();
        server
            .scene_mut()
            .create_component(entity_id, None, NAME_TYPE_ID, "", ChangeOrigin::Replicate)
            .unwrap();

        let conn = server.connect(ConnectionKind::Datagram, ProtocolVersion::latest());
        server.authenticate(conn);
        server.tick(0.1);

        let outgoing = server.take_outgoing(conn);
        assert!(outgoing
            .iter()
            .any(|m| m.message_id == MessageId::CreateEntity && m.reliable));
    }

    #[test]
    fn unauthenticated_connections_receive_nothing() {
        let mut server = Server::new(SyncConfig::default());
        let entity_id = server.scene_mut().next_free_id();
        server
            .scene_mut()
            .create_entity(entity_id, ChangeOrigin::Replicate)
            .unwrap();

        let conn = server.connect(ConnectionKind::Datagram, ProtocolVersion::latest());
        server.tick(0.1);
        assert!(server.take_outgoing(conn).is_empty());
    }
}
