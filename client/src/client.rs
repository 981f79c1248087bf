use log::error;

use lattice_shared::{
    ChangeOrigin, ComponentId, ConnectionId, ConnectionKind, ConnectionRegistry, EntityId,
    HostType, OutgoingMessage, PacketId, ProtocolVersion, Scene, SceneEvent, SceneSyncState,
    SyncConfig, SyncManager, UserConnection,
};

/// The client host: one connection to the server, a mirrored scene and a
/// client-mode sync manager. The dirty queue carries only edits this
/// client originates; inbound rigid-body motion feeds the interpolator.
pub struct Client {
    scene: Scene,
    sync: SyncManager,
    connections: ConnectionRegistry,
    server_connection: Option<ConnectionId>,
}

impl Client {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            scene: Scene::new(0),
            sync: SyncManager::new(HostType::Client, config),
            connections: ConnectionRegistry::new(),
            server_connection: None,
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

    /// Opens the (sole) server connection. The sync state starts empty:
    /// the server pushes its scene, we push only what we author.
    pub fn connect(&mut self, kind: ConnectionKind, protocol_version: ProtocolVersion) -> ConnectionId {
        if let Some(old) = self.server_connection.take() {
            self.connections.remove(old);
        }
        let id = self.connections.insert(kind, protocol_version);
        if let Some(connection) = self.connections.get_mut(id) {
            connection.authenticated = true;
            connection.sync_state = Some(SceneSyncState::new());
        }
        self.server_connection = Some(id);
        id
    }

    pub fn disconnect(&mut self) {
        if let Some(id) = self.server_connection.take() {
            self.connections.remove(id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.server_connection.is_some()
    }

    pub fn server_connection(&self) -> Option<&UserConnection> {
        self.connections.get(self.server_connection?)
    }

    pub fn server_connection_mut(&mut self) -> Option<&mut UserConnection> {
        self.connections.get_mut(self.server_connection?)
    }

    /// Entity whose placeable is reported upstream for interest
    /// management.
    pub fn set_observer(&mut self, entity: Option<EntityId>) {
        self.sync.set_observer(entity);
    }

    pub fn tick(&mut self, frametime: f64) {
        self.sync
            .tick(frametime, &mut self.scene, &mut self.connections);
    }

    /// Feeds one inbound frame from the server. Returns false when the
    /// frame was malformed and the connection has been dropped.
    pub fn receive(&mut self, packet_id: PacketId, message_id: u16, data: &[u8]) -> bool {
        let Some(source) = self.server_connection else {
            return false;
        };
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
                error!("exception while handling scene sync message {message_id}: {err}, closing server connection");
                self.disconnect();
                false
            }
        }
    }

    pub fn take_outgoing(&mut self) -> Vec<OutgoingMessage> {
        self.server_connection
            .and_then(|id| self.connections.get_mut(id))
            .map(|c| c.take_outgoing())
            .unwrap_or_default()
    }

    pub fn take_app_events(&mut self) -> Vec<SceneEvent> {
        self.sync.take_app_events()
    }

    /// Authors a replicated entity under a pending id; the server
    /// rewrites it and replies with the permanent one.
    pub fn create_entity(&mut self) -> Option<EntityId> {
        let id = self.scene.next_unacked_id();
        self.scene.create_entity(id, ChangeOrigin::Replicate)?;
        Some(id)
    }

    /// Adds a component to a client-authored entity under a pending id.
    pub fn create_component(
        &mut self,
        entity: EntityId,
        type_id: u32,
        name: &str,
    ) -> Option<ComponentId> {
        let component_id = self.scene.entity_mut(entity)?.next_unacked_component_id();
        self.scene
            .create_component(entity, Some(component_id), type_id, name, ChangeOrigin::Replicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_shared::{ids, MessageId, NAME_TYPE_ID};

    #[test]
    fn client_created_entities_use_unacked_ids() {
        let mut client = Client::new(SyncConfig::default());
        client.connect(ConnectionKind::Datagram, ProtocolVersion::latest());

        let entity = client.create_entity().unwrap();
        assert!(ids::is_unacked(entity));
        let component = client.create_component(entity, NAME_TYPE_ID, "").unwrap();
        assert!(ids::is_unacked(component));

        client.tick(0.1);
        let outgoing = client.take_outgoing();
        assert!(outgoing
            .iter()
            .any(|m| m.message_id == MessageId::CreateEntity));
    }
}
