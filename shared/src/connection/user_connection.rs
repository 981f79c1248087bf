use std::collections::HashMap;

use crate::{
    connection::protocol_version::{Capability, ProtocolVersion},
    ids::EntityId,
    messages::{MessageId, OutgoingMessage},
    sync::SceneSyncState,
    types::ConnectionId,
};

/// Transport flavor of a connection. Datagram transports carry per-packet
/// ids (enabling the rigid-body out-of-order guard) and always receive the
/// rigid-body fast path; web transports only receive it from
/// `WebClientRigidBodyMessage` onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    Datagram,
    Web,
}

/// One peer. The connection owns its replication state; the sync manager
/// reaches it through the registry by id and never stores references.
pub struct UserConnection {
    id: ConnectionId,
    kind: ConnectionKind,
    protocol_version: ProtocolVersion,
    pub authenticated: bool,
    pub sync_state: Option<SceneSyncState>,
    /// Pending client ids already rewritten to server ids; later messages
    /// from this client may still refer to the pending id.
    pub unacked_ids_to_real_ids: HashMap<EntityId, EntityId>,
    outbox: Vec<OutgoingMessage>,
}

impl UserConnection {
    pub fn new(id: ConnectionId, kind: ConnectionKind, protocol_version: ProtocolVersion) -> Self {
        Self {
            id,
            kind,
            protocol_version,
            authenticated: false,
            sync_state: None,
            unacked_ids_to_real_ids: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.protocol_version.supports(capability)
    }

    pub fn wants_rigid_body_frames(&self) -> bool {
        self.kind == ConnectionKind::Datagram
            || self.supports(Capability::WebClientRigidBodyMessage)
    }

    pub fn send(&mut self, message_id: MessageId, reliable: bool, payload: Vec<u8>) {
        self.outbox.push(OutgoingMessage {
            message_id,
            reliable,
            payload,
        });
    }

    /// Drains messages for the transport to frame and deliver.
    pub fn take_outgoing(&mut self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }
}
