use std::collections::HashSet;

use log::{error, warn};

use lattice_serde::{write_vle, BitReader, BitWriter, Serde, SerdeErr};

use crate::{
    connection::{Capability, ConnectionRegistry, UserConnection},
    ids::{self, EntityId},
    messages::{EntityActionMsg, ExecType, MessageId},
    scene::{ChangeOrigin, ComponentTypeDesc, Scene, SceneEvent},
    sync::{
        error::SyncError,
        interpolation::interpolate_rigid_bodies,
        prioritizer::{DefaultEntityPrioritizer, EntityPrioritizer},
        state::SceneSyncState,
        wire,
    },
    types::{ConnectionId, HostType, PacketId},
};

/// Tuning knobs for the sync loop.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Interval between outbound sync ticks, seconds.
    pub update_period: f32,
    /// How often per-entity priorities are recomputed; never below
    /// `update_period`.
    pub priority_update_period: f32,
    /// Extrapolation ceiling for rigid bodies, in units of `update_period`.
    pub max_lin_extrap_time: f32,
    /// When set, clients never hand simulation to local physics.
    pub no_client_physics_handoff: bool,
    /// Enables the prioritizer and the observer-position channel.
    pub interest_management_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_period: 1.0 / 20.0,
            priority_update_period: 1.0,
            max_lin_extrap_time: 3.0,
            no_client_physics_handoff: false,
            interest_management_enabled: false,
        }
    }
}

/// Hook deciding whether a peer may modify an entity (or the scene itself
/// when the entity is `None`). Denials drop the message silently.
pub type ModifyPolicy = Box<dyn Fn(ConnectionId, Option<EntityId>) -> bool>;

/// The synchronization manager: owns the tick loop, routes inbound
/// messages and orchestrates outbound frames for every connection.
///
/// The manager holds no connection references; per-connection state is
/// owned by the connections themselves and reached through the registry
/// passed into each call.
pub struct SyncManager {
    pub(crate) host: HostType,
    pub(crate) update_period: f32,
    pub(crate) priority_update_period: f32,
    pub(crate) max_lin_extrap_time: f32,
    pub(crate) no_client_physics_handoff: bool,
    pub(crate) update_acc: f64,
    pub(crate) prio_update_acc: f64,
    /// Monotonic clock in seconds, advanced by `tick`.
    pub(crate) clock: f64,
    pub(crate) prioritizer: Option<Box<dyn EntityPrioritizer>>,
    pub(crate) observer: Option<EntityId>,
    /// Component types the server told us about; never echoed back.
    pub(crate) component_types_from_server: HashSet<u32>,
    /// Peer currently registering a placeholder type, excluded from the
    /// resulting broadcast.
    pub(crate) component_type_sender: Option<ConnectionId>,
    /// Component types already warned about for version mismatches.
    pub(crate) mismatching_component_types: HashSet<u32>,
    pub(crate) modify_policy: Option<ModifyPolicy>,
    /// Application-facing notifications (triggered actions, id acks)
    /// surfaced out of the event pump.
    pub(crate) app_events: Vec<SceneEvent>,
}

impl SyncManager {
    pub fn new(host: HostType, config: SyncConfig) -> Self {
        let mut manager = Self {
            host,
            update_period: 1.0 / 20.0,
            priority_update_period: 1.0,
            max_lin_extrap_time: config.max_lin_extrap_time,
            no_client_physics_handoff: config.no_client_physics_handoff,
            update_acc: 0.0,
            prio_update_acc: 0.0,
            clock: 0.0,
            prioritizer: None,
            observer: None,
            component_types_from_server: HashSet::new(),
            component_type_sender: None,
            mismatching_component_types: HashSet::new(),
            modify_policy: None,
            app_events: Vec::new(),
        };
        manager.set_update_period(config.update_period);
        manager.set_priority_update_period(config.priority_update_period);
        manager.set_interest_management_enabled(config.interest_management_enabled);
        manager
    }

    pub fn host(&self) -> HostType {
        self.host
    }

    pub fn update_period(&self) -> f32 {
        self.update_period
    }

    /// Allow max 100 Hz.
    pub fn set_update_period(&mut self, period: f32) {
        self.update_period = period.max(0.01);
    }

    pub fn set_priority_update_period(&mut self, period: f32) {
        self.priority_update_period = period.max(self.update_period);
    }

    pub fn set_max_lin_extrap_time(&mut self, periods: f32) {
        self.max_lin_extrap_time = periods.max(1.0);
    }

    pub fn set_interest_management_enabled(&mut self, enabled: bool) {
        self.prioritizer = if enabled {
            Some(Box::new(DefaultEntityPrioritizer))
        } else {
            None
        };
    }

    pub fn set_prioritizer(&mut self, prioritizer: Option<Box<dyn EntityPrioritizer>>) {
        self.prioritizer = prioritizer;
    }

    pub fn interest_management_enabled(&self) -> bool {
        self.prioritizer.is_some()
    }

    /// Entity whose placeable drives the outbound observer-position channel.
    pub fn set_observer(&mut self, observer: Option<EntityId>) {
        self.observer = observer;
    }

    pub fn set_modify_policy(&mut self, policy: Option<ModifyPolicy>) {
        self.modify_policy = policy;
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Drains notifications meant for the embedding application:
    /// triggered entity actions and id-ack confirmations.
    pub fn take_app_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.app_events)
    }

    /// Starts replicating `scene`: drops replication state accumulated for
    /// any previous scene on every connection, including interpolations.
    pub fn register_scene(&mut self, scene: &mut Scene, connections: &mut ConnectionRegistry) {
        scene.take_events();
        self.component_types_from_server.clear();
        self.mismatching_component_types.clear();
        for connection in connections.iter_mut() {
            if let Some(state) = connection.sync_state.as_mut() {
                state.clear();
            }
        }
    }

    /// Builds a fresh sync state for an authenticated connection: every
    /// non-local entity is marked dirty-new and given an initial priority.
    pub fn on_user_connected(&mut self, connection: &mut UserConnection, scene: &Scene) {
        let mut state = SceneSyncState::new();
        for entity in scene.entities() {
            if entity.is_local() {
                continue;
            }
            state.mark_entity_dirty(entity.id(), false, false);
            if let Some(prioritizer) = &self.prioritizer {
                let observer_pos = state.observer_pos;
                let observer_rot = state.observer_rot;
                let entity_state = state.entities.get_mut(&entity.id()).unwrap();
                prioritizer.compute_priority(scene, entity_state, observer_pos, observer_rot);
            }
        }
        connection.sync_state = Some(state);
    }

    /// Advances the sync loop by one frame.
    pub fn tick(&mut self, frametime: f64, scene: &mut Scene, connections: &mut ConnectionRegistry) {
        self.clock += frametime;
        self.pump_scene_events(scene, connections);

        // Smoothly update all rigid bodies on the client every frame.
        if !self.host.is_server() {
            scene.update_interpolations(frametime as f32);
            if let Some(connection) = connections.iter_mut().next() {
                if let Some(state) = connection.sync_state.as_mut() {
                    interpolate_rigid_bodies(
                        frametime,
                        state,
                        scene,
                        self.update_period,
                        self.max_lin_extrap_time,
                        self.no_client_physics_handoff,
                    );
                }
            }
        }

        self.update_acc += frametime;
        self.prio_update_acc += frametime;
        if self.update_acc < self.update_period as f64 {
            return;
        }
        // If multiple periods passed, still update just once.
        self.update_acc %= self.update_period as f64;

        let priority_tick = self.prio_update_acc >= self.priority_update_period as f64;
        if priority_tick {
            self.prio_update_acc %= self.priority_update_period as f64;
        }

        if self.host.is_server() {
            for id in connections.ids() {
                let Some(connection) = connections.get_mut(id) else {
                    continue;
                };
                if connection.sync_state.is_none() {
                    continue;
                }
                if self.prioritizer.is_some() {
                    let state = connection.sync_state.as_mut().unwrap();
                    if priority_tick {
                        let observer_pos = state.observer_pos;
                        let observer_rot = state.observer_rot;
                        self.prioritizer.as_ref().unwrap().compute_sync_priorities(
                            scene,
                            &mut state.entities,
                            observer_pos,
                            observer_rot,
                        );
                    }
                    state.sort_dirty_queue();
                }
                // Rigid-body deltas first; this clears their dirty bits so
                // the generic pass will not double-send them.
                if connection.wants_rigid_body_frames() {
                    self.replicate_rigid_body_changes(connection, scene);
                }
                self.process_sync_state(connection, scene);
            }
        } else if let Some(connection) = connections.iter_mut().next() {
            if connection.sync_state.is_some() {
                self.process_sync_state(connection, scene);
                if self.prioritizer.is_some() && priority_tick {
                    self.send_observer_position(connection, scene);
                }
            }
        }
    }

    /// Drains scene change notifications into per-connection dirty state.
    /// Only `Replicate`-origin changes enqueue; inbound decoding applies
    /// with `Disconnected` and re-signals explicitly.
    pub fn pump_scene_events(&mut self, scene: &mut Scene, connections: &mut ConnectionRegistry) {
        for event in scene.take_events() {
            match event {
                SceneEvent::AttributeChanged {
                    entity,
                    component,
                    index,
                    origin,
                } => {
                    // A local write to an interpolating attribute takes over
                    // from the blend.
                    if !self.host.is_server() && !scene.is_interpolating() {
                        let interpolated = scene
                            .entity(entity)
                            .and_then(|e| e.component(component))
                            .and_then(|c| c.attribute(index))
                            .map(|attr| attr.interpolated())
                            .unwrap_or(false);
                        if interpolated {
                            scene.end_attribute_interpolation(entity, component, index);
                        }
                    }
                    if !origin.replicates() || ids::is_local(component) || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_attribute_dirty(entity, component, index);
                    });
                }
                SceneEvent::AttributeAdded {
                    entity,
                    component,
                    index,
                    origin: _,
                } => {
                    // Creation always replicates: peers must agree on the
                    // attribute count to exchange bitmasks.
                    if ids::is_local(component) || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_attribute_created(entity, component, index);
                    });
                }
                SceneEvent::AttributeRemoved {
                    entity,
                    component,
                    index,
                    origin: _,
                } => {
                    if ids::is_local(component) || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_attribute_removed(entity, component, index);
                    });
                }
                SceneEvent::ComponentAdded {
                    entity,
                    component,
                    origin,
                } => {
                    if !origin.replicates() || ids::is_local(component) || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_component_dirty(entity, component);
                    });
                }
                SceneEvent::ComponentRemoved {
                    entity,
                    component,
                    origin,
                } => {
                    if !origin.replicates() || ids::is_local(component) || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_component_removed(entity, component);
                    });
                }
                SceneEvent::EntityCreated { entity, origin } => {
                    if !origin.replicates() || ids::is_local(entity) {
                        continue;
                    }
                    let mut pending_removal = false;
                    self.for_each_state(connections, |state| {
                        pending_removal |= state.mark_entity_created(entity);
                    });
                    if pending_removal {
                        warn!(
                            "entity {entity} is queued to be deleted, but a new entity is to be added to the scene"
                        );
                    }
                    self.compute_initial_priority(scene, connections, entity);
                }
                SceneEvent::EntityRemoved { entity, origin } => {
                    if !origin.replicates() || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_entity_removed(entity);
                    });
                }
                SceneEvent::EntityPropertiesChanged { entity, origin } => {
                    if !origin.replicates() || ids::is_local(entity) {
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_entity_dirty(entity, true, false);
                    });
                }
                SceneEvent::EntityParentChanged {
                    entity,
                    parent,
                    origin,
                } => {
                    if !origin.replicates() || ids::is_local(entity) {
                        continue;
                    }
                    if parent.is_some_and(ids::is_local) {
                        error!(
                            "replicated entity {entity} is parented to a local entity, cannot replicate parenting over the network"
                        );
                        continue;
                    }
                    self.for_each_state(connections, |state| {
                        state.mark_entity_dirty(entity, false, true);
                    });
                }
                SceneEvent::ActionTriggered {
                    entity,
                    action,
                    params,
                    exec_type,
                } => {
                    self.app_events.push(SceneEvent::ActionTriggered {
                        entity,
                        action: action.clone(),
                        params: params.clone(),
                        exec_type,
                    });
                    self.route_action(connections, entity, action, params, exec_type);
                }
                SceneEvent::PlaceholderTypeRegistered { type_id, origin } => {
                    if !origin.replicates() {
                        continue;
                    }
                    self.replicate_component_type(type_id, scene, connections, None);
                }
                event @ (SceneEvent::EntityAcked { .. } | SceneEvent::ComponentAcked { .. }) => {
                    // Application-facing notifications only.
                    self.app_events.push(event);
                }
            }
        }
    }

    fn for_each_state(
        &self,
        connections: &mut ConnectionRegistry,
        mut f: impl FnMut(&mut SceneSyncState),
    ) {
        for connection in connections.iter_mut() {
            if let Some(state) = connection.sync_state.as_mut() {
                f(state);
            }
        }
    }

    /// A freshly enqueued entity gets its priority immediately; waiting for
    /// the priority tick would misorder its very first flush.
    fn compute_initial_priority(
        &self,
        scene: &Scene,
        connections: &mut ConnectionRegistry,
        entity: EntityId,
    ) {
        let Some(prioritizer) = &self.prioritizer else {
            return;
        };
        for connection in connections.iter_mut() {
            if let Some(state) = connection.sync_state.as_mut() {
                let observer_pos = state.observer_pos;
                let observer_rot = state.observer_rot;
                if let Some(entity_state) = state.entities.get_mut(&entity) {
                    prioritizer.compute_priority(scene, entity_state, observer_pos, observer_rot);
                }
            }
        }
    }

    fn route_action(
        &mut self,
        connections: &mut ConnectionRegistry,
        entity: EntityId,
        action: String,
        params: Vec<String>,
        exec_type: ExecType,
    ) {
        if self.host.is_server() {
            if !exec_type.contains(ExecType::PEERS) {
                return;
            }
            // Queue on every authenticated peer; flushed after entity sync.
            let msg = EntityActionMsg {
                entity_id: entity,
                name: action,
                exec_type: ExecType::LOCAL,
                params,
            };
            for connection in connections.iter_mut() {
                if connection.authenticated {
                    if let Some(state) = connection.sync_state.as_mut() {
                        state.queued_actions.push(msg.clone());
                    }
                }
            }
        } else if exec_type.contains(ExecType::SERVER) || exec_type.contains(ExecType::PEERS) {
            let msg = EntityActionMsg {
                entity_id: entity,
                name: action,
                exec_type: exec_type.without(ExecType::LOCAL),
                params,
            };
            if let Some(connection) = connections.iter_mut().next() {
                connection.send(MessageId::EntityAction, true, msg.write());
            }
        }
    }

    /// Routes one inbound frame. A decode error closes the connection:
    /// the caller must disconnect the peer on `Err`.
    pub fn handle_message(
        &mut self,
        source: ConnectionId,
        packet_id: PacketId,
        message_id: u16,
        data: &[u8],
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SyncError> {
        if connections.get(source).is_none() {
            return Ok(());
        }
        let Some(message_id) = MessageId::from_u16(message_id) else {
            return Ok(());
        };
        let mut reader = BitReader::new(data);
        let result = match message_id {
            MessageId::ObserverPosition => {
                self.handle_observer_position(source, &mut reader, connections)
            }
            MessageId::EditEntityProperties => {
                self.handle_edit_entity_properties(source, &mut reader, scene, connections)
            }
            MessageId::CreateEntity => {
                self.handle_create_entity(source, &mut reader, scene, connections)
            }
            MessageId::CreateComponents => {
                self.handle_create_components(source, &mut reader, scene, connections)
            }
            MessageId::CreateAttributes => {
                self.handle_create_attributes(source, &mut reader, scene, connections)
            }
            MessageId::EditAttributes => {
                self.handle_edit_attributes(source, &mut reader, scene, connections)
            }
            MessageId::RemoveAttributes => {
                self.handle_remove_attributes(source, &mut reader, scene, connections)
            }
            MessageId::RemoveComponents => {
                self.handle_remove_components(source, &mut reader, scene, connections)
            }
            MessageId::RemoveEntity => {
                self.handle_remove_entity(source, &mut reader, scene, connections)
            }
            MessageId::CreateEntityReply => {
                self.handle_create_entity_reply(source, &mut reader, scene, connections)
            }
            MessageId::CreateComponentsReply => {
                self.handle_create_components_reply(source, &mut reader, scene, connections)
            }
            MessageId::RigidBodyUpdate => {
                self.handle_rigid_body_update(source, packet_id, &mut reader, scene, connections)
            }
            MessageId::EntityAction => {
                self.handle_entity_action(source, &mut reader, scene, connections)
            }
            MessageId::RegisterComponentType => {
                self.handle_register_component_type(source, &mut reader, scene, connections)
            }
            MessageId::SetEntityParent => {
                self.handle_set_entity_parent(source, &mut reader, scene, connections)
            }
        };
        result.map_err(SyncError::from)
    }

    pub(crate) fn inbound_change_origin(&self) -> ChangeOrigin {
        // Server re-replicates inbound changes to its other clients; a
        // client applies them terminally.
        if self.host.is_server() {
            ChangeOrigin::Replicate
        } else {
            ChangeOrigin::LocalOnly
        }
    }

    pub(crate) fn validate_action(
        &self,
        connections: &ConnectionRegistry,
        source: ConnectionId,
    ) -> bool {
        if !self.host.is_server() {
            // Scene actions from the server are trusted.
            return true;
        }
        connections
            .get(source)
            .map(|c| c.authenticated)
            .unwrap_or(false)
    }

    pub(crate) fn allow_modify(&self, source: ConnectionId, entity: Option<EntityId>) -> bool {
        match &self.modify_policy {
            Some(policy) => policy(source, entity),
            None => true,
        }
    }

    pub(crate) fn warn_component_type_mismatch_once(&mut self, type_id: u32, detail: &str) {
        if self.mismatching_component_types.insert(type_id) {
            warn!("{detail} in component type {type_id} (version mismatch)");
        }
    }

    /// Serialized placeholder descriptor for RegisterComponentType.
    pub(crate) fn component_type_payload(desc: &ComponentTypeDesc) -> Vec<u8> {
        let mut writer = BitWriter::new();
        write_vle(&mut writer, desc.type_id);
        desc.type_name.ser(&mut writer);
        write_vle(&mut writer, desc.attributes.len() as u32);
        for attribute in &desc.attributes {
            attribute.type_id.ser(&mut writer);
            attribute.name.ser(&mut writer);
        }
        writer.to_bytes()
    }

    /// Sends a placeholder component type descriptor to one peer or to all
    /// capable peers (minus the peer it was just learned from).
    pub(crate) fn replicate_component_type(
        &mut self,
        type_id: u32,
        scene: &Scene,
        connections: &mut ConnectionRegistry,
        only_to: Option<ConnectionId>,
    ) {
        let Some(desc) = scene.registry().placeholder(type_id) else {
            warn!("cannot replicate unknown component type {type_id}");
            return;
        };
        let payload = Self::component_type_payload(desc);

        if let Some(target) = only_to {
            if let Some(connection) = connections.get_mut(target) {
                if connection.supports(Capability::CustomComponents) {
                    connection.send(MessageId::RegisterComponentType, true, payload);
                }
            }
            return;
        }

        if self.host.is_server() {
            for connection in connections.iter_mut() {
                if connection.sync_state.is_some()
                    && connection.supports(Capability::CustomComponents)
                    && Some(connection.id()) != self.component_type_sender
                {
                    connection.send(MessageId::RegisterComponentType, true, payload.clone());
                }
            }
        } else if let Some(connection) = connections.iter_mut().next() {
            if connection.supports(Capability::CustomComponents)
                && Some(connection.id()) != self.component_type_sender
            {
                connection.send(MessageId::RegisterComponentType, true, payload);
            }
        }
    }

    /// Client-side observer channel: sent at the priority cadence, only
    /// when the pose actually moved.
    pub(crate) fn send_observer_position(&mut self, connection: &mut UserConnection, scene: &Scene) {
        use crate::scene::{PLACEABLE_TRANSFORM_INDEX, PLACEABLE_TYPE_ID};

        let Some(observer) = self.observer else {
            return;
        };
        let Some(transform) = scene
            .entity(observer)
            .and_then(|e| e.component_by_type(PLACEABLE_TYPE_ID))
            .and_then(|c| c.transform_at(PLACEABLE_TRANSFORM_INDEX))
        else {
            return;
        };
        let Some(state) = connection.sync_state.as_mut() else {
            return;
        };

        let pos_changed = transform.pos.distance_squared(state.observer_pos) > 1e-8;
        let rot_changed = transform.rot.angle_between(state.observer_rot) > 1e-4;
        if !pos_changed && !rot_changed {
            return;
        }
        state.observer_pos = transform.pos;
        state.observer_rot = transform.rot;

        let rot3 = glam::Mat3::from_quat(transform.rot);
        let pos_send_type = wire::detect_pos_send_type(pos_changed, transform.pos);
        let rot_send_type = wire::detect_rot_send_type(rot_changed, &rot3);

        let mut writer = BitWriter::new();
        write_vle(&mut writer, 0); // scene id
        lattice_serde::write_arithmetic_encoded(
            &mut writer,
            8,
            &[(pos_send_type, 3), (rot_send_type, 4)],
        );
        wire::write_optimized_pos_rot(&mut writer, pos_send_type, transform.pos, rot_send_type, &rot3);
        connection.send(MessageId::ObserverPosition, false, writer.to_bytes());
    }

    pub(crate) fn handle_observer_position(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let Some(connection) = connections.get_mut(source) else {
            return Ok(());
        };
        let Some(state) = connection.sync_state.as_mut() else {
            return Ok(());
        };

        let _scene_id = lattice_serde::read_vle(reader)?;
        let [pos_send_type, rot_send_type] =
            lattice_serde::read_arithmetic_encoded(reader, 8, [3, 4])?;
        let (pos, rot) = wire::read_optimized_pos_rot(reader, pos_send_type, rot_send_type)?;

        // Store always; priorities pick it up on the next priority tick.
        if let Some(pos) = pos {
            state.observer_pos = pos;
        }
        if let Some(rot) = rot {
            state.observer_rot = rot;
        }
        Ok(())
    }
}
