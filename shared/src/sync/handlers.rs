//! Inbound message handlers. Mutations decode with `Disconnected` origin
//! (no signals), re-signal once coherent, and finally clear the sender's
//! own dirty state so nothing echoes back.

use log::{error, warn};

use lattice_serde::{read_vle, BitReader, BitWriter, Serde, SerdeErr};

use crate::{
    connection::{Capability, ConnectionRegistry},
    ids::{self, ComponentId, EntityId},
    messages::{EntityActionMsg, ExecType, MessageId},
    scene::{
        AttributeDesc, AttributeType, AttributeValue, ChangeOrigin, ComponentTypeDesc,
        ComponentTypeRegistry, Scene,
    },
    sync::{manager::SyncManager, state::EntitySyncState},
    types::ConnectionId,
};

impl SyncManager {
    fn set_attribute_silent(
        scene: &mut Scene,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        value: AttributeValue,
    ) {
        scene.set_attribute(entity_id, component_id, index, value, ChangeOrigin::Disconnected);
    }

    /// Server-side rewrite of a pending client id to its assigned id.
    fn resolve_unacked(
        &self,
        connections: &ConnectionRegistry,
        source: ConnectionId,
        id: u32,
        context: &str,
    ) -> Option<u32> {
        if !ids::is_unacked(id) {
            return Some(id);
        }
        match connections
            .get(source)
            .and_then(|c| c.unacked_ids_to_real_ids.get(&id))
        {
            Some(real) => Some(*real),
            None => {
                warn!("client sent unknown unacked id {id} in {context} message");
                None
            }
        }
    }

    /// Reads one full component update and applies it to the scene.
    /// Components the receiver cannot build are skipped; decode errors
    /// propagate for the caller's partial-frame cleanup. Created
    /// components are recorded in `added` as (sender wire id, local id).
    fn apply_component_full_update(
        &mut self,
        scene: &mut Scene,
        entity_id: EntityId,
        reader: &mut BitReader,
        change: ChangeOrigin,
        added: &mut Vec<(u32, ComponentId)>,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();

        let sender_component_id = read_vle(reader)?;
        let type_id = read_vle(reader)?;
        let name = String::de(reader)?;
        let attr_block_len = read_vle(reader)? as usize;
        let attr_block = reader.read_bytes(attr_block_len)?;
        let mut attr_reader = BitReader::new(&attr_block);

        // The server never adopts a client's component id.
        let requested_id = if is_server {
            None
        } else {
            if scene
                .entity(entity_id)
                .and_then(|e| e.component(sender_component_id))
                .is_some()
            {
                warn!(
                    "received creation for component {sender_component_id} that already exists in entity {entity_id}, removing the old component"
                );
                scene.remove_component(entity_id, sender_component_id, ChangeOrigin::LocalOnly);
            }
            Some(sender_component_id)
        };

        let Some(component_id) =
            scene.create_component(entity_id, requested_id, type_id, &name, change)
        else {
            warn!(
                "failed to create component of type {type_id} in entity {entity_id}, skipping component"
            );
            return Ok(());
        };
        added.push((sender_component_id, component_id));

        let Some((num_static, supports_dynamic, static_types)) = scene
            .entity(entity_id)
            .and_then(|e| e.component(component_id))
            .map(|component| {
                let static_types: Vec<Option<AttributeType>> = component.attributes()
                    [..component.num_static_attributes() as usize]
                    .iter()
                    .map(|slot| slot.as_ref().map(|a| a.attribute_type()))
                    .collect();
                (
                    component.num_static_attributes(),
                    component.supports_dynamic_attributes(),
                    static_types,
                )
            })
        else {
            return Ok(());
        };

        // Static attributes; tolerate version mismatches by stopping at
        // EOF (every attribute is at least 8 bits).
        for index in 0..num_static {
            if attr_reader.bits_left() < 8 {
                self.warn_component_type_mismatch_once(type_id, "not enough static attribute data");
                break;
            }
            let Some(attribute_type) = static_types[index as usize] else {
                continue;
            };
            let value = AttributeValue::from_binary(attribute_type, &mut attr_reader)?;
            Self::set_attribute_silent(scene, entity_id, component_id, index, value);
        }

        if supports_dynamic {
            while attr_reader.bits_left() > 2 * 8 {
                let index = u8::de(&mut attr_reader)?;
                let attr_type_id = u8::de(&mut attr_reader)?;
                let attr_name = String::de(&mut attr_reader)?;
                if !scene.create_dynamic_attribute(
                    entity_id,
                    component_id,
                    index,
                    attr_type_id,
                    &attr_name,
                    change,
                ) {
                    warn!(
                        "failed to create dynamic attribute {index} of component {component_id}, skipping the rest"
                    );
                    break;
                }
                let Some(attribute_type) = AttributeType::from_type_id(attr_type_id) else {
                    break;
                };
                let value = AttributeValue::from_binary(attribute_type, &mut attr_reader)?;
                Self::set_attribute_silent(scene, entity_id, component_id, index, value);
            }
        } else if attr_reader.bits_left() > 0 {
            self.warn_component_type_mismatch_once(type_id, "extra static attribute data");
        }

        Ok(())
    }

    pub(crate) fn handle_create_entity(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        if !self.allow_modify(source, None) {
            return Ok(());
        }

        let _scene_id = read_vle(reader)?;
        let sender_entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }

        let entity_id = if is_server {
            let entity_id = scene.next_free_id();
            if let Some(connection) = connections.get_mut(source) {
                connection
                    .unacked_ids_to_real_ids
                    .insert(ids::to_unacked(sender_entity_id), entity_id);
            }
            entity_id
        } else {
            if scene.contains_entity(sender_entity_id) {
                warn!(
                    "received entity creation for id {sender_entity_id} that already exists, removing the old entity"
                );
                scene.remove_entity(sender_entity_id, ChangeOrigin::LocalOnly);
            }
            sender_entity_id
        };

        if scene.create_entity(entity_id, ChangeOrigin::Disconnected).is_none() {
            warn!("could not create entity {entity_id}, disregarding CreateEntity message");
            return Ok(());
        }

        // The sender already has the entity; its sync state must start
        // clean so the create is not echoed back.
        if is_server {
            if let Some(state) = connections
                .get_mut(source)
                .and_then(|c| c.sync_state.as_mut())
            {
                state.remove_entity_state(ids::to_unacked(sender_entity_id));
                state.remove_entity_state(entity_id);
                state.mark_entity_processed(entity_id);
            }
        }

        let mut added: Vec<(u32, ComponentId)> = Vec::new();
        if let Err(err) =
            self.read_create_entity_body(source, reader, scene, connections, entity_id, change, &mut added)
        {
            error!(
                "failed to deserialize the creation of a new entity from the peer, deleting the partially crafted entity"
            );
            scene.remove_entity(entity_id, ChangeOrigin::Disconnected);
            return Err(err);
        }

        // Signal only a coherent state of the whole entity.
        scene.emit_entity_created(entity_id, change);
        for (_, component_id) in &added {
            scene.emit_component_added(entity_id, *component_id, change);
        }

        if is_server {
            let mut writer = BitWriter::new();
            lattice_serde::write_vle(&mut writer, scene.id());
            lattice_serde::write_vle(&mut writer, ids::to_wire(sender_entity_id));
            lattice_serde::write_vle(&mut writer, ids::to_wire(entity_id));
            lattice_serde::write_vle(&mut writer, added.len() as u32);
            for (sender_component_id, component_id) in &added {
                lattice_serde::write_vle(&mut writer, ids::to_wire(*sender_component_id));
                lattice_serde::write_vle(&mut writer, ids::to_wire(*component_id));
            }
            if let Some(connection) = connections.get_mut(source) {
                connection.send(MessageId::CreateEntityReply, true, writer.to_bytes());
            }
        }

        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            state.mark_entity_processed(entity_id);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_create_entity_body(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &ConnectionRegistry,
        entity_id: EntityId,
        change: ChangeOrigin,
        added: &mut Vec<(u32, ComponentId)>,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();

        let temporary = u8::de(reader)? != 0;
        scene.set_entity_temporary(entity_id, temporary, ChangeOrigin::Disconnected);

        let hierarchic = connections
            .get(source)
            .map(|c| c.supports(Capability::HierarchicScene))
            .unwrap_or(false);
        if hierarchic {
            let mut parent_id = u32::de(reader)?;
            if is_server && ids::is_unacked(parent_id) {
                parent_id = self
                    .resolve_unacked(connections, source, parent_id, "CreateEntity")
                    .unwrap_or(parent_id);
            }
            if parent_id != 0 {
                if scene.contains_entity(parent_id) {
                    scene.set_entity_parent(entity_id, Some(parent_id), change);
                } else {
                    warn!(
                        "parent entity {parent_id} not found from scene when handling CreateEntity message"
                    );
                }
            }
        }

        let num_components = read_vle(reader)?;
        for _ in 0..num_components {
            self.apply_component_full_update(scene, entity_id, reader, change, added)?;
        }
        Ok(())
    }

    pub(crate) fn handle_create_components(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for CreateComponents message");
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }

        let mut added: Vec<(u32, ComponentId)> = Vec::new();
        let mut parse_error = None;
        while reader.bits_left() > 2 * 8 {
            if let Err(err) =
                self.apply_component_full_update(scene, entity_id, reader, change, &mut added)
            {
                parse_error = Some(err);
                break;
            }
        }
        if let Some(err) = parse_error {
            error!(
                "failed to deserialize the creation of new components from the peer, deleting the partially crafted components"
            );
            for (_, component_id) in &added {
                scene.remove_component(entity_id, *component_id, ChangeOrigin::Disconnected);
            }
            return Err(err);
        }

        if is_server {
            let mut writer = BitWriter::new();
            lattice_serde::write_vle(&mut writer, scene.id());
            lattice_serde::write_vle(&mut writer, ids::to_wire(entity_id));
            lattice_serde::write_vle(&mut writer, added.len() as u32);
            for (sender_component_id, component_id) in &added {
                lattice_serde::write_vle(&mut writer, ids::to_wire(*sender_component_id));
                lattice_serde::write_vle(&mut writer, ids::to_wire(*component_id));
            }
            if let Some(connection) = connections.get_mut(source) {
                connection.send(MessageId::CreateComponentsReply, true, writer.to_bytes());
            }
        }

        for (_, component_id) in &added {
            scene.emit_component_added(entity_id, *component_id, change);
        }
        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            for (_, component_id) in &added {
                state.mark_component_processed(entity_id, *component_id);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_remove_entity(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("missing entity {entity_id} for RemoveEntity message");
            return Ok(());
        }

        scene.remove_entity(entity_id, change);
        self.pump_scene_events(scene, connections);
        // Erase from the sender's state so the delete is not echoed back.
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            state.remove_entity_state(entity_id);
        }
        Ok(())
    }

    pub(crate) fn handle_remove_components(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for RemoveComponents message");
            return Ok(());
        }

        let mut removed: Vec<ComponentId> = Vec::new();
        while reader.bits_left() >= 8 {
            let component_id = read_vle(reader)?;
            if scene.remove_component(entity_id, component_id, change) {
                removed.push(component_id);
            } else {
                warn!(
                    "component {component_id} not found in entity {entity_id} for RemoveComponents message, disregarding"
                );
            }
        }

        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                for component_id in removed {
                    entity_state.remove_component_from_queue(component_id);
                    entity_state.components.remove(&component_id);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn handle_create_attributes(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for CreateAttributes message");
            return Ok(());
        }
        if !self.allow_modify(source, None) {
            return Ok(());
        }

        let mut created: Vec<(ComponentId, u8)> = Vec::new();
        while reader.bits_left() >= 3 * 8 {
            let component_id = read_vle(reader)?;
            if scene
                .entity(entity_id)
                .and_then(|e| e.component(component_id))
                .is_none()
            {
                warn!(
                    "component {component_id} not found in entity {entity_id} for CreateAttributes message, aborting message parsing"
                );
                return Ok(());
            }

            let index = u8::de(reader)?;
            let attr_type_id = u8::de(reader)?;
            let name = String::de(reader)?;

            if is_server {
                // Clients may not overwrite existing attributes.
                let exists = scene
                    .entity(entity_id)
                    .and_then(|e| e.component(component_id))
                    .and_then(|c| c.attribute(index))
                    .is_some();
                if exists {
                    warn!(
                        "client attempted to overwrite existing attribute {index} in component {component_id} of entity {entity_id}, aborting CreateAttributes message parsing"
                    );
                    return Ok(());
                }
            }

            if !scene.create_dynamic_attribute(
                entity_id,
                component_id,
                index,
                attr_type_id,
                &name,
                change,
            ) {
                warn!(
                    "could not create attribute {index} into component {component_id} of entity {entity_id}, aborting CreateAttributes message parsing"
                );
                return Ok(());
            }

            let Some(attribute_type) = AttributeType::from_type_id(attr_type_id) else {
                return Ok(());
            };
            match AttributeValue::from_binary(attribute_type, reader) {
                Ok(value) => {
                    Self::set_attribute_silent(scene, entity_id, component_id, index, value);
                    created.push((component_id, index));
                }
                Err(err) => {
                    error!("failed to deserialize the creation of a new attribute from the peer");
                    scene.remove_attribute(entity_id, component_id, index, ChangeOrigin::Disconnected);
                    return Err(err);
                }
            }
        }

        // Signal the changes after creating and reading all of them.
        for (component_id, index) in &created {
            scene.emit_attribute_changed(entity_id, *component_id, *index, change);
        }
        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                for (component_id, index) in created {
                    if let Some(comp_state) = entity_state.components.get_mut(&component_id) {
                        comp_state.new_and_removed_attributes.remove(&index);
                        comp_state.clear_attribute_dirty(index);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn handle_remove_attributes(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for RemoveAttributes message");
            return Ok(());
        }

        let mut removed: Vec<(ComponentId, u8)> = Vec::new();
        while reader.bits_left() >= 8 {
            let component_id = read_vle(reader)?;
            let index = u8::de(reader)?;
            if scene.remove_attribute(entity_id, component_id, index, change) {
                removed.push((component_id, index));
            } else {
                warn!(
                    "could not remove attribute {index} of component {component_id} in entity {entity_id} for RemoveAttributes message"
                );
            }
        }

        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                for (component_id, index) in removed {
                    if let Some(comp_state) = entity_state.components.get_mut(&component_id) {
                        comp_state.new_and_removed_attributes.remove(&index);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn handle_edit_attributes(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for EditAttributes message");
            return Ok(());
        }

        // Track the peer's send cadence; interpolation runs a little
        // longer than the measured interval to absorb jitter.
        let mut update_interval = self.update_period;
        if let Some(entity_state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
            .and_then(|s| s.entities.get_mut(&entity_id))
        {
            entity_state.refresh_avg_update_interval(self.clock);
            if let Some(avg) = entity_state.avg_update_interval {
                // The measured cadence never shortens the window below one
                // update period.
                update_interval = avg.max(self.update_period);
            }
        }
        update_interval *= 1.25;

        let mut changed: Vec<(ComponentId, u8)> = Vec::new();
        while reader.bits_left() >= 8 {
            let component_id = read_vle(reader)?;
            let payload_len = read_vle(reader)? as usize;
            let payload = reader.read_bytes(payload_len)?;
            let mut attr_reader = BitReader::new(&payload);

            let Some(component) = scene.entity(entity_id).and_then(|e| e.component(component_id))
            else {
                warn!(
                    "component {component_id} not found in entity {entity_id} for EditAttributes message, skipping to next component"
                );
                continue;
            };
            let attr_info: Vec<Option<(AttributeType, bool)>> = component
                .attributes()
                .iter()
                .map(|slot| slot.as_ref().map(|a| (a.attribute_type(), a.interpolated())))
                .collect();

            let bitmask_method = attr_reader.read_bit()?;
            if !bitmask_method {
                // Method 1: indices.
                let count = u8::de(&mut attr_reader)?;
                for _ in 0..count {
                    let index = u8::de(&mut attr_reader)?;
                    if index as usize >= attr_info.len() {
                        warn!("out of bounds attribute index in EditAttributes message, skipping to next component");
                        break;
                    }
                    let Some((attribute_type, interpolated)) = attr_info[index as usize] else {
                        warn!("nonexistent attribute in EditAttributes message, skipping to next component");
                        break;
                    };
                    let value = AttributeValue::from_binary(attribute_type, &mut attr_reader)?;
                    if !is_server && interpolated {
                        scene.start_attribute_interpolation(
                            entity_id,
                            component_id,
                            index,
                            value,
                            update_interval,
                        );
                    } else {
                        Self::set_attribute_silent(scene, entity_id, component_id, index, value);
                        changed.push((component_id, index));
                    }
                }
            } else {
                // Method 2: bitmask. Stop early on component version
                // inconsistency.
                for index in 0..attr_info.len().min(256) {
                    if attr_reader.bits_left() == 0 {
                        break;
                    }
                    if !attr_reader.read_bit()? {
                        continue;
                    }
                    let index = index as u8;
                    let Some((attribute_type, interpolated)) = attr_info[index as usize] else {
                        warn!("nonexistent attribute in EditAttributes message, skipping to next component");
                        break;
                    };
                    let value = AttributeValue::from_binary(attribute_type, &mut attr_reader)?;
                    if !is_server && interpolated {
                        scene.start_attribute_interpolation(
                            entity_id,
                            component_id,
                            index,
                            value,
                            update_interval,
                        );
                    } else {
                        Self::set_attribute_silent(scene, entity_id, component_id, index, value);
                        changed.push((component_id, index));
                    }
                }
            }
        }

        // Signal after reading everything.
        for (component_id, index) in &changed {
            scene.emit_attribute_changed(entity_id, *component_id, *index, change);
        }
        self.pump_scene_events(scene, connections);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                for (component_id, index) in changed {
                    if let Some(comp_state) = entity_state.components.get_mut(&component_id) {
                        comp_state.clear_attribute_dirty(index);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn handle_edit_entity_properties(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;
        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for EditEntityProperties message");
            return Ok(());
        }

        // For now entity properties consist only of the temporary flag.
        let temporary = u8::de(reader)? != 0;
        scene.set_entity_temporary(entity_id, temporary, change);

        self.pump_scene_events(scene, connections);
        if let Some(entity_state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
            .and_then(|s| s.entities.get_mut(&entity_id))
        {
            entity_state.has_property_changes = false;
        }
        Ok(())
    }

    pub(crate) fn handle_set_entity_parent(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        let _scene_id = read_vle(reader)?;
        let mut entity_id = u32::de(reader)?;
        let mut parent_id = u32::de(reader)?;

        if is_server {
            let Some(resolved) =
                self.resolve_unacked(connections, source, entity_id, "SetEntityParent")
            else {
                return Ok(());
            };
            entity_id = resolved;
            if parent_id != 0 {
                let Some(resolved) =
                    self.resolve_unacked(connections, source, parent_id, "SetEntityParent")
                else {
                    return Ok(());
                };
                parent_id = resolved;
            }
        }

        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !self.allow_modify(source, Some(entity_id)) {
            return Ok(());
        }
        if !scene.contains_entity(entity_id) {
            warn!("entity {entity_id} not found for SetEntityParent message");
            return Ok(());
        }
        if parent_id != 0 && !scene.contains_entity(parent_id) {
            warn!("parent entity {parent_id} not found for SetEntityParent message");
            return Ok(());
        }

        let parent = if parent_id != 0 { Some(parent_id) } else { None };
        scene.set_entity_parent(entity_id, parent, change);

        self.pump_scene_events(scene, connections);
        if let Some(entity_state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
            .and_then(|s| s.entities.get_mut(&entity_id))
        {
            entity_state.has_parent_change = false;
        }
        Ok(())
    }

    pub(crate) fn handle_register_component_type(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let change = self.inbound_change_origin();

        if !self.validate_action(connections, source) {
            return Ok(());
        }

        let type_id = read_vle(reader)?;
        let type_name = String::de(reader)?;

        // Remember what the server sent so we never echo it back.
        if !is_server {
            self.component_types_from_server.insert(type_id);
        }

        // A native factory wins; the descriptor is recorded above but
        // otherwise ignored.
        if ComponentTypeRegistry::is_native_name(&type_name) {
            return Ok(());
        }

        let num_attributes = read_vle(reader)?;
        let mut attributes = Vec::with_capacity(num_attributes as usize);
        for _ in 0..num_attributes {
            let attr_type_id = u8::de(reader)?;
            let name = String::de(reader)?;
            attributes.push(AttributeDesc {
                type_id: attr_type_id,
                name,
            });
        }

        self.component_type_sender = Some(source);
        scene.register_placeholder_type(
            ComponentTypeDesc {
                type_id,
                type_name,
                attributes,
            },
            change,
        );
        self.pump_scene_events(scene, connections);
        self.component_type_sender = None;
        Ok(())
    }

    pub(crate) fn handle_entity_action(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let is_server = self.host.is_server();
        let msg = EntityActionMsg::read(reader)?;

        if !self.validate_action(connections, source) {
            return Ok(());
        }
        if !scene.contains_entity(msg.entity_id) {
            warn!(
                "entity {} not found for EntityAction message \"{}\"",
                msg.entity_id, msg.name
            );
            return Ok(());
        }

        let mut handled = false;
        if msg.exec_type.contains(ExecType::LOCAL)
            || (is_server && msg.exec_type.contains(ExecType::SERVER))
        {
            // Execute locally; a plain Local trigger cannot loop back to
            // the network.
            scene.trigger_action(msg.entity_id, &msg.name, msg.params.clone(), ExecType::LOCAL);
            handled = true;
        }

        if is_server && msg.exec_type.contains(ExecType::PEERS) {
            let forward = EntityActionMsg {
                exec_type: ExecType::LOCAL,
                ..msg.clone()
            };
            for connection in connections.iter_mut() {
                if connection.id() == source || !connection.authenticated {
                    continue;
                }
                if let Some(state) = connection.sync_state.as_mut() {
                    state.queued_actions.push(forward.clone());
                }
            }
            handled = true;
        }

        if !handled {
            warn!(
                "received EntityAction message \"{}\" but it went unhandled because of its type {}",
                msg.name,
                msg.exec_type.bits()
            );
        }
        self.pump_scene_events(scene, connections);
        Ok(())
    }

    pub(crate) fn handle_create_entity_reply(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        if self.host.is_server() {
            warn!("discarding CreateEntityReply message on server");
            return Ok(());
        }

        let _scene_id = read_vle(reader)?;
        let sender_entity_id = ids::to_unacked(read_vle(reader)?);
        let entity_id = read_vle(reader)?;

        scene.change_entity_id(sender_entity_id, entity_id);
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            // Move the sync state to the new id, preserving dirty bits.
            state.remove_from_queue(sender_entity_id);
            let mut entity_state = state
                .entities
                .remove(&sender_entity_id)
                .unwrap_or_else(|| EntitySyncState::new(entity_id));
            entity_state.id = entity_id;
            state.entities.insert(entity_id, entity_state);
        }

        if !scene.contains_entity(entity_id) {
            error!("failed to get entity after id change");
            return Ok(());
        }

        let num_components = read_vle(reader)?;
        for _ in 0..num_components {
            let sender_component_id = ids::to_unacked(read_vle(reader)?);
            let component_id = read_vle(reader)?;

            scene.change_component_id(entity_id, sender_component_id, component_id);
            if let Some(entity_state) = connections
                .get_mut(source)
                .and_then(|c| c.sync_state.as_mut())
                .and_then(|s| s.entities.get_mut(&entity_id))
            {
                if let Some(mut comp_state) = entity_state.components.remove(&sender_component_id) {
                    comp_state.id = component_id;
                    entity_state.components.insert(component_id, comp_state);
                }
            }
            scene.emit_component_acked(entity_id, component_id, sender_component_id);
        }

        scene.emit_entity_acked(entity_id, sender_entity_id);

        // Everything edited during the round-trip is resent under the new
        // ids on the next update.
        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            let component_ids: Vec<ComponentId> = state
                .entities
                .get(&entity_id)
                .map(|s| s.components.keys().copied().collect())
                .unwrap_or_default();
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                entity_state.reset_component_queue();
            }
            for component_id in component_ids {
                state.mark_component_dirty(entity_id, component_id);
            }
        }

        self.pump_scene_events(scene, connections);
        Ok(())
    }

    pub(crate) fn handle_create_components_reply(
        &mut self,
        source: ConnectionId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        if self.host.is_server() {
            warn!("discarding CreateComponentsReply message on server");
            return Ok(());
        }

        let _scene_id = read_vle(reader)?;
        let entity_id = read_vle(reader)?;

        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            state.remove_from_queue(entity_id);
        }
        if !scene.contains_entity(entity_id) {
            error!("failed to get entity for CreateComponentsReply");
            return Ok(());
        }

        let num_components = read_vle(reader)?;
        for _ in 0..num_components {
            let sender_component_id = ids::to_unacked(read_vle(reader)?);
            let component_id = read_vle(reader)?;

            scene.change_component_id(entity_id, sender_component_id, component_id);
            if let Some(entity_state) = connections
                .get_mut(source)
                .and_then(|c| c.sync_state.as_mut())
                .and_then(|s| s.entities.get_mut(&entity_id))
            {
                if let Some(mut comp_state) = entity_state.components.remove(&sender_component_id) {
                    comp_state.id = component_id;
                    entity_state.components.insert(component_id, comp_state);
                }
            }
            scene.emit_component_acked(entity_id, component_id, sender_component_id);
        }

        if let Some(state) = connections
            .get_mut(source)
            .and_then(|c| c.sync_state.as_mut())
        {
            let component_ids: Vec<ComponentId> = state
                .entities
                .get(&entity_id)
                .map(|s| s.components.keys().copied().collect())
                .unwrap_or_default();
            if let Some(entity_state) = state.entities.get_mut(&entity_id) {
                entity_state.reset_component_queue();
            }
            for component_id in component_ids {
                state.mark_component_dirty(entity_id, component_id);
            }
        }

        self.pump_scene_events(scene, connections);
        Ok(())
    }
}
