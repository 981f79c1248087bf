//! Outbound flush: turns one connection's dirty state into the ordered
//! create/edit/remove message family.

use log::{error, warn};

use lattice_serde::{write_str, write_vle, BitWrite, BitWriter, Serde};

use crate::{
    connection::{Capability, UserConnection},
    ids::{self, EntityId},
    messages::MessageId,
    scene::{Component, Scene, PLACEABLE_TRANSFORM_INDEX, PLACEABLE_TYPE_ID},
    sync::{manager::SyncManager, state::AttributeToggle},
    types::SceneId,
};

/// Component identification, name and the full attribute block, length
/// prefixed so receivers can survive unknown or incompatible components.
pub(crate) fn write_component_full_update(writer: &mut BitWriter, component: &Component) {
    write_vle(writer, ids::to_wire(component.id()));
    write_vle(writer, component.type_id());
    write_str(writer, component.name());

    let mut attr_writer = BitWriter::new();
    // Static attributes in index order.
    let num_static = component.num_static_attributes();
    for index in 0..num_static {
        if let Some(attribute) = component.attribute(index) {
            attribute.value.to_binary(&mut attr_writer);
        }
    }
    // Dynamic attributes carry their own index/type/name; the receiver
    // detects the end of the sequence by EOF.
    for slot in component.attributes().iter().skip(num_static as usize) {
        let Some(attribute) = slot else { continue };
        if !attribute.dynamic {
            continue;
        }
        attribute.index.ser(&mut attr_writer);
        attribute.attribute_type().type_id().ser(&mut attr_writer);
        write_str(&mut attr_writer, &attribute.name);
        attribute.value.to_binary(&mut attr_writer);
    }

    let attr_block = attr_writer.to_bytes();
    write_vle(writer, attr_block.len() as u32);
    writer.write_bytes(&attr_block);
}

/// Prepends scene and entity identification the first time a payload byte
/// lands in one of the per-entity serializers.
fn lazy_header(writer: &mut BitWriter, scene_id: SceneId, entity_id: EntityId) {
    if writer.is_empty() {
        write_vle(writer, scene_id);
        write_vle(writer, ids::to_wire(entity_id));
    }
}

impl SyncManager {
    /// Flushes one connection's generic scene deltas: entity removals and
    /// creations, then per-component removals, creations and attribute
    /// edits, then property/parent changes, then queued entity actions.
    pub(crate) fn process_sync_state(&mut self, connection: &mut UserConnection, scene: &Scene) {
        let Some(mut state) = connection.sync_state.take() else {
            return;
        };
        let scene_id = scene.id();

        // Make registered placeholder component types known to the peer
        // before any entity data that might reference them.
        if connection.supports(Capability::CustomComponents)
            && state.needs_placeholder_component_types()
        {
            for desc in scene.registry().placeholders() {
                if self.host.is_server()
                    || !self.component_types_from_server.contains(&desc.type_id)
                {
                    connection.send(
                        MessageId::RegisterComponentType,
                        true,
                        Self::component_type_payload(desc),
                    );
                }
            }
            state.mark_placeholder_component_types_sent();
        }

        let server_im = self.host.is_server() && self.prioritizer.is_some();

        let mut queue = state.take_dirty_queue();
        for entity_id in queue.drain(..) {
            // Interest management only delays updates; removals are exempt
            // from the gate.
            if server_im {
                if let Some(entity_state) = state.entities.get(&entity_id) {
                    if !entity_state.removed {
                        let since = self.clock - entity_state.last_network_send_time;
                        let interval =
                            entity_state.compute_prioritized_update_interval(self.update_period);
                        if (since as f32) < interval {
                            state.requeue_entity(entity_id);
                            continue;
                        }
                    }
                }
            }

            let Some(mut entity_state) = state.entities.remove(&entity_id) else {
                continue;
            };
            entity_state.is_in_queue = false;

            let entity = scene.entity(entity_id);
            let mut drop_state = false;
            match entity {
                None => {
                    if !entity_state.removed {
                        warn!(
                            "entity {entity_id} has gone missing from the scene without the removal signalled, dropping replication state"
                        );
                    }
                    entity_state.is_new = false;
                    drop_state = true;
                }
                Some(entity) => {
                    // Never send data for local entities, or for unacked
                    // entities after the create.
                    if entity.is_local() || (!entity_state.is_new && entity.is_unacked()) {
                        state.entities.insert(entity_id, entity_state);
                        continue;
                    }
                }
            }

            // Remove entity.
            if entity_state.removed {
                if entity_state.is_new {
                    warn!("entity {entity_id} queued for both deletion and creation");
                    // The delete is sent now; creation is requeued for the
                    // next tick.
                    entity_state.removed = false;
                    drop_state = false;
                } else {
                    drop_state = true;
                }

                let mut writer = BitWriter::new();
                write_vle(&mut writer, scene_id);
                write_vle(&mut writer, ids::to_wire(entity_id));
                connection.send(MessageId::RemoveEntity, true, writer.to_bytes());

                if drop_state {
                    state.interpolations.remove(&entity_id);
                } else {
                    state.entities.insert(entity_id, entity_state);
                    state.requeue_entity(entity_id);
                }
                continue;
            }

            if drop_state {
                state.interpolations.remove(&entity_id);
                continue;
            }
            let Some(entity) = entity else { continue };

            // New entity: one frame carrying every replicated component.
            if entity_state.is_new {
                let mut writer = BitWriter::with_capacity(1024);
                write_vle(&mut writer, scene_id);
                write_vle(&mut writer, ids::to_wire(entity_id));
                // A full byte, not a bit: keeps the component block aligned.
                (entity.is_temporary() as u8).ser(&mut writer);

                if connection.supports(Capability::HierarchicScene) {
                    if entity.parent().is_some_and(ids::is_local) {
                        warn!(
                            "replicated entity {entity_id} is parented to a local entity, cannot replicate parenting over the network"
                        );
                    }
                    // Full 32 bits: the unacked range must be expressible.
                    entity.parent().unwrap_or(0).ser(&mut writer);
                }

                write_vle(&mut writer, entity.num_replicated_components());
                for component in entity.components() {
                    if component.is_replicated() {
                        write_component_full_update(&mut writer, component);
                    }
                }
                connection.send(MessageId::CreateEntity, true, writer.to_bytes());

                entity_state.clear_processed();
                state.entities.insert(entity_id, entity_state);
                continue;
            }

            // Existing entity: up to five serializers, sent in removal →
            // creation → edit order.
            let mut remove_comps = BitWriter::new();
            let mut remove_attrs = BitWriter::new();
            let mut create_comps = BitWriter::new();
            let mut create_attrs = BitWriter::new();
            let mut edit_attrs = BitWriter::new();

            while let Some(component_id) = entity_state.pop_dirty_component() {
                let Some(mut comp_state) = entity_state.components.remove(&component_id) else {
                    continue;
                };
                comp_state.is_in_queue = false;

                let component = entity.component(component_id);
                let mut drop_comp = false;
                match component {
                    None => {
                        if !comp_state.removed {
                            warn!(
                                "component {component_id} of entity {entity_id} has gone missing from the scene without the removal signalled, dropping replication state"
                            );
                        }
                        comp_state.is_new = false;
                        drop_comp = true;
                    }
                    Some(component) => {
                        if component.is_local() || (!comp_state.is_new && component.is_unacked()) {
                            entity_state.components.insert(component_id, comp_state);
                            continue;
                        }
                    }
                }

                if comp_state.removed {
                    drop_comp = true;
                    lazy_header(&mut remove_comps, scene_id, entity_id);
                    write_vle(&mut remove_comps, ids::to_wire(component_id));
                } else if comp_state.is_new {
                    if let Some(component) = component {
                        lazy_header(&mut create_comps, scene_id, entity_id);
                        write_component_full_update(&mut create_comps, component);
                        comp_state.clear();
                    }
                } else if let Some(component) = component {
                    let attributes = component.attributes();

                    let toggles = std::mem::take(&mut comp_state.new_and_removed_attributes);
                    for (index, toggle) in toggles {
                        // The toggle supersedes any pending edit of the
                        // same attribute.
                        comp_state.clear_attribute_dirty(index);
                        match toggle {
                            AttributeToggle::Created => match component.attribute(index) {
                                Some(attribute) if attribute.dynamic => {
                                    lazy_header(&mut create_attrs, scene_id, entity_id);
                                    write_vle(&mut create_attrs, ids::to_wire(component_id));
                                    index.ser(&mut create_attrs);
                                    attribute.attribute_type().type_id().ser(&mut create_attrs);
                                    write_str(&mut create_attrs, &attribute.name);
                                    attribute.value.to_binary(&mut create_attrs);
                                }
                                Some(_) => {
                                    error!(
                                        "attribute creation queued for static index {index} of component {component_id} in entity {entity_id}, discarding"
                                    );
                                }
                                None => {
                                    error!(
                                        "attribute creation queued for nonexistent index {index} of component {component_id} in entity {entity_id}, discarding"
                                    );
                                }
                            },
                            AttributeToggle::Removed => {
                                lazy_header(&mut remove_attrs, scene_id, entity_id);
                                write_vle(&mut remove_attrs, ids::to_wire(component_id));
                                index.ser(&mut remove_attrs);
                            }
                        }
                    }

                    // Remaining dirty bits travel in EditAttributes; these
                    // are the majority of steady-state traffic.
                    let mut changed: Vec<u8> = Vec::new();
                    for index in 0..attributes.len().min(256) {
                        let index = index as u8;
                        if !comp_state.attribute_dirty(index) {
                            continue;
                        }
                        if attributes[index as usize].is_some() {
                            changed.push(index);
                        } else {
                            error!(
                                "attribute change queued for nonexistent index {index} of component {component_id} in entity {entity_id}, discarding"
                            );
                            comp_state.clear_attribute_dirty(index);
                        }
                    }

                    if !changed.is_empty() {
                        let mut send_changes = true;
                        // Peers without the rigid-body fast path would see
                        // every minuscule transform jitter here; apply the
                        // same significance thresholds instead.
                        if !connection.wants_rigid_body_frames()
                            && component.type_id() == PLACEABLE_TYPE_ID
                            && changed == [PLACEABLE_TRANSFORM_INDEX]
                        {
                            if let Some(t) = component.transform_at(PLACEABLE_TRANSFORM_INDEX) {
                                let cached = &entity_state.transform;
                                let pos_changed =
                                    t.pos.distance_squared(cached.pos) > 1e-3;
                                let rot_changed =
                                    (t.rot - cached.rot).length_squared() > 1e-1;
                                let scale_changed =
                                    t.scale.distance_squared(cached.scale) > 1e-3;
                                if !pos_changed && !rot_changed && !scale_changed {
                                    send_changes = false;
                                } else {
                                    entity_state.transform = t;
                                }
                            }
                        }

                        if send_changes {
                            lazy_header(&mut edit_attrs, scene_id, entity_id);
                            write_vle(&mut edit_attrs, ids::to_wire(component_id));

                            // Nested payload, so receivers can skip whole
                            // components they cannot parse.
                            let mut attr_writer = BitWriter::new();
                            let bits_method_1 = changed.len() * 8 + 8;
                            let bits_method_2 = attributes.len();
                            if bits_method_1 <= bits_method_2 {
                                // Method 1: indices.
                                attr_writer.write_bit(false);
                                (changed.len() as u8).ser(&mut attr_writer);
                                for index in &changed {
                                    index.ser(&mut attr_writer);
                                    if let Some(attribute) = component.attribute(*index) {
                                        attribute.value.to_binary(&mut attr_writer);
                                    }
                                }
                            } else {
                                // Method 2: bitmask.
                                attr_writer.write_bit(true);
                                for index in 0..attributes.len().min(256) {
                                    let index = index as u8;
                                    if comp_state.attribute_dirty(index) {
                                        attr_writer.write_bit(true);
                                        if let Some(attribute) = component.attribute(index) {
                                            attribute.value.to_binary(&mut attr_writer);
                                        }
                                    } else {
                                        attr_writer.write_bit(false);
                                    }
                                }
                            }

                            let payload = attr_writer.to_bytes();
                            write_vle(&mut edit_attrs, payload.len() as u32);
                            edit_attrs.write_bytes(&payload);
                        }

                        comp_state.dirty_attributes = [0; 32];
                    }
                }

                if !drop_comp {
                    entity_state.components.insert(component_id, comp_state);
                }
            }

            // Removals precede creations precede edits within one entity.
            for (writer, message_id) in [
                (remove_comps, MessageId::RemoveComponents),
                (remove_attrs, MessageId::RemoveAttributes),
                (create_comps, MessageId::CreateComponents),
                (create_attrs, MessageId::CreateAttributes),
                (edit_attrs, MessageId::EditAttributes),
            ] {
                if !writer.is_empty() {
                    connection.send(message_id, true, writer.to_bytes());
                }
            }

            if entity_state.has_property_changes {
                let mut writer = BitWriter::new();
                write_vle(&mut writer, scene_id);
                write_vle(&mut writer, ids::to_wire(entity_id));
                (entity.is_temporary() as u8).ser(&mut writer);
                connection.send(MessageId::EditEntityProperties, true, writer.to_bytes());
            }
            if entity_state.has_parent_change && connection.supports(Capability::HierarchicScene) {
                let mut writer = BitWriter::new();
                write_vle(&mut writer, scene_id);
                entity_id.ser(&mut writer);
                entity.parent().unwrap_or(0).ser(&mut writer);
                connection.send(MessageId::SetEntityParent, true, writer.to_bytes());
            }

            entity_state.clear_processed();
            state.entities.insert(entity_id, entity_state);
        }

        // Queued entity actions go out after the sync pass, unthrottled.
        for action in state.queued_actions.drain(..) {
            connection.send(MessageId::EntityAction, true, action.write());
        }

        connection.sync_state = Some(state);
    }
}
