use std::collections::{BTreeMap, VecDeque};

use log::warn;

use crate::{
    ids::{ComponentId, EntityId, UniqueIdGenerator},
    messages::ExecType,
    scene::{
        attribute::AttributeValue,
        component::Component,
        entity::Entity,
        event::{ChangeOrigin, SceneEvent},
        interpolation::AttributeInterpolation,
        registry::{ComponentTypeDesc, ComponentTypeRegistry},
    },
    types::SceneId,
};

/// The replicated scene graph: entities with components with attributes.
///
/// Every mutation takes a [`ChangeOrigin`] and queues a [`SceneEvent`]
/// (except `Disconnected`, which is silent by contract). The sync manager
/// drains the queue; nothing here knows about connections or the wire.
pub struct Scene {
    id: SceneId,
    entities: BTreeMap<EntityId, Entity>,
    registry: ComponentTypeRegistry,
    entity_id_gen: UniqueIdGenerator,
    events: VecDeque<SceneEvent>,
    interpolations: Vec<AttributeInterpolation>,
    interpolating: bool,
}

impl Scene {
    pub fn new(id: SceneId) -> Self {
        Self {
            id,
            entities: BTreeMap::new(),
            registry: ComponentTypeRegistry::new(),
            entity_id_gen: UniqueIdGenerator::new(),
            events: VecDeque::new(),
            interpolations: Vec::new(),
            interpolating: false,
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn registry(&self) -> &ComponentTypeRegistry {
        &self.registry
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn next_free_id(&mut self) -> EntityId {
        loop {
            let id = self.entity_id_gen.next_replicated();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn next_unacked_id(&mut self) -> EntityId {
        loop {
            let id = self.entity_id_gen.next_unacked();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn next_local_id(&mut self) -> EntityId {
        loop {
            let id = self.entity_id_gen.next_local();
            if !self.entities.contains_key(&id) {
                return id;
            }
        }
    }

    fn emit(&mut self, origin: ChangeOrigin, event: SceneEvent) {
        if origin != ChangeOrigin::Disconnected {
            self.events.push_back(event);
        }
    }

    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        self.events.drain(..).collect()
    }

    // Entities

    pub fn create_entity(&mut self, id: EntityId, origin: ChangeOrigin) -> Option<&mut Entity> {
        if self.entities.contains_key(&id) {
            return None;
        }
        self.entities.insert(id, Entity::new(id));
        self.emit(origin, SceneEvent::EntityCreated { entity: id, origin });
        self.entities.get_mut(&id)
    }

    pub fn remove_entity(&mut self, id: EntityId, origin: ChangeOrigin) -> bool {
        if self.entities.remove(&id).is_none() {
            return false;
        }
        self.interpolations
            .retain(|interp| interp.entity != id);
        self.emit(origin, SceneEvent::EntityRemoved { entity: id, origin });
        true
    }

    pub fn set_entity_temporary(&mut self, id: EntityId, temporary: bool, origin: ChangeOrigin) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.is_temporary() == temporary {
            return true;
        }
        entity.set_temporary(temporary);
        self.emit(origin, SceneEvent::EntityPropertiesChanged { entity: id, origin });
        true
    }

    pub fn set_entity_parent(
        &mut self,
        id: EntityId,
        parent: Option<EntityId>,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.parent() == parent {
            return true;
        }
        entity.set_parent(parent);
        self.emit(
            origin,
            SceneEvent::EntityParentChanged {
                entity: id,
                parent,
                origin,
            },
        );
        true
    }

    /// Renames an entity in place; used by id reconciliation. Silent: the
    /// caller emits the acked notification once sync state has moved too.
    pub fn change_entity_id(&mut self, old_id: EntityId, new_id: EntityId) -> bool {
        if self.entities.contains_key(&new_id) {
            return false;
        }
        let Some(mut entity) = self.entities.remove(&old_id) else {
            return false;
        };
        entity.set_id(new_id);
        self.entities.insert(new_id, entity);
        true
    }

    pub fn emit_entity_acked(&mut self, entity: EntityId, old_id: EntityId) {
        self.events.push_back(SceneEvent::EntityAcked { entity, old_id });
    }

    /// Re-emits a creation signal; inbound decoding creates silently first
    /// and signals once the whole entity is coherent.
    pub fn emit_entity_created(&mut self, entity: EntityId, origin: ChangeOrigin) {
        self.emit(origin, SceneEvent::EntityCreated { entity, origin });
    }

    // Components

    /// Adds a component. `id` of `None` allocates from the entity's
    /// replicated range (the server path); clients pass their own unacked
    /// ids explicitly.
    pub fn create_component(
        &mut self,
        entity_id: EntityId,
        id: Option<ComponentId>,
        type_id: u32,
        name: &str,
        origin: ChangeOrigin,
    ) -> Option<ComponentId> {
        let entity = self.entities.get_mut(&entity_id)?;
        let component_id = match id {
            Some(id) => {
                if entity.component(id).is_some() {
                    return None;
                }
                id
            }
            None => entity.next_replicated_component_id(),
        };
        let component = self.registry.instantiate(component_id, type_id, name)?;
        entity.insert_component(component);
        self.emit(
            origin,
            SceneEvent::ComponentAdded {
                entity: entity_id,
                component: component_id,
                origin,
            },
        );
        Some(component_id)
    }

    pub fn remove_component(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return false;
        };
        if entity.remove_component(component_id).is_none() {
            return false;
        }
        self.interpolations
            .retain(|interp| !(interp.entity == entity_id && interp.component == component_id));
        self.emit(
            origin,
            SceneEvent::ComponentRemoved {
                entity: entity_id,
                component: component_id,
                origin,
            },
        );
        true
    }

    pub fn change_component_id(
        &mut self,
        entity_id: EntityId,
        old_id: ComponentId,
        new_id: ComponentId,
    ) -> bool {
        match self.entities.get_mut(&entity_id) {
            Some(entity) => entity.change_component_id(old_id, new_id),
            None => false,
        }
    }

    pub fn emit_component_acked(&mut self, entity: EntityId, component: ComponentId, old_id: ComponentId) {
        self.events.push_back(SceneEvent::ComponentAcked {
            entity,
            component,
            old_id,
        });
    }

    /// Re-emits an added signal for a component decoded with `Disconnected`.
    pub fn emit_component_added(&mut self, entity: EntityId, component: ComponentId, origin: ChangeOrigin) {
        self.emit(
            origin,
            SceneEvent::ComponentAdded {
                entity,
                component,
                origin,
            },
        );
    }

    // Attributes

    pub fn set_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        value: AttributeValue,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(attribute) = self
            .entities
            .get_mut(&entity_id)
            .and_then(|e| e.component_mut(component_id))
            .and_then(|c| c.attribute_mut(index))
        else {
            return false;
        };
        if attribute.value.attribute_type() != value.attribute_type() {
            warn!(
                "type mismatch writing attribute {index} of component {component_id} in entity {entity_id}"
            );
            return false;
        }
        attribute.value = value;
        self.emit(
            origin,
            SceneEvent::AttributeChanged {
                entity: entity_id,
                component: component_id,
                index,
                origin,
            },
        );
        true
    }

    pub fn emit_attribute_changed(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        index: u8,
        origin: ChangeOrigin,
    ) {
        self.emit(
            origin,
            SceneEvent::AttributeChanged {
                entity,
                component,
                index,
                origin,
            },
        );
    }

    pub fn create_dynamic_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        type_id: u8,
        name: &str,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(component) = self
            .entities
            .get_mut(&entity_id)
            .and_then(|e| e.component_mut(component_id))
        else {
            return false;
        };
        if component.create_attribute(index, type_id, name).is_none() {
            return false;
        }
        self.emit(
            origin,
            SceneEvent::AttributeAdded {
                entity: entity_id,
                component: component_id,
                index,
                origin,
            },
        );
        true
    }

    pub fn remove_attribute(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        origin: ChangeOrigin,
    ) -> bool {
        let Some(component) = self
            .entities
            .get_mut(&entity_id)
            .and_then(|e| e.component_mut(component_id))
        else {
            return false;
        };
        if !component.remove_attribute(index) {
            return false;
        }
        self.interpolations.retain(|interp| {
            !(interp.entity == entity_id && interp.component == component_id && interp.index == index)
        });
        self.emit(
            origin,
            SceneEvent::AttributeRemoved {
                entity: entity_id,
                component: component_id,
                index,
                origin,
            },
        );
        true
    }

    // Actions

    pub fn trigger_action(
        &mut self,
        entity_id: EntityId,
        action: &str,
        params: Vec<String>,
        exec_type: ExecType,
    ) {
        self.events.push_back(SceneEvent::ActionTriggered {
            entity: entity_id,
            action: action.to_string(),
            params,
            exec_type,
        });
    }

    // Placeholder component types

    pub fn register_placeholder_type(&mut self, desc: ComponentTypeDesc, origin: ChangeOrigin) {
        let type_id = desc.type_id;
        self.registry.register_placeholder(desc);
        self.emit(
            origin,
            SceneEvent::PlaceholderTypeRegistered { type_id, origin },
        );
    }

    // Attribute interpolation (client side)

    pub fn start_attribute_interpolation(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
        end: AttributeValue,
        length: f32,
    ) -> bool {
        let Some(attribute) = self
            .entities
            .get(&entity_id)
            .and_then(|e| e.component(component_id))
            .and_then(|c| c.attribute(index))
        else {
            return false;
        };
        let start = attribute.value.clone();
        self.end_attribute_interpolation(entity_id, component_id, index);
        self.interpolations.push(AttributeInterpolation {
            entity: entity_id,
            component: component_id,
            index,
            start,
            end,
            time: 0.0,
            length,
        });
        true
    }

    pub fn end_attribute_interpolation(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
    ) -> bool {
        let before = self.interpolations.len();
        self.interpolations.retain(|interp| {
            !(interp.entity == entity_id && interp.component == component_id && interp.index == index)
        });
        before != self.interpolations.len()
    }

    pub fn is_interpolating(&self) -> bool {
        self.interpolating
    }

    /// Advances all attribute interpolations. Values are applied silently;
    /// the blend must not look like a local edit to the sync layer.
    pub fn update_interpolations(&mut self, frametime: f32) {
        self.interpolating = true;
        let mut interpolations = std::mem::take(&mut self.interpolations);
        interpolations.retain_mut(|interp| {
            interp.time += frametime;
            let sample = interp.sample();
            let applied = self
                .entities
                .get_mut(&interp.entity)
                .and_then(|e| e.component_mut(interp.component))
                .and_then(|c| c.attribute_mut(interp.index))
                .map(|attribute| {
                    attribute.value = sample;
                })
                .is_some();
            applied && !interp.finished()
        });
        self.interpolations = interpolations;
        self.interpolating = false;
    }
}
