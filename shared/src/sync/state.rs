use std::collections::{BTreeMap, VecDeque};

use glam::{Quat, Vec3};

use crate::{
    ids::{ComponentId, EntityId},
    messages::EntityActionMsg,
    scene::Transform,
    sync::interpolation::RigidBodyInterpolationState,
};

/// Ceiling for interest-managed update intervals, seconds.
const MAX_UPDATE_INTERVAL: f32 = 5.0;
/// Priority at (and above) which an entity updates every tick.
const FULL_RATE_PRIORITY: f32 = 30.0;

/// Fate of an attribute index queued in `new_and_removed_attributes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeToggle {
    Created,
    Removed,
}

/// Per-connection dirty tracking for one component.
#[derive(Clone, Debug)]
pub struct ComponentSyncState {
    pub id: ComponentId,
    pub is_new: bool,
    pub removed: bool,
    pub is_in_queue: bool,
    /// One bit per attribute index, 256 attributes max.
    pub dirty_attributes: [u8; 32],
    pub new_and_removed_attributes: BTreeMap<u8, AttributeToggle>,
}

impl ComponentSyncState {
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            is_new: true,
            removed: false,
            is_in_queue: false,
            dirty_attributes: [0; 32],
            new_and_removed_attributes: BTreeMap::new(),
        }
    }

    pub fn set_attribute_dirty(&mut self, index: u8) {
        self.dirty_attributes[(index >> 3) as usize] |= 1 << (index & 7);
    }

    pub fn clear_attribute_dirty(&mut self, index: u8) {
        self.dirty_attributes[(index >> 3) as usize] &= !(1 << (index & 7));
    }

    pub fn attribute_dirty(&self, index: u8) -> bool {
        self.dirty_attributes[(index >> 3) as usize] & (1 << (index & 7)) != 0
    }

    pub fn has_dirty_attributes(&self) -> bool {
        self.dirty_attributes.iter().any(|byte| *byte != 0)
    }

    pub(crate) fn clear(&mut self) {
        self.is_new = false;
        self.removed = false;
        self.dirty_attributes = [0; 32];
        self.new_and_removed_attributes.clear();
    }
}

/// Per-connection dirty tracking for one entity, plus the cached last-sent
/// motion state the rigid-body replicator compares against.
pub struct EntitySyncState {
    pub id: EntityId,
    pub is_new: bool,
    pub removed: bool,
    pub has_property_changes: bool,
    pub has_parent_change: bool,
    pub is_in_queue: bool,
    pub components: BTreeMap<ComponentId, ComponentSyncState>,
    dirty_queue: VecDeque<ComponentId>,
    pub last_network_send_time: f64,
    last_receive_time: Option<f64>,
    pub avg_update_interval: Option<f32>,
    pub priority: f32,
    pub transform: Transform,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl EntitySyncState {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            is_new: true,
            removed: false,
            has_property_changes: false,
            has_parent_change: false,
            is_in_queue: false,
            components: BTreeMap::new(),
            dirty_queue: VecDeque::new(),
            last_network_send_time: f64::NEG_INFINITY,
            last_receive_time: None,
            avg_update_interval: None,
            priority: 0.0,
            transform: Transform::default(),
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }

    fn ensure_component(&mut self, component_id: ComponentId) -> &mut ComponentSyncState {
        let state = self
            .components
            .entry(component_id)
            .or_insert_with(|| ComponentSyncState::new(component_id));
        if !state.is_in_queue {
            state.is_in_queue = true;
            self.dirty_queue.push_back(component_id);
        }
        self.components.get_mut(&component_id).unwrap()
    }

    pub fn mark_component_dirty(&mut self, component_id: ComponentId) {
        self.ensure_component(component_id);
    }

    pub fn mark_component_created(&mut self, component_id: ComponentId) {
        self.ensure_component(component_id).is_new = true;
    }

    pub fn mark_component_removed(&mut self, component_id: ComponentId) {
        let state = self.ensure_component(component_id);
        state.removed = true;
        state.is_new = false;
    }

    pub fn mark_attribute_dirty(&mut self, component_id: ComponentId, index: u8) {
        self.ensure_component(component_id).set_attribute_dirty(index);
    }

    pub fn mark_attribute_created(&mut self, component_id: ComponentId, index: u8) {
        self.ensure_component(component_id)
            .new_and_removed_attributes
            .insert(index, AttributeToggle::Created);
    }

    pub fn mark_attribute_removed(&mut self, component_id: ComponentId, index: u8) {
        self.ensure_component(component_id)
            .new_and_removed_attributes
            .insert(index, AttributeToggle::Removed);
    }

    pub fn mark_component_processed(&mut self, component_id: ComponentId) {
        if let Some(state) = self.components.get_mut(&component_id) {
            state.clear();
            if state.is_in_queue {
                state.is_in_queue = false;
                self.dirty_queue.retain(|id| *id != component_id);
            }
        }
    }

    pub fn remove_component_from_queue(&mut self, component_id: ComponentId) {
        if let Some(state) = self.components.get_mut(&component_id) {
            if state.is_in_queue {
                state.is_in_queue = false;
                self.dirty_queue.retain(|id| *id != component_id);
            }
        }
    }

    pub fn pop_dirty_component(&mut self) -> Option<ComponentId> {
        self.dirty_queue.pop_front()
    }

    pub fn has_dirty_components(&self) -> bool {
        !self.dirty_queue.is_empty()
    }

    /// Clears every dirty flag on this entity and its components.
    pub fn clear_processed(&mut self) {
        self.is_new = false;
        self.removed = false;
        self.has_property_changes = false;
        self.has_parent_change = false;
        self.dirty_queue.clear();
        for state in self.components.values_mut() {
            state.clear();
            state.is_in_queue = false;
        }
    }

    /// Empties the component queue without touching dirty bits; used when
    /// component ids are about to be rewritten wholesale.
    pub fn reset_component_queue(&mut self) {
        self.dirty_queue.clear();
        for state in self.components.values_mut() {
            state.is_in_queue = false;
        }
    }

    /// Folds the gap since the previous inbound update into a half-life
    /// moving average of the peer's send interval.
    pub fn refresh_avg_update_interval(&mut self, now: f64) {
        if let Some(last) = self.last_receive_time {
            let gap = (now - last).max(0.0) as f32;
            self.avg_update_interval = Some(match self.avg_update_interval {
                Some(avg) => 0.5 * avg + 0.5 * gap,
                None => gap,
            });
        }
        self.last_receive_time = Some(now);
    }

    /// Minimum gap between updates for this entity under interest
    /// management. Priority only delays updates, never drops them.
    pub fn compute_prioritized_update_interval(&self, update_period: f32) -> f32 {
        if !(self.priority > 0.0) || self.priority.is_infinite() {
            return update_period;
        }
        (FULL_RATE_PRIORITY * update_period / self.priority)
            .clamp(update_period, MAX_UPDATE_INTERVAL)
    }
}

/// Everything one connection knows about what its peer has seen:
/// entity states, the prioritized dirty queue, the peer's observer pose,
/// actions queued behind the next sync pass and rigid-body interpolations.
#[derive(Default)]
pub struct SceneSyncState {
    pub entities: BTreeMap<EntityId, EntitySyncState>,
    dirty_queue: VecDeque<EntityId>,
    pub observer_pos: Vec3,
    pub observer_rot: Quat,
    pub queued_actions: Vec<EntityActionMsg>,
    placeholder_types_sent: bool,
    pub interpolations: BTreeMap<EntityId, RigidBodyInterpolationState>,
}

impl SceneSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.dirty_queue.clear();
        self.queued_actions.clear();
        self.placeholder_types_sent = false;
        self.interpolations.clear();
    }

    fn ensure_entity(&mut self, entity_id: EntityId) -> &mut EntitySyncState {
        let state = self
            .entities
            .entry(entity_id)
            .or_insert_with(|| EntitySyncState::new(entity_id));
        if !state.is_in_queue {
            state.is_in_queue = true;
            self.dirty_queue.push_back(entity_id);
        }
        self.entities.get_mut(&entity_id).unwrap()
    }

    pub fn mark_entity_dirty(
        &mut self,
        entity_id: EntityId,
        property_change: bool,
        parent_change: bool,
    ) {
        let state = self.ensure_entity(entity_id);
        state.has_property_changes |= property_change;
        state.has_parent_change |= parent_change;
    }

    /// Marks a freshly created entity. Returns true when the state was
    /// already queued for removal (the remove-then-recreate toggle).
    pub fn mark_entity_created(&mut self, entity_id: EntityId) -> bool {
        let state = self.ensure_entity(entity_id);
        state.is_new = true;
        state.removed
    }

    pub fn mark_entity_removed(&mut self, entity_id: EntityId) {
        let state = self.ensure_entity(entity_id);
        state.removed = true;
        state.is_new = false;
    }

    pub fn mark_component_dirty(&mut self, entity_id: EntityId, component_id: ComponentId) {
        self.ensure_entity(entity_id).mark_component_dirty(component_id);
    }

    pub fn mark_component_created(&mut self, entity_id: EntityId, component_id: ComponentId) {
        self.ensure_entity(entity_id).mark_component_created(component_id);
    }

    pub fn mark_component_removed(&mut self, entity_id: EntityId, component_id: ComponentId) {
        self.ensure_entity(entity_id).mark_component_removed(component_id);
    }

    pub fn mark_attribute_dirty(&mut self, entity_id: EntityId, component_id: ComponentId, index: u8) {
        self.ensure_entity(entity_id).mark_attribute_dirty(component_id, index);
    }

    pub fn mark_attribute_created(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
    ) {
        self.ensure_entity(entity_id).mark_attribute_created(component_id, index);
    }

    pub fn mark_attribute_removed(
        &mut self,
        entity_id: EntityId,
        component_id: ComponentId,
        index: u8,
    ) {
        self.ensure_entity(entity_id).mark_attribute_removed(component_id, index);
    }

    /// Clears every dirty flag of the entity and its components and
    /// removes it from the queue.
    pub fn mark_entity_processed(&mut self, entity_id: EntityId) {
        let state = self
            .entities
            .entry(entity_id)
            .or_insert_with(|| EntitySyncState::new(entity_id));
        state.clear_processed();
        if state.is_in_queue {
            state.is_in_queue = false;
            self.dirty_queue.retain(|id| *id != entity_id);
        }
    }

    pub fn mark_component_processed(&mut self, entity_id: EntityId, component_id: ComponentId) {
        let state = self
            .entities
            .entry(entity_id)
            .or_insert_with(|| EntitySyncState::new(entity_id));
        if !state.components.contains_key(&component_id) {
            state.components
                .insert(component_id, ComponentSyncState::new(component_id));
        }
        state.mark_component_processed(component_id);
    }

    /// Dequeues without clearing flags; used before dropping or moving an
    /// entity state so the queue holds no stale id.
    pub fn remove_from_queue(&mut self, entity_id: EntityId) {
        if let Some(state) = self.entities.get_mut(&entity_id) {
            if state.is_in_queue {
                state.is_in_queue = false;
                self.dirty_queue.retain(|id| *id != entity_id);
            }
        }
    }

    pub fn remove_entity_state(&mut self, entity_id: EntityId) {
        self.remove_from_queue(entity_id);
        self.entities.remove(&entity_id);
        self.interpolations.remove(&entity_id);
    }

    /// Takes the whole queue for one flush pass. Deferred entities are
    /// pushed back by [`Self::requeue_entity`] and keep their flag set.
    pub fn take_dirty_queue(&mut self) -> VecDeque<EntityId> {
        std::mem::take(&mut self.dirty_queue)
    }

    pub fn requeue_entity(&mut self, entity_id: EntityId) {
        if let Some(state) = self.entities.get_mut(&entity_id) {
            state.is_in_queue = true;
            self.dirty_queue.push_back(entity_id);
        }
    }

    pub fn dirty_queue(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.dirty_queue.iter().copied()
    }

    pub fn dirty_queue_len(&self) -> usize {
        self.dirty_queue.len()
    }

    /// Stable sort of the queue by descending priority.
    pub fn sort_dirty_queue(&mut self) {
        let mut ids: Vec<EntityId> = self.dirty_queue.drain(..).collect();
        ids.sort_by(|a, b| {
            let pa = self.entities.get(a).map(|s| s.priority).unwrap_or(0.0);
            let pb = self.entities.get(b).map(|s| s.priority).unwrap_or(0.0);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });
        self.dirty_queue.extend(ids);
    }

    pub fn needs_placeholder_component_types(&self) -> bool {
        !self.placeholder_types_sent
    }

    pub fn mark_placeholder_component_types_sent(&mut self) {
        self.placeholder_types_sent = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_twice_is_idempotent() {
        let mut state = SceneSyncState::new();
        state.mark_attribute_dirty(7, 2, 4);
        state.mark_attribute_dirty(7, 2, 4);

        assert_eq!(state.dirty_queue_len(), 1);
        let entity = &state.entities[&7];
        assert!(entity.is_in_queue);
        assert_eq!(entity.components.len(), 1);
        assert!(entity.components[&2].attribute_dirty(4));
    }

    #[test]
    fn processed_clears_every_descendant_flag() {
        let mut state = SceneSyncState::new();
        state.mark_attribute_dirty(7, 2, 4);
        state.mark_attribute_created(7, 2, 9);
        state.mark_entity_dirty(7, true, true);

        state.mark_entity_processed(7);
        assert_eq!(state.dirty_queue_len(), 0);
        let entity = &state.entities[&7];
        assert!(!entity.is_in_queue && !entity.is_new && !entity.removed);
        assert!(!entity.has_property_changes && !entity.has_parent_change);
        let comp = &entity.components[&2];
        assert!(!comp.is_in_queue && !comp.is_new);
        assert!(!comp.has_dirty_attributes());
        assert!(comp.new_and_removed_attributes.is_empty());
    }

    #[test]
    fn removal_clears_is_new() {
        let mut state = SceneSyncState::new();
        state.mark_entity_dirty(7, false, false);
        assert!(state.entities[&7].is_new);
        state.mark_entity_removed(7);
        assert!(state.entities[&7].removed);
        assert!(!state.entities[&7].is_new);
    }

    #[test]
    fn recreate_after_removal_sets_both_flags() {
        let mut state = SceneSyncState::new();
        state.mark_entity_removed(7);
        let was_removed = state.mark_entity_created(7);
        assert!(was_removed);
        assert!(state.entities[&7].is_new && state.entities[&7].removed);
    }

    #[test]
    fn dirty_byte_layout_matches_index() {
        let mut comp = ComponentSyncState::new(1);
        comp.set_attribute_dirty(13);
        comp.set_attribute_dirty(14);
        assert_eq!(comp.dirty_attributes[1], (1 << 5) | (1 << 6));
        comp.clear_attribute_dirty(13);
        assert_eq!(comp.dirty_attributes[1], 1 << 6);
    }

    #[test]
    fn priority_scales_interval() {
        let mut state = EntitySyncState::new(1);
        let base = 0.05;
        state.priority = 0.0;
        assert_eq!(state.compute_prioritized_update_interval(base), base);
        state.priority = 60.0;
        assert_eq!(state.compute_prioritized_update_interval(base), base);
        state.priority = 3.0;
        assert!((state.compute_prioritized_update_interval(base) - 0.5).abs() < 1e-6);
        state.priority = 0.001;
        assert_eq!(state.compute_prioritized_update_interval(base), 5.0);
        state.priority = f32::INFINITY;
        assert_eq!(state.compute_prioritized_update_interval(base), base);
    }

    #[test]
    fn avg_update_interval_converges() {
        let mut state = EntitySyncState::new(1);
        state.refresh_avg_update_interval(0.0);
        assert_eq!(state.avg_update_interval, None);
        state.refresh_avg_update_interval(0.1);
        assert!((state.avg_update_interval.unwrap() - 0.1).abs() < 1e-6);
        state.refresh_avg_update_interval(0.3);
        assert!((state.avg_update_interval.unwrap() - 0.15).abs() < 1e-6);
    }
}
