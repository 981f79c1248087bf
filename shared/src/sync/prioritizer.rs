use std::collections::BTreeMap;

use glam::{Quat, Vec3};

use crate::{
    ids::EntityId,
    scene::{AttributeValue, Scene, PLACEABLE_TRANSFORM_INDEX, PLACEABLE_TYPE_ID},
    sync::state::EntitySyncState,
};

/// Assigns per-entity sync priorities from an observer pose. Priorities are
/// recomputed on first enqueue and on the priority-update tick, never per
/// outbound frame.
pub trait EntityPrioritizer {
    fn compute_priority(
        &self,
        scene: &Scene,
        state: &mut EntitySyncState,
        observer_pos: Vec3,
        observer_rot: Quat,
    );

    fn compute_sync_priorities(
        &self,
        scene: &Scene,
        states: &mut BTreeMap<EntityId, EntitySyncState>,
        observer_pos: Vec3,
        observer_rot: Quat,
    ) {
        for state in states.values_mut() {
            self.compute_priority(scene, state, observer_pos, observer_rot);
        }
    }
}

/// Distance/facing prioritizer: priority falls off with squared distance,
/// grows with apparent size and halves behind the observer. Entities
/// without a transform always update at full rate.
pub struct DefaultEntityPrioritizer;

impl EntityPrioritizer for DefaultEntityPrioritizer {
    fn compute_priority(
        &self,
        scene: &Scene,
        state: &mut EntitySyncState,
        observer_pos: Vec3,
        observer_rot: Quat,
    ) {
        let transform = scene
            .entity(state.id)
            .and_then(|e| e.component_by_type(PLACEABLE_TYPE_ID))
            .and_then(|c| c.attribute(PLACEABLE_TRANSFORM_INDEX))
            .and_then(|attr| match attr.value {
                AttributeValue::Transform(t) => Some(t),
                _ => None,
            });

        let Some(transform) = transform else {
            state.priority = f32::INFINITY;
            return;
        };

        let offset = transform.pos - observer_pos;
        let dist_sq = offset.length_squared().max(1.0);
        let size = transform.scale.abs().max_element().max(1.0);

        let mut priority = 100.0 * size * size / dist_sq;

        // Behind the observer counts half.
        let forward = observer_rot * Vec3::Z;
        if offset.length_squared() > 0.0 && forward.dot(offset) < 0.0 {
            priority *= 0.5;
        }
        state.priority = priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ChangeOrigin, Transform};

    fn scene_with_entity_at(pos: Vec3) -> (Scene, EntityId) {
        let mut scene = Scene::new(0);
        let id = scene.next_free_id();
        scene.create_entity(id, ChangeOrigin::LocalOnly).unwrap();
        let comp = scene
            .create_component(id, None, PLACEABLE_TYPE_ID, "", ChangeOrigin::LocalOnly)
            .unwrap();
        scene.set_attribute(
            id,
            comp,
            PLACEABLE_TRANSFORM_INDEX,
            AttributeValue::Transform(Transform {
                pos,
                ..Default::default()
            }),
            ChangeOrigin::LocalOnly,
        );
        (scene, id)
    }

    #[test]
    fn near_beats_far() {
        let (near_scene, near_id) = scene_with_entity_at(Vec3::new(0.0, 0.0, 2.0));
        let (far_scene, far_id) = scene_with_entity_at(Vec3::new(0.0, 0.0, 50.0));

        let mut near_state = EntitySyncState::new(near_id);
        let mut far_state = EntitySyncState::new(far_id);
        let prioritizer = DefaultEntityPrioritizer;
        prioritizer.compute_priority(&near_scene, &mut near_state, Vec3::ZERO, Quat::IDENTITY);
        prioritizer.compute_priority(&far_scene, &mut far_state, Vec3::ZERO, Quat::IDENTITY);

        assert!(near_state.priority > far_state.priority);
        assert!(
            near_state.compute_prioritized_update_interval(0.05)
                < far_state.compute_prioritized_update_interval(0.05)
        );
    }

    #[test]
    fn behind_halves_priority() {
        let (scene, id) = scene_with_entity_at(Vec3::new(0.0, 0.0, 10.0));
        let mut front = EntitySyncState::new(id);
        let mut behind = EntitySyncState::new(id);
        let prioritizer = DefaultEntityPrioritizer;
        prioritizer.compute_priority(&scene, &mut front, Vec3::ZERO, Quat::IDENTITY);
        prioritizer.compute_priority(
            &scene,
            &mut behind,
            Vec3::ZERO,
            Quat::from_rotation_y(std::f32::consts::PI),
        );
        assert!((behind.priority - front.priority * 0.5).abs() < 1e-4);
    }

    #[test]
    fn transformless_entities_never_throttle() {
        let mut scene = Scene::new(0);
        let id = scene.next_free_id();
        scene.create_entity(id, ChangeOrigin::LocalOnly).unwrap();
        let mut state = EntitySyncState::new(id);
        DefaultEntityPrioritizer.compute_priority(&scene, &mut state, Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(state.compute_prioritized_update_interval(0.05), 0.05);
    }
}
