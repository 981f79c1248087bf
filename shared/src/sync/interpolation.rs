use glam::{Quat, Vec3};

use crate::{
    ids::EntityId,
    scene::{
        AttributeValue, ChangeOrigin, Scene, Transform, PLACEABLE_TRANSFORM_INDEX,
        PLACEABLE_TYPE_ID, RIGID_BODY_ANGULAR_VELOCITY_INDEX, RIGID_BODY_LINEAR_VELOCITY_INDEX,
        RIGID_BODY_MASS_INDEX, RIGID_BODY_TYPE_ID,
    },
    sync::state::SceneSyncState,
    types::PacketId,
};

/// One endpoint of a rigid-body blend.
#[derive(Clone, Copy, Debug)]
pub struct RigidBodySnapshot {
    pub pos: Vec3,
    pub rot: Quat,
    pub scale: Vec3,
    pub vel: Vec3,
    pub ang_vel: Vec3,
}

impl Default for RigidBodySnapshot {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            rot: Quat::IDENTITY,
            scale: Vec3::ONE,
            vel: Vec3::ZERO,
            ang_vel: Vec3::ZERO,
        }
    }
}

/// Client-side blend state for one entity's motion. Kept after the blend
/// finishes: it stores the most recently received motion data.
#[derive(Clone, Copy, Debug, Default)]
pub struct RigidBodyInterpolationState {
    pub interp_start: RigidBodySnapshot,
    pub interp_end: RigidBodySnapshot,
    /// In units of the update period: [0,1) interpolates, beyond
    /// extrapolates.
    pub interp_time: f32,
    pub last_received_packet_counter: PacketId,
    pub interpolator_active: bool,
    /// Set when local physics was handed the simulation of this body.
    pub client_extrapolating: bool,
}

/// Interpolates from (pos0, vel0) to (pos1, vel1) with a C1 curve
/// (continuous in position and velocity).
pub fn hermite_interpolate(pos0: Vec3, vel0: Vec3, pos1: Vec3, vel1: Vec3, t: f32) -> Vec3 {
    let tt = t * t;
    let ttt = tt * t;
    let h1 = 2.0 * ttt - 3.0 * tt + 1.0;
    let h2 = 1.0 - h1;
    let h3 = ttt - 2.0 * tt + t;
    let h4 = ttt - tt;

    h1 * pos0 + h2 * pos1 + h3 * vel0 + h4 * vel1
}

/// Tangent of the Hermite curve. The differential is w.r.t. curve time
/// t = [0,1], not wall-clock time.
pub fn hermite_derivative(pos0: Vec3, vel0: Vec3, pos1: Vec3, vel1: Vec3, t: f32) -> Vec3 {
    let tt = t * t;
    let h1 = 6.0 * (tt - t);
    let h2 = -h1;
    let h3 = 3.0 * tt - 4.0 * t + 1.0;
    let h4 = 3.0 * tt - 2.0 * t;

    h1 * pos0 + h2 * pos1 + h3 * vel0 + h4 * vel1
}

/// Advances every active rigid-body blend one frame, driving placeable
/// transforms, and hands simulation to local physics once the
/// extrapolation ceiling is reached.
pub(crate) fn interpolate_rigid_bodies(
    frametime: f64,
    state: &mut SceneSyncState,
    scene: &mut Scene,
    update_period: f32,
    max_lin_extrap_time: f32,
    no_client_physics_handoff: bool,
) {
    let entity_ids: Vec<EntityId> = state.interpolations.keys().copied().collect();
    for entity_id in entity_ids {
        let Some(entity) = scene.entity(entity_id) else {
            state.interpolations.remove(&entity_id);
            continue;
        };
        let Some(placeable_id) = entity.component_by_type(PLACEABLE_TYPE_ID).map(|c| c.id())
        else {
            state.interpolations.remove(&entity_id);
            continue;
        };
        let rigid_body = entity.component_by_type(RIGID_BODY_TYPE_ID);
        let rigid_body_id = rigid_body.map(|c| c.id());
        // Bodies without mass are stationary for the physics engine and
        // must never extrapolate.
        let is_newtonian = rigid_body
            .and_then(|c| c.real_at(RIGID_BODY_MASS_INDEX))
            .map(|mass| mass > 0.0)
            .unwrap_or(false);

        let interp = state.interpolations.get_mut(&entity_id).unwrap();
        if !interp.interpolator_active {
            continue;
        }

        let interp_period = update_period;
        interp.interp_time += frametime as f32 / interp_period;

        let pos = if interp.interp_time < 1.0 {
            if is_newtonian {
                hermite_interpolate(
                    interp.interp_start.pos,
                    interp.interp_start.vel * interp_period,
                    interp.interp_end.pos,
                    interp.interp_end.vel * interp_period,
                    interp.interp_time,
                )
            } else {
                hermite_interpolate(
                    interp.interp_start.pos,
                    Vec3::ZERO,
                    interp.interp_end.pos,
                    Vec3::ZERO,
                    interp.interp_time,
                )
            }
        } else if is_newtonian && max_lin_extrap_time > 1.0 {
            interp.interp_end.pos
                + interp.interp_end.vel * (interp.interp_time - 1.0) * interp_period
        } else {
            interp.interp_end.pos
        };

        // Orientation and scale are interpolated only, capped at the end
        // value; they are never extrapolated.
        let t01 = interp.interp_time.clamp(0.0, 1.0);
        let rot = interp.interp_start.rot.slerp(interp.interp_end.rot, t01);
        let scale = interp.interp_start.scale.lerp(interp.interp_end.scale, t01);

        let transform = Transform { pos, rot, scale };
        let reached_ceiling = interp.interp_time >= max_lin_extrap_time;
        let end_vel = interp.interp_end.vel;
        let end_ang_vel = interp.interp_end.ang_vel;
        let cur_vel = interp.interp_start.vel.lerp(interp.interp_end.vel, t01);

        if reached_ceiling {
            interp.interpolator_active = false;
            if rigid_body_id.is_some() && !no_client_physics_handoff {
                let at_rest =
                    end_vel.length_squared() < 1e-4 && end_ang_vel.length_squared() < 1e-4;
                // Local physics takes over only for moving bodies; a
                // stationary body waits for the server to wake it.
                interp.client_extrapolating = !at_rest;
            }
        } else {
            interp.client_extrapolating = false;
        }

        scene.set_attribute(
            entity_id,
            placeable_id,
            PLACEABLE_TRANSFORM_INDEX,
            AttributeValue::Transform(transform),
            ChangeOrigin::LocalOnly,
        );

        if let Some(rb_id) = rigid_body_id {
            if reached_ceiling {
                if !no_client_physics_handoff {
                    // Starting parameters for the local simulation.
                    scene.set_attribute(
                        entity_id,
                        rb_id,
                        RIGID_BODY_LINEAR_VELOCITY_INDEX,
                        AttributeValue::Vec3(end_vel),
                        ChangeOrigin::LocalOnly,
                    );
                    scene.set_attribute(
                        entity_id,
                        rb_id,
                        RIGID_BODY_ANGULAR_VELOCITY_INDEX,
                        AttributeValue::Vec3(end_ang_vel),
                        ChangeOrigin::LocalOnly,
                    );
                }
            } else {
                // Not simulated from these while blending, but colliding
                // local objects should see plausible velocities.
                scene.set_attribute(
                    entity_id,
                    rb_id,
                    RIGID_BODY_LINEAR_VELOCITY_INDEX,
                    AttributeValue::Vec3(cur_vel),
                    ChangeOrigin::LocalOnly,
                );
                scene.set_attribute(
                    entity_id,
                    rb_id,
                    RIGID_BODY_ANGULAR_VELOCITY_INDEX,
                    AttributeValue::Vec3(Vec3::ZERO),
                    ChangeOrigin::LocalOnly,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hermite_hits_endpoints() {
        let p0 = Vec3::new(0.0, 0.0, 0.0);
        let p1 = Vec3::new(1.0, 0.0, 0.0);
        let v = Vec3::new(1.0, 0.0, 0.0);
        assert!((hermite_interpolate(p0, v, p1, v, 0.0) - p0).length() < 1e-6);
        assert!((hermite_interpolate(p0, v, p1, v, 1.0) - p1).length() < 1e-6);
    }

    #[test]
    fn hermite_derivative_matches_endpoint_velocities() {
        let p0 = Vec3::ZERO;
        let p1 = Vec3::new(1.0, 0.0, 0.0);
        let v = Vec3::new(1.0, 0.0, 0.0);
        assert!((hermite_derivative(p0, v, p1, v, 0.0) - v).length() < 1e-6);
        assert!((hermite_derivative(p0, v, p1, v, 1.0) - v).length() < 1e-6);
    }

    #[test]
    fn linear_motion_stays_linear() {
        // p0=(0,0,0) v=(1,0,0), p1=(1,0,0): the Hermite curve with matched
        // velocities over one period is exactly linear.
        let p0 = Vec3::ZERO;
        let p1 = Vec3::new(1.0, 0.0, 0.0);
        let v = Vec3::new(1.0, 0.0, 0.0);
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let pos = hermite_interpolate(p0, v, p1, v, t);
            assert!((pos.x - t).abs() < 1e-5);
            let vel = hermite_derivative(p0, v, p1, v, t);
            assert!((vel - v).length() < 1e-5);
        }
    }
}
