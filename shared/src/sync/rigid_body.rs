//! The rigid-body fast path: predictive compression of position,
//! orientation and velocity for physics-driven motion, sent unreliable and
//! corrected by the next update.

use glam::{EulerRot, Mat3, Quat, Vec3};

use lattice_serde::{
    read_arithmetic_encoded, read_vec3_polar, read_vle, write_arithmetic_encoded, write_vec3_polar,
    write_vle, BitReader, BitWriter, Serde, SerdeErr,
};

use crate::{
    connection::{ConnectionKind, ConnectionRegistry, UserConnection},
    ids::{ComponentId, EntityId},
    messages::MessageId,
    scene::{
        AttributeValue, ChangeOrigin, Scene, Transform, PLACEABLE_TRANSFORM_INDEX,
        PLACEABLE_TYPE_ID, RIGID_BODY_ANGULAR_VELOCITY_INDEX, RIGID_BODY_LINEAR_VELOCITY_INDEX,
        RIGID_BODY_MASS_INDEX, RIGID_BODY_TYPE_ID,
    },
    sync::{
        interpolation::{hermite_derivative, RigidBodyInterpolationState},
        manager::SyncManager,
        wire,
    },
    types::{ConnectionId, PacketId},
    wrapping_number::sequence_greater_than,
};

const MAX_MESSAGE_SIZE_BYTES: u32 = 1400;
/// A single rigid-body record takes at most this many bits (conservative).
const MAX_RIGID_BODY_RECORD_BITS: u32 = 350;

fn angular_velocity_to_quat(deg: Vec3) -> Quat {
    let rad = deg * (std::f32::consts::PI / 180.0);
    Quat::from_euler(EulerRot::ZYX, rad.z, rad.y, rad.x)
}

fn quat_to_angular_velocity(q: Quat) -> Vec3 {
    let (z, y, x) = q.to_euler(EulerRot::ZYX);
    Vec3::new(x, y, z) * (180.0 / std::f32::consts::PI)
}

impl SyncManager {
    /// Emits packed motion deltas for every dirty placeable/rigid-body
    /// pair, clearing their dirty bits so the generic pass does not
    /// double-send. Frames fill up to a conservative bound, then roll over.
    pub(crate) fn replicate_rigid_body_changes(
        &mut self,
        connection: &mut UserConnection,
        scene: &Scene,
    ) {
        let Some(mut state) = connection.sync_state.take() else {
            return;
        };

        let mut writer = BitWriter::with_capacity(MAX_MESSAGE_SIZE_BYTES as usize);
        let mut reliable = false;

        let queued: Vec<EntityId> = state.dirty_queue().collect();
        for entity_id in queued {
            if MAX_MESSAGE_SIZE_BYTES * 8 - writer.bits_written() <= MAX_RIGID_BODY_RECORD_BITS {
                let full = std::mem::replace(
                    &mut writer,
                    BitWriter::with_capacity(MAX_MESSAGE_SIZE_BYTES as usize),
                );
                connection.send(MessageId::RigidBodyUpdate, reliable, full.to_bytes());
                reliable = false;
            }

            let Some(entity_state) = state.entities.get_mut(&entity_id) else {
                continue;
            };
            // Created and removed entities go through the generic path.
            if entity_state.is_new || entity_state.removed {
                continue;
            }
            let Some(entity) = scene.entity(entity_id) else {
                continue;
            };
            let Some(placeable) = entity.component_by_type(PLACEABLE_TYPE_ID) else {
                continue;
            };

            let mut transform_dirty = false;
            if let Some(comp_state) = entity_state.components.get_mut(&placeable.id()) {
                if !comp_state.is_new && !comp_state.removed {
                    transform_dirty = comp_state.attribute_dirty(PLACEABLE_TRANSFORM_INDEX);
                    comp_state.clear_attribute_dirty(PLACEABLE_TRANSFORM_INDEX);
                }
            }

            let rigid_body = entity.component_by_type(RIGID_BODY_TYPE_ID);
            let linear_vel = rigid_body
                .and_then(|c| c.vec3_at(RIGID_BODY_LINEAR_VELOCITY_INDEX))
                .unwrap_or(Vec3::ZERO);
            let angular_vel = rigid_body
                .and_then(|c| c.vec3_at(RIGID_BODY_ANGULAR_VELOCITY_INDEX))
                .unwrap_or(Vec3::ZERO);

            let mut velocity_dirty = false;
            let mut ang_velocity_dirty = false;
            if let Some(rigid_body) = rigid_body {
                if let Some(comp_state) = entity_state.components.get_mut(&rigid_body.id()) {
                    if !comp_state.is_new && !comp_state.removed {
                        velocity_dirty =
                            comp_state.attribute_dirty(RIGID_BODY_LINEAR_VELOCITY_INDEX);
                        ang_velocity_dirty =
                            comp_state.attribute_dirty(RIGID_BODY_ANGULAR_VELOCITY_INDEX);
                        comp_state.clear_attribute_dirty(RIGID_BODY_LINEAR_VELOCITY_INDEX);
                        comp_state.clear_attribute_dirty(RIGID_BODY_ANGULAR_VELOCITY_INDEX);

                        velocity_dirty = velocity_dirty
                            && linear_vel.distance_squared(entity_state.linear_velocity) >= 1e-2;
                        ang_velocity_dirty = ang_velocity_dirty
                            && angular_vel.distance_squared(entity_state.angular_velocity) >= 1e-1;

                        // A body entering rest must reach the peer reliably
                        // or it will extrapolate away indefinitely.
                        if linear_vel.length_squared() < 1e-4
                            && entity_state.linear_velocity.length_squared() >= 1e-4
                        {
                            velocity_dirty = true;
                            reliable = true;
                        }
                        if angular_vel.length_squared() < 1e-4
                            && entity_state.angular_velocity.length_squared() >= 1e-4
                        {
                            ang_velocity_dirty = true;
                            reliable = true;
                        }
                    }
                }
            }

            if !transform_dirty && !velocity_dirty && !ang_velocity_dirty {
                continue;
            }

            let since_last_send = (self.clock - entity_state.last_network_send_time) as f32;
            if self.prioritizer.is_some()
                && since_last_send
                    < entity_state.compute_prioritized_update_interval(self.update_period)
            {
                continue;
            }

            let Some(t) = placeable.transform_at(PLACEABLE_TRANSFORM_INDEX) else {
                continue;
            };

            let cached = &entity_state.transform;
            let pos_changed = transform_dirty && t.pos.distance_squared(cached.pos) > 1e-3;
            let rot_changed =
                transform_dirty && (t.rot - cached.rot).length_squared() > 1e-1;
            let scale_changed = transform_dirty && t.scale.distance_squared(cached.scale) > 1e-3;

            // Compact or full states per field.
            let pos_send_type = wire::detect_pos_send_type(pos_changed, t.pos);
            let rot3 = Mat3::from_quat(t.rot);
            let rot_send_type = wire::detect_rot_send_type(rot_changed, &rot3);
            let scale_send_type = if scale_changed {
                let s = t.scale.abs();
                // Uniform scale only?
                if s.max_element() - s.min_element() <= 1e-3 {
                    1
                } else {
                    2
                }
            } else {
                0
            };
            let vel_send_type = if velocity_dirty {
                if linear_vel.length_squared() >= 64.0 {
                    2
                } else {
                    1
                }
            } else {
                0
            };
            let ang_vel_send_type = u32::from(ang_velocity_dirty);

            if pos_send_type == 0
                && rot_send_type == 0
                && scale_send_type == 0
                && vel_send_type == 0
                && ang_vel_send_type == 0
            {
                continue;
            }

            write_vle(&mut writer, entity_id);
            write_arithmetic_encoded(
                &mut writer,
                8,
                &[
                    (pos_send_type, 3),
                    (rot_send_type, 4),
                    (scale_send_type, 3),
                    (vel_send_type, 3),
                    (ang_vel_send_type, 2),
                ],
            );
            wire::write_optimized_pos_rot(&mut writer, pos_send_type, t.pos, rot_send_type, &rot3);

            if scale_send_type == 1 {
                t.scale.x.ser(&mut writer);
            } else if scale_send_type == 2 {
                t.scale.x.ser(&mut writer);
                t.scale.y.ser(&mut writer);
                t.scale.z.ser(&mut writer);
            }

            if vel_send_type == 1 {
                // Fixed 32 bits.
                write_vec3_polar(&mut writer, linear_vel.x, linear_vel.y, linear_vel.z, 11, 10, 3, 8);
                entity_state.linear_velocity = linear_vel;
            } else if vel_send_type == 2 {
                // Fixed 39 bits, for speeds of 8 and beyond.
                write_vec3_polar(&mut writer, linear_vel.x, linear_vel.y, linear_vel.z, 11, 10, 10, 8);
                entity_state.linear_velocity = linear_vel;
            }

            if ang_vel_send_type == 1 {
                wire::write_quantized_quat(&mut writer, angular_velocity_to_quat(angular_vel));
                entity_state.angular_velocity = angular_vel;
            }

            if pos_send_type != 0 {
                entity_state.transform.pos = t.pos;
            }
            if rot_send_type != 0 {
                entity_state.transform.rot = t.rot;
            }
            if scale_send_type != 0 {
                entity_state.transform.scale = t.scale;
            }
            entity_state.last_network_send_time = self.clock;
        }

        if !writer.is_empty() {
            connection.send(MessageId::RigidBodyUpdate, reliable, writer.to_bytes());
        }

        connection.sync_state = Some(state);
    }

    /// Decodes a rigid-body frame. Servers apply the motion to the scene
    /// (tagged `Replicate`, echo-suppressed toward the sender); clients
    /// feed the interpolator instead of writing transforms directly.
    pub(crate) fn handle_rigid_body_update(
        &mut self,
        source: ConnectionId,
        packet_id: PacketId,
        reader: &mut BitReader,
        scene: &mut Scene,
        connections: &mut ConnectionRegistry,
    ) -> Result<(), SerdeErr> {
        let Some(source_kind) = connections.get(source).map(|c| c.kind()) else {
            return Ok(());
        };
        let is_server = self.host.is_server();

        struct AppliedRecord {
            entity: EntityId,
            placeable: ComponentId,
            rigid_body: Option<ComponentId>,
            transform: Option<Transform>,
            linear_vel: Option<Vec3>,
            angular_vel: Option<Vec3>,
        }
        let mut applied: Vec<AppliedRecord> = Vec::new();

        while reader.bits_left() >= 9 {
            let entity_id = read_vle(reader)?;
            let [pos_send_type, rot_send_type, scale_send_type, vel_send_type, ang_vel_send_type] =
                read_arithmetic_encoded(reader, 8, [3, 4, 3, 3, 2])?;

            let (pos, rot) = wire::read_optimized_pos_rot(reader, pos_send_type, rot_send_type)?;
            let scale = match scale_send_type {
                1 => Some(Vec3::splat(f32::de(reader)?)),
                2 => Some(Vec3::new(f32::de(reader)?, f32::de(reader)?, f32::de(reader)?)),
                _ => None,
            };
            let linear_vel = match vel_send_type {
                1 => {
                    let (x, y, z) = read_vec3_polar(reader, 11, 10, 3, 8)?;
                    Some(Vec3::new(x, y, z))
                }
                2 => {
                    let (x, y, z) = read_vec3_polar(reader, 11, 10, 10, 8)?;
                    Some(Vec3::new(x, y, z))
                }
                _ => None,
            };
            let angular_vel = if ang_vel_send_type == 1 {
                Some(quat_to_angular_velocity(wire::read_quantized_quat(reader)?))
            } else {
                None
            };

            // All payload bits are consumed; a missing entity discards
            // only this record.
            let Some(entity) = scene.entity(entity_id) else {
                continue;
            };
            if pos.is_none()
                && rot.is_none()
                && scale.is_none()
                && linear_vel.is_none()
                && angular_vel.is_none()
            {
                continue;
            }
            let Some(placeable) = entity.component_by_type(PLACEABLE_TYPE_ID) else {
                continue;
            };
            let placeable_id = placeable.id();
            let orig = placeable
                .transform_at(PLACEABLE_TRANSFORM_INDEX)
                .unwrap_or_default();
            let rigid_body = entity.component_by_type(RIGID_BODY_TYPE_ID);
            let rigid_body_id = rigid_body.map(|c| c.id());
            let body_linear_vel = rigid_body
                .and_then(|c| c.vec3_at(RIGID_BODY_LINEAR_VELOCITY_INDEX))
                .unwrap_or(Vec3::ZERO);
            let body_angular_vel = rigid_body
                .and_then(|c| c.vec3_at(RIGID_BODY_ANGULAR_VELOCITY_INDEX))
                .unwrap_or(Vec3::ZERO);
            let is_newtonian = rigid_body
                .and_then(|c| c.real_at(RIGID_BODY_MASS_INDEX))
                .map(|mass| mass > 0.0)
                .unwrap_or(false);

            if is_server {
                let transform = if pos.is_some() || rot.is_some() || scale.is_some() {
                    let t = Transform {
                        pos: pos.unwrap_or(orig.pos),
                        rot: rot.unwrap_or(orig.rot),
                        scale: scale.unwrap_or(orig.scale),
                    };
                    scene.set_attribute(
                        entity_id,
                        placeable_id,
                        PLACEABLE_TRANSFORM_INDEX,
                        AttributeValue::Transform(t),
                        ChangeOrigin::Replicate,
                    );
                    Some(t)
                } else {
                    None
                };
                if let (Some(v), Some(rb_id)) = (linear_vel, rigid_body_id) {
                    scene.set_attribute(
                        entity_id,
                        rb_id,
                        RIGID_BODY_LINEAR_VELOCITY_INDEX,
                        AttributeValue::Vec3(v),
                        ChangeOrigin::Replicate,
                    );
                }
                if let (Some(v), Some(rb_id)) = (angular_vel, rigid_body_id) {
                    scene.set_attribute(
                        entity_id,
                        rb_id,
                        RIGID_BODY_ANGULAR_VELOCITY_INDEX,
                        AttributeValue::Vec3(v),
                        ChangeOrigin::Replicate,
                    );
                }
                applied.push(AppliedRecord {
                    entity: entity_id,
                    placeable: placeable_id,
                    rigid_body: rigid_body_id,
                    transform,
                    linear_vel,
                    angular_vel,
                });
                continue;
            }

            // Client: open or update the interpolation state.
            let Some(state) = connections
                .get_mut(source)
                .and_then(|c| c.sync_state.as_mut())
            else {
                continue;
            };

            // An omitted velocity keeps interpolating toward the last
            // received one.
            let mut new_linear_vel = body_linear_vel;
            if let Some(interp) = state.interpolations.get(&entity_id) {
                new_linear_vel = interp.interp_end.vel;
            }
            if let Some(v) = linear_vel {
                new_linear_vel = v;
            }
            let new_angular_vel = angular_vel.unwrap_or(body_angular_vel);

            match state.interpolations.get_mut(&entity_id) {
                Some(interp) => {
                    if source_kind == ConnectionKind::Datagram
                        && sequence_greater_than(interp.last_received_packet_counter, packet_id)
                    {
                        // Out-of-order datagram; latest data wins.
                        continue;
                    }
                    interp.last_received_packet_counter = packet_id;

                    // Resample the start from the live curve so the blend
                    // stays C1 continuous across updates.
                    let period = self.update_period;
                    let cur_vel = if interp.interp_time < 1.0 {
                        hermite_derivative(
                            interp.interp_start.pos,
                            interp.interp_start.vel * period,
                            interp.interp_end.pos,
                            interp.interp_end.vel * period,
                            interp.interp_time,
                        ) / period
                    } else {
                        interp.interp_end.vel
                    };

                    interp.interp_start.pos = orig.pos;
                    interp.interp_start.rot = orig.rot;
                    interp.interp_start.scale = orig.scale;
                    interp.interp_start.vel = cur_vel;
                    interp.interp_start.ang_vel = Vec3::ZERO;
                    if let Some(p) = pos {
                        interp.interp_end.pos = p;
                    }
                    if let Some(r) = rot {
                        interp.interp_end.rot = r;
                    }
                    if let Some(s) = scale {
                        interp.interp_end.scale = s;
                    }
                    if linear_vel.is_some() {
                        interp.interp_end.vel = new_linear_vel;
                    }
                    if angular_vel.is_some() {
                        interp.interp_end.ang_vel = new_angular_vel;
                    }
                    interp.interp_time = 0.0;
                    interp.interpolator_active = true;

                    if !is_newtonian {
                        interp.interp_start.vel = Vec3::ZERO;
                        interp.interp_end.vel = Vec3::ZERO;
                    }
                }
                None => {
                    let mut interp = RigidBodyInterpolationState {
                        interp_time: 0.0,
                        last_received_packet_counter: packet_id,
                        interpolator_active: true,
                        client_extrapolating: false,
                        ..Default::default()
                    };
                    interp.interp_start.pos = orig.pos;
                    interp.interp_start.rot = orig.rot;
                    interp.interp_start.scale = orig.scale;
                    interp.interp_start.vel = body_linear_vel;
                    interp.interp_start.ang_vel = body_angular_vel;
                    interp.interp_end.pos = pos.unwrap_or(orig.pos);
                    interp.interp_end.rot = rot.unwrap_or(orig.rot);
                    interp.interp_end.scale = scale.unwrap_or(orig.scale);
                    interp.interp_end.vel = new_linear_vel;
                    interp.interp_end.ang_vel = new_angular_vel;
                    state.interpolations.insert(entity_id, interp);
                }
            }
        }

        if is_server && !applied.is_empty() {
            self.pump_scene_events(scene, connections);
            // Do not echo the motion back to its sender, and fold the
            // received values into the cached last-sent state.
            if let Some(state) = connections
                .get_mut(source)
                .and_then(|c| c.sync_state.as_mut())
            {
                for record in applied {
                    let Some(entity_state) = state.entities.get_mut(&record.entity) else {
                        continue;
                    };
                    if let Some(t) = record.transform {
                        if let Some(cs) = entity_state.components.get_mut(&record.placeable) {
                            cs.clear_attribute_dirty(PLACEABLE_TRANSFORM_INDEX);
                        }
                        entity_state.transform = t;
                    }
                    if let Some(rb_id) = record.rigid_body {
                        if let Some(cs) = entity_state.components.get_mut(&rb_id) {
                            if record.linear_vel.is_some() {
                                cs.clear_attribute_dirty(RIGID_BODY_LINEAR_VELOCITY_INDEX);
                            }
                            if record.angular_vel.is_some() {
                                cs.clear_attribute_dirty(RIGID_BODY_ANGULAR_VELOCITY_INDEX);
                            }
                        }
                        if let Some(v) = record.linear_vel {
                            entity_state.linear_velocity = v;
                        }
                        if let Some(v) = record.angular_vel {
                            entity_state.angular_velocity = v;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
