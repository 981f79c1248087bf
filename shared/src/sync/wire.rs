//! Geometry codecs shared by the rigid-body and observer-position paths.

use std::f32::consts::PI;

use glam::{Mat3, Quat, Vec3};

use lattice_serde::{
    read_fixed_point_signed, read_normalized_vec2, read_normalized_vec3, read_quantized_angle,
    write_fixed_point_signed, write_normalized_vec2, write_normalized_vec3, write_quantized_angle,
    BitReader, BitWrite, Serde, SerdeErr, QUANTIZED_ANGLE_BITS,
};

/// 0 - don't send, 1 - fixed point, 2 - full floats.
pub(crate) fn detect_pos_send_type(pos_changed: bool, pos: Vec3) -> u32 {
    if !pos_changed {
        0
    } else if pos.abs().max_element() >= 1023.0 {
        2
    } else {
        1
    }
}

/// 0 - don't send, 1 - yaw only, 2 - yaw+pitch, 3 - full 3 DoF.
pub(crate) fn detect_rot_send_type(rot_changed: bool, rot: &Mat3) -> u32 {
    if !rot_changed {
        return 0;
    }
    let fwd = rot.col(2);
    let up = rot.col(1);
    let plane_normal = Vec3::Y.cross(fwd);
    let d = plane_normal.dot(up);

    if up.dot(Vec3::Y) >= 0.999 {
        1 // Looking upright, 1 DoF.
    } else if d.abs() <= 0.001 && fwd.dot(Vec3::Y).abs() < 0.95 && up.dot(Vec3::Y) > 0.0 {
        // No roll. Only when not looking too close towards +Y (precision)
        // and object up is towards world up.
        2
    } else {
        3
    }
}

/// Builds an orientation whose +Z looks along `forward` with `up` as the
/// up hint.
pub(crate) fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let z = forward.try_normalize().unwrap_or(Vec3::Z);
    let mut x = up.cross(z);
    if x.length_squared() < 1e-8 {
        x = Vec3::Y.cross(z);
        if x.length_squared() < 1e-8 {
            x = Vec3::X;
        }
    }
    let x = x.normalize();
    let y = z.cross(x);
    Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize()
}

/// Axis-angle quantized orientation: 10-bit angle in [0, π], axis as an
/// 11/10-bit direction, omitted when the angle quantizes to zero.
pub(crate) fn write_quantized_quat(writer: &mut dyn BitWrite, q: Quat) {
    let (mut axis, mut angle) = q.normalize().to_axis_angle();
    // Remove the double-cover representation by constraining angle to [0, π].
    if angle >= PI {
        axis = -axis;
        angle = 2.0 * PI - angle;
    }
    let quantized = write_quantized_angle(writer, 0.0, PI, QUANTIZED_ANGLE_BITS, angle);
    if quantized != 0 {
        write_normalized_vec3(writer, axis.x, axis.y, axis.z, 11, 10);
    }
}

pub(crate) fn read_quantized_quat(reader: &mut BitReader) -> Result<Quat, SerdeErr> {
    let (raw, angle) = read_quantized_angle(reader, 0.0, PI, QUANTIZED_ANGLE_BITS)?;
    if raw == 0 {
        return Ok(Quat::IDENTITY);
    }
    let (x, y, z) = read_normalized_vec3(reader, 11, 10)?;
    let axis = Vec3::new(x, y, z).try_normalize().unwrap_or(Vec3::Z);
    Ok(Quat::from_axis_angle(axis, angle))
}

pub(crate) fn write_optimized_pos_rot(
    writer: &mut dyn BitWrite,
    pos_send_type: u32,
    pos: Vec3,
    rot_send_type: u32,
    rot: &Mat3,
) {
    match pos_send_type {
        1 => {
            // Fixed 57 bits.
            write_fixed_point_signed(writer, 11, 8, pos.x);
            write_fixed_point_signed(writer, 11, 8, pos.y);
            write_fixed_point_signed(writer, 11, 8, pos.z);
        }
        2 => {
            // Fixed 96 bits.
            pos.x.ser(writer);
            pos.y.ser(writer);
            pos.z.ser(writer);
        }
        _ => {}
    }

    match rot_send_type {
        1 => {
            // Upright transform: forward has y == 0, send (x,z) as a 2-D
            // direction. Fixed 8 bits.
            let fwd = rot.col(2);
            write_normalized_vec2(writer, fwd.x, fwd.z, 8);
        }
        2 => {
            // Fixed 17 bits.
            let fwd = rot.col(2).try_normalize().unwrap_or(Vec3::Z);
            write_normalized_vec3(writer, fwd.x, fwd.y, fwd.z, 9, 8);
        }
        3 => {
            // 10-31 bits.
            write_quantized_quat(writer, Quat::from_mat3(rot));
        }
        _ => {}
    }
}

pub(crate) fn read_optimized_pos_rot(
    reader: &mut BitReader,
    pos_send_type: u32,
    rot_send_type: u32,
) -> Result<(Option<Vec3>, Option<Quat>), SerdeErr> {
    let pos = match pos_send_type {
        1 => Some(Vec3::new(
            read_fixed_point_signed(reader, 11, 8)?,
            read_fixed_point_signed(reader, 11, 8)?,
            read_fixed_point_signed(reader, 11, 8)?,
        )),
        2 => Some(Vec3::new(
            f32::de(reader)?,
            f32::de(reader)?,
            f32::de(reader)?,
        )),
        _ => None,
    };

    let rot = match rot_send_type {
        1 => {
            let (x, z) = read_normalized_vec2(reader, 8)?;
            Some(look_rotation(Vec3::new(x, 0.0, z), Vec3::Y))
        }
        2 => {
            let (x, y, z) = read_normalized_vec3(reader, 9, 8)?;
            Some(look_rotation(Vec3::new(x, y, z), Vec3::Y))
        }
        3 => Some(read_quantized_quat(reader)?),
        _ => None,
    };

    Ok((pos, rot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_serde::BitWriter;

    #[test]
    fn upright_rotation_is_type_1_and_8_bits() {
        let rot = Mat3::from_quat(Quat::from_rotation_y(0.7));
        assert_eq!(detect_rot_send_type(true, &rot), 1);

        let mut writer = BitWriter::new();
        write_optimized_pos_rot(&mut writer, 0, Vec3::ZERO, 1, &rot);
        assert_eq!(writer.bits_written(), 8);
    }

    #[test]
    fn tilted_rotation_is_type_2() {
        let q = Quat::from_rotation_y(0.4) * Quat::from_rotation_x(0.5);
        let rot = Mat3::from_quat(q);
        assert_eq!(detect_rot_send_type(true, &rot), 2);
    }

    #[test]
    fn rolled_rotation_is_type_3() {
        let q = Quat::from_rotation_z(1.0);
        let rot = Mat3::from_quat(q);
        assert_eq!(detect_rot_send_type(true, &rot), 3);
    }

    #[test]
    fn fixed_point_pos_round_trips_within_resolution() {
        let pos = Vec3::new(10.5, -300.25, 1000.0);
        assert_eq!(detect_pos_send_type(true, pos), 1);

        let mut writer = BitWriter::new();
        write_optimized_pos_rot(&mut writer, 1, pos, 0, &Mat3::IDENTITY);
        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        let (out, _) = read_optimized_pos_rot(&mut reader, 1, 0).unwrap();
        let out = out.unwrap();
        for (a, b) in [(out.x, pos.x), (out.y, pos.y), (out.z, pos.z)] {
            assert!((a - b).abs() <= 1.0 / 256.0, "{a} != {b}");
        }
    }

    #[test]
    fn raw_float_pos_is_exact() {
        let pos = Vec3::new(5000.125, -2.5, 123_456.0);
        assert_eq!(detect_pos_send_type(true, pos), 2);

        let mut writer = BitWriter::new();
        write_optimized_pos_rot(&mut writer, 2, pos, 0, &Mat3::IDENTITY);
        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        let (out, _) = read_optimized_pos_rot(&mut reader, 2, 0).unwrap();
        assert_eq!(out.unwrap(), pos);
    }

    #[test]
    fn full_rotation_round_trips_within_quantization() {
        let q = Quat::from_axis_angle(Vec3::new(0.267, 0.535, 0.802).normalize(), 1.3);
        let mut writer = BitWriter::new();
        write_quantized_quat(&mut writer, q);
        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        let out = read_quantized_quat(&mut reader).unwrap();
        // Angle error bounded by the 10-bit quantization plus axis error.
        assert!(q.angle_between(out) <= PI / 1023.0 + 0.01);
    }

    #[test]
    fn identity_rotation_omits_axis() {
        let mut writer = BitWriter::new();
        write_quantized_quat(&mut writer, Quat::IDENTITY);
        assert_eq!(writer.bits_written(), QUANTIZED_ANGLE_BITS);

        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(read_quantized_quat(&mut reader).unwrap(), Quat::IDENTITY);
    }

    #[test]
    fn look_rotation_round_trips_yaw() {
        let yaw = 0.7f32;
        let q = Quat::from_rotation_y(yaw);
        let fwd = Mat3::from_quat(q).col(2);
        let rebuilt = look_rotation(Vec3::new(fwd.x, 0.0, fwd.z), Vec3::Y);
        assert!(q.angle_between(rebuilt) < 1e-3);
    }
}
