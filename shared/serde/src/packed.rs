//! Quantized encodings for spatial data: fixed-point scalars, unit-sphere
//! directions, magnitude+direction vectors and multi-value arithmetic codes.

use std::f32::consts::PI;

use crate::{bit_reader::BitReader, bit_writer::BitWrite, error::SerdeErr};

/// Bit width of the quantized axis-angle rotation angle.
pub const QUANTIZED_ANGLE_BITS: u32 = 10;

const TWO_PI: f32 = PI * 2.0;

/// Two's-complement fixed point with `int_bits` integer and `frac_bits`
/// fractional bits. The 11.8 layout carries ±1024 at 1/256 resolution.
pub fn write_fixed_point_signed(writer: &mut dyn BitWrite, int_bits: u32, frac_bits: u32, value: f32) {
    let total = int_bits + frac_bits;
    let max = (1i64 << (total - 1)) - 1;
    let min = -(1i64 << (total - 1));
    let scaled = ((value * (1u32 << frac_bits) as f32).round() as i64).clamp(min, max);
    let mask = if total == 32 { u32::MAX } else { (1u32 << total) - 1 };
    writer.write_bits(scaled as u32 & mask, total);
}

pub fn read_fixed_point_signed(
    reader: &mut BitReader,
    int_bits: u32,
    frac_bits: u32,
) -> Result<f32, SerdeErr> {
    let total = int_bits + frac_bits;
    let raw = reader.read_bits(total)?;
    // Sign-extend from `total` bits.
    let shift = 32 - total;
    let signed = ((raw << shift) as i32) >> shift;
    Ok(signed as f32 / (1u32 << frac_bits) as f32)
}

/// Quantizes `value` over `[min, max]` into `bits` bits and writes it.
/// Returns the raw quantized level so callers can branch on zero.
pub fn write_quantized_angle(
    writer: &mut dyn BitWrite,
    min: f32,
    max: f32,
    bits: u32,
    value: f32,
) -> u32 {
    let steps = (1u32 << bits) - 1;
    let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let raw = (t * steps as f32).round() as u32;
    writer.write_bits(raw, bits);
    raw
}

/// Reads a quantized level and returns `(raw, dequantized value)`.
pub fn read_quantized_angle(
    reader: &mut BitReader,
    min: f32,
    max: f32,
    bits: u32,
) -> Result<(u32, f32), SerdeErr> {
    let steps = (1u32 << bits) - 1;
    let raw = reader.read_bits(bits)?;
    Ok((raw, min + raw as f32 * (max - min) / steps as f32))
}

/// Unit 2-D direction as a single quantized heading angle.
pub fn write_normalized_vec2(writer: &mut dyn BitWrite, x: f32, y: f32, bits: u32) {
    let angle = y.atan2(x);
    let steps = 1u32 << bits;
    let raw = (((angle + PI) / TWO_PI) * steps as f32).round() as u32 % steps;
    writer.write_bits(raw, bits);
}

pub fn read_normalized_vec2(reader: &mut BitReader, bits: u32) -> Result<(f32, f32), SerdeErr> {
    let steps = 1u32 << bits;
    let raw = reader.read_bits(bits)?;
    let angle = raw as f32 / steps as f32 * TWO_PI - PI;
    Ok((angle.cos(), angle.sin()))
}

/// Unit 3-D direction as quantized yaw (around +Y, zero at +Z) and pitch.
pub fn write_normalized_vec3(
    writer: &mut dyn BitWrite,
    x: f32,
    y: f32,
    z: f32,
    yaw_bits: u32,
    pitch_bits: u32,
) {
    let len = (x * x + y * y + z * z).sqrt();
    let (x, y, z) = if len > 1e-6 {
        (x / len, y / len, z / len)
    } else {
        (0.0, 0.0, 1.0)
    };

    let yaw = x.atan2(z);
    let yaw_steps = 1u32 << yaw_bits;
    let yaw_raw = (((yaw + PI) / TWO_PI) * yaw_steps as f32).round() as u32 % yaw_steps;
    writer.write_bits(yaw_raw, yaw_bits);

    let pitch = y.clamp(-1.0, 1.0).asin();
    let pitch_steps = (1u32 << pitch_bits) - 1;
    let pitch_raw = (((pitch + PI / 2.0) / PI) * pitch_steps as f32).round() as u32;
    writer.write_bits(pitch_raw, pitch_bits);
}

pub fn read_normalized_vec3(
    reader: &mut BitReader,
    yaw_bits: u32,
    pitch_bits: u32,
) -> Result<(f32, f32, f32), SerdeErr> {
    let yaw_steps = 1u32 << yaw_bits;
    let yaw_raw = reader.read_bits(yaw_bits)?;
    let yaw = yaw_raw as f32 / yaw_steps as f32 * TWO_PI - PI;

    let pitch_steps = (1u32 << pitch_bits) - 1;
    let pitch_raw = reader.read_bits(pitch_bits)?;
    let pitch = pitch_raw as f32 / pitch_steps as f32 * PI - PI / 2.0;

    let y = pitch.sin();
    let r = pitch.cos();
    Ok((r * yaw.sin(), y, r * yaw.cos()))
}

/// Arbitrary 3-D vector as quantized direction plus unsigned fixed-point
/// magnitude. 11/10/3/8 packs into 32 bits, 11/10/10/8 into 39.
pub fn write_vec3_polar(
    writer: &mut dyn BitWrite,
    x: f32,
    y: f32,
    z: f32,
    yaw_bits: u32,
    pitch_bits: u32,
    mag_int_bits: u32,
    mag_frac_bits: u32,
) {
    let mag = (x * x + y * y + z * z).sqrt();
    write_normalized_vec3(writer, x, y, z, yaw_bits, pitch_bits);

    let total = mag_int_bits + mag_frac_bits;
    let max = (1u64 << total) - 1;
    let scaled = ((mag * (1u32 << mag_frac_bits) as f32).round() as u64).min(max);
    writer.write_bits(scaled as u32, total);
}

pub fn read_vec3_polar(
    reader: &mut BitReader,
    yaw_bits: u32,
    pitch_bits: u32,
    mag_int_bits: u32,
    mag_frac_bits: u32,
) -> Result<(f32, f32, f32), SerdeErr> {
    let (dx, dy, dz) = read_normalized_vec3(reader, yaw_bits, pitch_bits)?;
    let raw = reader.read_bits(mag_int_bits + mag_frac_bits)?;
    let mag = raw as f32 / (1u32 << mag_frac_bits) as f32;
    Ok((dx * mag, dy * mag, dz * mag))
}

/// Packs small integers `(value, range)` into one fixed-width field by
/// mixed-radix positional encoding. Eight bits suffice while the product of
/// ranges stays ≤ 256.
pub fn write_arithmetic_encoded(writer: &mut dyn BitWrite, bits: u32, fields: &[(u32, u32)]) {
    let mut acc: u32 = 0;
    let mut capacity: u64 = 1;
    for (value, range) in fields {
        debug_assert!(value < range, "arithmetic field {value} out of range {range}");
        capacity *= *range as u64;
        acc = acc * range + value;
    }
    debug_assert!(capacity <= 1u64 << bits, "arithmetic ranges overflow {bits} bits");
    writer.write_bits(acc, bits);
}

pub fn read_arithmetic_encoded<const N: usize>(
    reader: &mut BitReader,
    bits: u32,
    ranges: [u32; N],
) -> Result<[u32; N], SerdeErr> {
    let mut acc = reader.read_bits(bits)?;
    let mut out = [0u32; N];
    for i in 0..N {
        let divisor: u32 = ranges[i + 1..].iter().product();
        out[i] = acc / divisor;
        acc %= divisor;
    }
    Ok(out)
}
