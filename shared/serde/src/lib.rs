//! # Lattice Serde
//! Bit-level serialization primitives for the lattice wire protocol.
//!
//! Everything here works at single-bit granularity: messages are packed
//! LSB-first into bytes so that sub-byte fields (send-type tuples, attribute
//! bitmasks, quantized rotations) cost exactly what they need.

mod bit_reader;
mod bit_writer;
mod error;
mod packed;
mod serde;
mod vle;

pub use bit_reader::BitReader;
pub use bit_writer::{BitWrite, BitWriter};
pub use error::SerdeErr;
pub use packed::{
    read_arithmetic_encoded, read_fixed_point_signed, read_normalized_vec2, read_normalized_vec3,
    read_quantized_angle, read_vec3_polar, write_arithmetic_encoded, write_fixed_point_signed,
    write_normalized_vec2, write_normalized_vec3, write_quantized_angle, write_vec3_polar,
    QUANTIZED_ANGLE_BITS,
};
pub use serde::{write_str, Serde};
pub use vle::{read_vle, vle_byte_length, write_vle, VLE_MAX};
