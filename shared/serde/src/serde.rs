use crate::{
    bit_reader::BitReader,
    bit_writer::BitWrite,
    error::SerdeErr,
    vle::{read_vle, write_vle},
};

/// A value with a canonical bit-stream representation.
pub trait Serde: Sized {
    fn ser(&self, writer: &mut dyn BitWrite);
    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr>;
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bit()
    }
}

impl Serde for u8 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_byte(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_byte()
    }
}

impl Serde for u16 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bits(*self as u32, 16);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(reader.read_bits(16)? as u16)
    }
}

impl Serde for u32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bits(*self, 32);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bits(32)
    }
}

impl Serde for i32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bits(*self as u32, 32);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(reader.read_bits(32)? as i32)
    }
}

impl Serde for f32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bits(self.to_bits(), 32);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(f32::from_bits(reader.read_bits(32)?))
    }
}

/// Writes a string slice as a VLE length prefix plus raw UTF-8 bytes,
/// matching the `String` impl without an intermediate allocation.
pub fn write_str(writer: &mut dyn BitWrite, value: &str) {
    write_vle(writer, value.len() as u32);
    writer.write_bytes(value.as_bytes());
}

/// VLE length prefix followed by raw UTF-8 bytes.
impl Serde for String {
    fn ser(&self, writer: &mut dyn BitWrite) {
        write_vle(writer, self.len() as u32);
        writer.write_bytes(self.as_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let len = read_vle(reader)? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| SerdeErr::BadUtf8)
    }
}
