use glam::{Quat, Vec3};

use lattice_serde::{BitReader, BitWrite, SerdeErr, Serde};

use crate::ids::EntityId;

/// Wire tag for an attribute's type. Every value occupies at least eight
/// bits on the wire, which is what lets decoders detect trailing dynamic
/// attribute records by EOF.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    Bool = 1,
    Int = 2,
    Real = 3,
    Str = 4,
    Vec3 = 5,
    Quat = 6,
    Transform = 7,
    EntityRef = 8,
}

impl AttributeType {
    pub fn from_type_id(type_id: u8) -> Option<Self> {
        match type_id {
            1 => Some(Self::Bool),
            2 => Some(Self::Int),
            3 => Some(Self::Real),
            4 => Some(Self::Str),
            5 => Some(Self::Vec3),
            6 => Some(Self::Quat),
            7 => Some(Self::Transform),
            8 => Some(Self::EntityRef),
            _ => None,
        }
    }

    pub fn type_id(self) -> u8 {
        self as u8
    }
}

/// Position, orientation and scale of a placeable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            rot: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
    Real(f32),
    Str(String),
    Vec3(Vec3),
    Quat(Quat),
    Transform(Transform),
    EntityRef(EntityId),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Bool(_) => AttributeType::Bool,
            Self::Int(_) => AttributeType::Int,
            Self::Real(_) => AttributeType::Real,
            Self::Str(_) => AttributeType::Str,
            Self::Vec3(_) => AttributeType::Vec3,
            Self::Quat(_) => AttributeType::Quat,
            Self::Transform(_) => AttributeType::Transform,
            Self::EntityRef(_) => AttributeType::EntityRef,
        }
    }

    pub fn default_for(attribute_type: AttributeType) -> Self {
        match attribute_type {
            AttributeType::Bool => Self::Bool(false),
            AttributeType::Int => Self::Int(0),
            AttributeType::Real => Self::Real(0.0),
            AttributeType::Str => Self::Str(String::new()),
            AttributeType::Vec3 => Self::Vec3(Vec3::ZERO),
            AttributeType::Quat => Self::Quat(Quat::IDENTITY),
            AttributeType::Transform => Self::Transform(Transform::default()),
            AttributeType::EntityRef => Self::EntityRef(0),
        }
    }

    pub fn to_binary(&self, writer: &mut dyn BitWrite) {
        match self {
            Self::Bool(v) => (*v as u8).ser(writer),
            Self::Int(v) => v.ser(writer),
            Self::Real(v) => v.ser(writer),
            Self::Str(v) => v.ser(writer),
            Self::Vec3(v) => {
                v.x.ser(writer);
                v.y.ser(writer);
                v.z.ser(writer);
            }
            Self::Quat(v) => {
                v.x.ser(writer);
                v.y.ser(writer);
                v.z.ser(writer);
                v.w.ser(writer);
            }
            Self::Transform(t) => {
                Self::Vec3(t.pos).to_binary(writer);
                Self::Quat(t.rot).to_binary(writer);
                Self::Vec3(t.scale).to_binary(writer);
            }
            Self::EntityRef(v) => v.ser(writer),
        }
    }

    pub fn from_binary(
        attribute_type: AttributeType,
        reader: &mut BitReader,
    ) -> Result<Self, SerdeErr> {
        Ok(match attribute_type {
            AttributeType::Bool => Self::Bool(u8::de(reader)? != 0),
            AttributeType::Int => Self::Int(i32::de(reader)?),
            AttributeType::Real => Self::Real(f32::de(reader)?),
            AttributeType::Str => Self::Str(String::de(reader)?),
            AttributeType::Vec3 => Self::Vec3(Vec3::new(
                f32::de(reader)?,
                f32::de(reader)?,
                f32::de(reader)?,
            )),
            AttributeType::Quat => Self::Quat(Quat::from_xyzw(
                f32::de(reader)?,
                f32::de(reader)?,
                f32::de(reader)?,
                f32::de(reader)?,
            )),
            AttributeType::Transform => {
                let Self::Vec3(pos) = Self::from_binary(AttributeType::Vec3, reader)? else {
                    unreachable!()
                };
                let Self::Quat(rot) = Self::from_binary(AttributeType::Quat, reader)? else {
                    unreachable!()
                };
                let Self::Vec3(scale) = Self::from_binary(AttributeType::Vec3, reader)? else {
                    unreachable!()
                };
                Self::Transform(Transform { pos, rot, scale })
            }
            AttributeType::EntityRef => Self::EntityRef(u32::de(reader)?),
        })
    }

    /// Blends toward `end` for the attribute-interpolation path. Types with
    /// no meaningful blend snap to the end value once `t` reaches 1.
    pub fn lerp_toward(&self, end: &AttributeValue, t: f32) -> AttributeValue {
        let t = t.clamp(0.0, 1.0);
        match (self, end) {
            (Self::Real(a), Self::Real(b)) => Self::Real(a + (b - a) * t),
            (Self::Vec3(a), Self::Vec3(b)) => Self::Vec3(a.lerp(*b, t)),
            (Self::Quat(a), Self::Quat(b)) => Self::Quat(a.slerp(*b, t)),
            (Self::Transform(a), Self::Transform(b)) => Self::Transform(Transform {
                pos: a.pos.lerp(b.pos, t),
                rot: a.rot.slerp(b.rot, t),
                scale: a.scale.lerp(b.scale, t),
            }),
            _ => {
                if t >= 1.0 {
                    end.clone()
                } else {
                    self.clone()
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    None,
    Interpolate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttributeMeta {
    pub interpolation: InterpolationMode,
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub index: u8,
    pub name: String,
    pub value: AttributeValue,
    pub dynamic: bool,
    pub meta: AttributeMeta,
}

impl Attribute {
    pub fn attribute_type(&self) -> AttributeType {
        self.value.attribute_type()
    }

    pub fn interpolated(&self) -> bool {
        self.meta.interpolation == InterpolationMode::Interpolate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_serde::BitWriter;

    #[test]
    fn binary_round_trips_every_type() {
        let values = vec![
            AttributeValue::Bool(true),
            AttributeValue::Int(-42),
            AttributeValue::Real(2.75),
            AttributeValue::Str("box".into()),
            AttributeValue::Vec3(Vec3::new(1.0, 2.0, 3.0)),
            AttributeValue::Quat(Quat::from_rotation_y(0.5)),
            AttributeValue::Transform(Transform {
                pos: Vec3::new(1.0, 2.0, 3.0),
                rot: Quat::IDENTITY,
                scale: Vec3::ONE,
            }),
            AttributeValue::EntityRef(1001),
        ];

        let mut writer = BitWriter::new();
        for value in &values {
            value.to_binary(&mut writer);
        }

        let bytes = writer.to_bytes();
        let mut reader = BitReader::new(&bytes);
        for value in &values {
            let out = AttributeValue::from_binary(value.attribute_type(), &mut reader).unwrap();
            assert_eq!(&out, value);
        }
    }

    #[test]
    fn lerp_snaps_discrete_types_at_end() {
        let a = AttributeValue::Str("a".into());
        let b = AttributeValue::Str("b".into());
        assert_eq!(a.lerp_toward(&b, 0.5), a);
        assert_eq!(a.lerp_toward(&b, 1.0), b);
    }
}
