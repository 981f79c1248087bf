use std::collections::BTreeMap;

use crate::scene::{
    attribute::{Attribute, AttributeMeta, AttributeType, AttributeValue, InterpolationMode},
    component::Component,
};

pub const PLACEABLE_TYPE_ID: u32 = 20;
pub const RIGID_BODY_TYPE_ID: u32 = 23;
pub const DYNAMIC_DATA_TYPE_ID: u32 = 25;
pub const NAME_TYPE_ID: u32 = 26;

/// First attribute of a placeable is its transform.
pub const PLACEABLE_TRANSFORM_INDEX: u8 = 0;
pub const RIGID_BODY_MASS_INDEX: u8 = 0;
/// Velocities sit in byte 1 of the dirty bitmap, bits 5 and 6.
pub const RIGID_BODY_LINEAR_VELOCITY_INDEX: u8 = 13;
pub const RIGID_BODY_ANGULAR_VELOCITY_INDEX: u8 = 14;

struct StaticAttributeSpec {
    name: &'static str,
    attribute_type: AttributeType,
    meta: AttributeMeta,
}

const fn attr(name: &'static str, attribute_type: AttributeType) -> StaticAttributeSpec {
    StaticAttributeSpec {
        name,
        attribute_type,
        meta: AttributeMeta {
            interpolation: InterpolationMode::None,
        },
    }
}

const fn attr_interpolated(name: &'static str, attribute_type: AttributeType) -> StaticAttributeSpec {
    StaticAttributeSpec {
        name,
        attribute_type,
        meta: AttributeMeta {
            interpolation: InterpolationMode::Interpolate,
        },
    }
}

struct NativeTypeSpec {
    type_id: u32,
    type_name: &'static str,
    supports_dynamic_attributes: bool,
    attributes: &'static [StaticAttributeSpec],
}

static PLACEABLE_ATTRS: &[StaticAttributeSpec] = &[
    attr_interpolated("transform", AttributeType::Transform),
    attr("draw_debug", AttributeType::Bool),
    attr("visible", AttributeType::Bool),
    attr("selection_layer", AttributeType::Int),
    attr("parent_ref", AttributeType::EntityRef),
];

static RIGID_BODY_ATTRS: &[StaticAttributeSpec] = &[
    attr("mass", AttributeType::Real),
    attr("friction", AttributeType::Real),
    attr("restitution", AttributeType::Real),
    attr("linear_damping", AttributeType::Real),
    attr("angular_damping", AttributeType::Real),
    attr("linear_factor", AttributeType::Vec3),
    attr("angular_factor", AttributeType::Vec3),
    attr("shape_type", AttributeType::Int),
    attr("size", AttributeType::Vec3),
    attr("collision_mesh_ref", AttributeType::Str),
    attr("phantom", AttributeType::Bool),
    attr("draw_debug", AttributeType::Bool),
    attr("kinematic", AttributeType::Bool),
    attr("linear_velocity", AttributeType::Vec3),
    attr("angular_velocity", AttributeType::Vec3),
];

static NAME_ATTRS: &[StaticAttributeSpec] = &[
    attr("name", AttributeType::Str),
    attr("description", AttributeType::Str),
];

static NATIVE_TYPES: &[NativeTypeSpec] = &[
    NativeTypeSpec {
        type_id: PLACEABLE_TYPE_ID,
        type_name: "Placeable",
        supports_dynamic_attributes: false,
        attributes: PLACEABLE_ATTRS,
    },
    NativeTypeSpec {
        type_id: RIGID_BODY_TYPE_ID,
        type_name: "RigidBody",
        supports_dynamic_attributes: false,
        attributes: RIGID_BODY_ATTRS,
    },
    NativeTypeSpec {
        type_id: DYNAMIC_DATA_TYPE_ID,
        type_name: "DynamicData",
        supports_dynamic_attributes: true,
        attributes: &[],
    },
    NativeTypeSpec {
        type_id: NAME_TYPE_ID,
        type_name: "Name",
        supports_dynamic_attributes: false,
        attributes: NAME_ATTRS,
    },
];

/// Wire-transported description of an attribute of a custom component type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDesc {
    pub type_id: u8,
    pub name: String,
}

/// Wire-transported description of a component type unknown to the peer's
/// static registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentTypeDesc {
    pub type_id: u32,
    pub type_name: String,
    pub attributes: Vec<AttributeDesc>,
}

/// Component factory: the built-in native types plus any placeholder
/// descriptors learned at runtime. Placeholder-built components support
/// dynamic attribute parsing.
#[derive(Default)]
pub struct ComponentTypeRegistry {
    placeholders: BTreeMap<u32, ComponentTypeDesc>,
}

impl ComponentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_native(type_id: u32) -> bool {
        NATIVE_TYPES.iter().any(|spec| spec.type_id == type_id)
    }

    pub fn is_native_name(type_name: &str) -> bool {
        NATIVE_TYPES.iter().any(|spec| spec.type_name == type_name)
    }

    pub fn register_placeholder(&mut self, desc: ComponentTypeDesc) {
        self.placeholders.insert(desc.type_id, desc);
    }

    pub fn placeholder(&self, type_id: u32) -> Option<&ComponentTypeDesc> {
        self.placeholders.get(&type_id)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &ComponentTypeDesc> {
        self.placeholders.values()
    }

    pub fn instantiate(&self, id: u32, type_id: u32, name: &str) -> Option<Component> {
        if let Some(spec) = NATIVE_TYPES.iter().find(|spec| spec.type_id == type_id) {
            let attributes = spec
                .attributes
                .iter()
                .enumerate()
                .map(|(index, attr_spec)| Attribute {
                    index: index as u8,
                    name: attr_spec.name.to_string(),
                    value: AttributeValue::default_for(attr_spec.attribute_type),
                    dynamic: false,
                    meta: attr_spec.meta,
                })
                .collect();
            return Some(Component::new(
                id,
                type_id,
                name.to_string(),
                spec.supports_dynamic_attributes,
                attributes,
            ));
        }

        let desc = self.placeholders.get(&type_id)?;
        let attributes = desc
            .attributes
            .iter()
            .enumerate()
            .filter_map(|(index, attr_desc)| {
                let attribute_type = AttributeType::from_type_id(attr_desc.type_id)?;
                Some(Attribute {
                    index: index as u8,
                    name: attr_desc.name.clone(),
                    value: AttributeValue::default_for(attribute_type),
                    dynamic: false,
                    meta: AttributeMeta::default(),
                })
            })
            .collect();
        Some(Component::new(
            id,
            type_id,
            name.to_string(),
            true,
            attributes,
        ))
    }
}
