mod attribute;
mod component;
mod entity;
mod event;
mod interpolation;
mod registry;
#[allow(clippy::module_inception)]
mod scene;

pub use attribute::{
    Attribute, AttributeMeta, AttributeType, AttributeValue, InterpolationMode, Transform,
};
pub use component::Component;
pub use entity::Entity;
pub use event::{ChangeOrigin, SceneEvent};
pub use registry::{
    AttributeDesc, ComponentTypeDesc, ComponentTypeRegistry, DYNAMIC_DATA_TYPE_ID, NAME_TYPE_ID,
    PLACEABLE_TRANSFORM_INDEX, PLACEABLE_TYPE_ID, RIGID_BODY_ANGULAR_VELOCITY_INDEX,
    RIGID_BODY_LINEAR_VELOCITY_INDEX, RIGID_BODY_MASS_INDEX, RIGID_BODY_TYPE_ID,
};
pub use scene::Scene;
