use crate::{
    ids::{ComponentId, EntityId},
    scene::attribute::AttributeValue,
};

/// One in-flight client-side blend of an attribute toward a received end
/// value. Opened by EditAttributes for attributes flagged `Interpolate`,
/// ended early when a local write touches the attribute.
pub(crate) struct AttributeInterpolation {
    pub entity: EntityId,
    pub component: ComponentId,
    pub index: u8,
    pub start: AttributeValue,
    pub end: AttributeValue,
    pub time: f32,
    pub length: f32,
}

impl AttributeInterpolation {
    pub fn sample(&self) -> AttributeValue {
        let t = if self.length > 0.0 {
            (self.time / self.length).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.start.lerp_toward(&self.end, t)
    }

    pub fn finished(&self) -> bool {
        self.length <= 0.0 || self.time >= self.length
    }
}
