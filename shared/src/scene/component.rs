use glam::Vec3;

use crate::{
    ids::{self, ComponentId},
    scene::attribute::{Attribute, AttributeMeta, AttributeType, AttributeValue, Transform},
};

/// A typed container of attributes. Static attributes occupy the indices
/// fixed at type registration; dynamic attributes may be appended at any
/// free index when the type allows it.
#[derive(Clone, Debug)]
pub struct Component {
    id: ComponentId,
    type_id: u32,
    name: String,
    supports_dynamic_attributes: bool,
    num_static: u8,
    attributes: Vec<Option<Attribute>>,
}

impl Component {
    pub fn new(
        id: ComponentId,
        type_id: u32,
        name: String,
        supports_dynamic_attributes: bool,
        static_attributes: Vec<Attribute>,
    ) -> Self {
        let num_static = static_attributes.len() as u8;
        Self {
            id,
            type_id,
            name,
            supports_dynamic_attributes,
            num_static,
            attributes: static_attributes.into_iter().map(Some).collect(),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ComponentId) {
        self.id = id;
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local(&self) -> bool {
        ids::is_local(self.id)
    }

    pub fn is_unacked(&self) -> bool {
        ids::is_unacked(self.id)
    }

    pub fn is_replicated(&self) -> bool {
        !self.is_local()
    }

    pub fn supports_dynamic_attributes(&self) -> bool {
        self.supports_dynamic_attributes
    }

    pub fn num_static_attributes(&self) -> u8 {
        self.num_static
    }

    pub fn attributes(&self) -> &[Option<Attribute>] {
        &self.attributes
    }

    pub fn attribute(&self, index: u8) -> Option<&Attribute> {
        self.attributes.get(index as usize)?.as_ref()
    }

    pub fn attribute_mut(&mut self, index: u8) -> Option<&mut Attribute> {
        self.attributes.get_mut(index as usize)?.as_mut()
    }

    /// Appends a dynamic attribute at `index`. Fails on static indices,
    /// occupied slots, unknown types, and types without dynamic support.
    pub fn create_attribute(
        &mut self,
        index: u8,
        type_id: u8,
        name: &str,
    ) -> Option<&Attribute> {
        if !self.supports_dynamic_attributes || index < self.num_static {
            return None;
        }
        let attribute_type = AttributeType::from_type_id(type_id)?;
        if self.attributes.len() <= index as usize {
            self.attributes.resize(index as usize + 1, None);
        }
        let slot = &mut self.attributes[index as usize];
        if slot.is_some() {
            return None;
        }
        *slot = Some(Attribute {
            index,
            name: name.to_string(),
            value: AttributeValue::default_for(attribute_type),
            dynamic: true,
            meta: AttributeMeta::default(),
        });
        slot.as_ref()
    }

    /// Clears a dynamic attribute slot. Static attributes cannot be removed.
    pub fn remove_attribute(&mut self, index: u8) -> bool {
        if index < self.num_static {
            return false;
        }
        match self.attributes.get_mut(index as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    // Typed accessors for the components the replicator reads directly.

    pub fn transform_at(&self, index: u8) -> Option<Transform> {
        match self.attribute(index)?.value {
            AttributeValue::Transform(t) => Some(t),
            _ => None,
        }
    }

    pub fn vec3_at(&self, index: u8) -> Option<Vec3> {
        match self.attribute(index)?.value {
            AttributeValue::Vec3(v) => Some(v),
            _ => None,
        }
    }

    pub fn real_at(&self, index: u8) -> Option<f32> {
        match self.attribute(index)?.value {
            AttributeValue::Real(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::registry::{ComponentTypeRegistry, DYNAMIC_DATA_TYPE_ID, PLACEABLE_TYPE_ID};

    #[test]
    fn dynamic_attributes_only_on_supporting_types() {
        let registry = ComponentTypeRegistry::new();
        let mut placeable = registry.instantiate(1, PLACEABLE_TYPE_ID, "").unwrap();
        assert!(placeable.create_attribute(10, 3, "extra").is_none());

        let mut data = registry.instantiate(2, DYNAMIC_DATA_TYPE_ID, "").unwrap();
        let created = data.create_attribute(0, 3, "health").unwrap();
        assert_eq!(created.name, "health");
        assert!(data.create_attribute(0, 3, "again").is_none());
        assert!(data.remove_attribute(0));
        assert!(!data.remove_attribute(0));
    }
}
