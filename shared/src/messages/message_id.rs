/// Wire identifiers of the scene-sync message family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    ObserverPosition = 105,
    EditEntityProperties = 109,
    CreateEntity = 110,
    CreateComponents = 111,
    CreateAttributes = 112,
    EditAttributes = 113,
    RemoveAttributes = 114,
    RemoveComponents = 115,
    RemoveEntity = 116,
    CreateEntityReply = 117,
    CreateComponentsReply = 118,
    RigidBodyUpdate = 119,
    EntityAction = 120,
    RegisterComponentType = 123,
    SetEntityParent = 124,
}

impl MessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            105 => Self::ObserverPosition,
            109 => Self::EditEntityProperties,
            110 => Self::CreateEntity,
            111 => Self::CreateComponents,
            112 => Self::CreateAttributes,
            113 => Self::EditAttributes,
            114 => Self::RemoveAttributes,
            115 => Self::RemoveComponents,
            116 => Self::RemoveEntity,
            117 => Self::CreateEntityReply,
            118 => Self::CreateComponentsReply,
            119 => Self::RigidBodyUpdate,
            120 => Self::EntityAction,
            123 => Self::RegisterComponentType,
            124 => Self::SetEntityParent,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::MessageId;

    #[test]
    fn ids_round_trip() {
        for id in [
            MessageId::ObserverPosition,
            MessageId::CreateEntity,
            MessageId::RigidBodyUpdate,
            MessageId::SetEntityParent,
        ] {
            assert_eq!(MessageId::from_u16(id.as_u16()), Some(id));
        }
        assert_eq!(MessageId::from_u16(121), None);
    }
}
