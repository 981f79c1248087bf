/// Named protocol capabilities, consulted before emitting optional frames.
/// Features degrade silently when the peer lacks one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    CustomComponents,
    HierarchicScene,
    WebClientRigidBodyMessage,
}

/// Negotiated protocol level. Later versions are supersets of earlier ones,
/// so capability checks are plain ordering comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProtocolVersion {
    Original = 1,
    CustomComponents = 2,
    HierarchicScene = 3,
    WebClientRigidBodyMessage = 4,
}

impl ProtocolVersion {
    pub fn latest() -> Self {
        ProtocolVersion::WebClientRigidBodyMessage
    }

    pub fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::CustomComponents => self >= ProtocolVersion::CustomComponents,
            Capability::HierarchicScene => self >= ProtocolVersion::HierarchicScene,
            Capability::WebClientRigidBodyMessage => {
                self >= ProtocolVersion::WebClientRigidBodyMessage
            }
        }
    }
}
