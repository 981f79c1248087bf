//! # Lattice Shared
//! Scene replication core shared between the lattice-server & lattice-client
//! crates: the scene data model, per-connection sync state, the wire message
//! family and the synchronization manager driving both ends.

pub use lattice_serde::{
    read_arithmetic_encoded, read_vle, write_arithmetic_encoded, write_vle, BitReader, BitWrite,
    BitWriter, Serde, SerdeErr,
};

pub mod connection;
pub mod ids;
pub mod messages;
pub mod scene;
pub mod sync;

mod types;
mod wrapping_number;

pub use connection::{
    Capability, ConnectionKind, ConnectionRegistry, ProtocolVersion, UserConnection,
};
pub use ids::{ComponentId, EntityId, UniqueIdGenerator};
pub use messages::{EntityActionMsg, ExecType, MessageId, OutgoingMessage};
pub use scene::{
    Attribute, AttributeMeta, AttributeType, AttributeValue, ChangeOrigin, Component,
    ComponentTypeDesc, ComponentTypeRegistry, Entity, InterpolationMode, Scene, SceneEvent,
    Transform, DYNAMIC_DATA_TYPE_ID, NAME_TYPE_ID, PLACEABLE_TRANSFORM_INDEX, PLACEABLE_TYPE_ID,
    RIGID_BODY_ANGULAR_VELOCITY_INDEX, RIGID_BODY_LINEAR_VELOCITY_INDEX, RIGID_BODY_MASS_INDEX,
    RIGID_BODY_TYPE_ID,
};
pub use sync::{
    DefaultEntityPrioritizer, EntityPrioritizer, EntitySyncState, RigidBodyInterpolationState,
    SceneSyncState, SyncConfig, SyncError, SyncManager,
};
pub use types::{ConnectionId, HostType, PacketId, SceneId};
pub use wrapping_number::{sequence_greater_than, sequence_less_than};
