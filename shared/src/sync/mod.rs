mod error;
mod flush;
mod handlers;
mod interpolation;
mod manager;
mod prioritizer;
mod rigid_body;
mod state;
mod wire;

pub use error::SyncError;
pub use interpolation::{
    hermite_derivative, hermite_interpolate, RigidBodyInterpolationState, RigidBodySnapshot,
};
pub use manager::{ModifyPolicy, SyncConfig, SyncManager};
pub use prioritizer::{DefaultEntityPrioritizer, EntityPrioritizer};
pub use state::{AttributeToggle, ComponentSyncState, EntitySyncState, SceneSyncState};
