#![warn(missing_docs)]
//! Core data model for live scene parameter synchronization.
//!
//! Values, keyframes and parameters, their binary codec, the per-entity echo
//! guard, and the registries that hand out wire ids.

pub mod codec;
pub mod error;
pub mod guard;
pub mod keyframe;
pub mod parameter;
pub mod registry;
pub mod value;

// Re-export commonly used types
pub use codec::WireReader;
pub use error::{EntityId, ParameterId, SyncError};
pub use guard::{EchoGuard, EchoGuardToken};
pub use keyframe::{Interpolation, KeyTrack, Keyframe, MAX_KEYS};
pub use parameter::{
    ChangeOrigin, DeserializeOutcome, Parameter, ParameterChange, ParameterObserver, SetOutcome,
};
pub use registry::{
    is_reserved_entity_id, RpcTable, SceneEntity, SceneObjectRegistry, ENTITY_BROADCAST_ID,
    ENTITY_SCENE_ID, RPC_SCOPE_ID, RPC_TARGET_ID,
};
pub use value::{ParamType, ParamValue};
