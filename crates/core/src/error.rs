//! Error taxonomy for the synchronization core.

use crate::value::ParamType;
use thiserror::Error;

/// Entity identifier, unique for the lifetime of a session.
pub type EntityId = u16;

/// Parameter identifier, dense and zero-based within its entity.
pub type ParameterId = u16;

/// Errors raised by the data model, codec and registry.
///
/// None of these are fatal: inbound code logs them and drops the offending
/// record.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fewer bytes remain than the type or layout demands.
    #[error("malformed payload: {context} needs {needed} bytes, {remaining} remain")]
    MalformedPayload {
        /// What was being decoded.
        context: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        remaining: usize,
    },
    /// Payload bytes are present but not decodable.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Type tag outside the supported set.
    #[error("unknown parameter type tag {0}")]
    UnknownType(u8),
    /// Entity or parameter id not registered.
    #[error("unknown reference: entity {entity_id}, parameter {parameter_id:?}")]
    UnknownReference {
        /// Referenced entity.
        entity_id: EntityId,
        /// Referenced parameter, if any.
        parameter_id: Option<ParameterId>,
    },
    /// A value of the wrong variant was assigned to a parameter.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Parameter's fixed type.
        expected: ParamType,
        /// Offered type.
        found: ParamType,
    },
    /// Keyframe index beyond the end of the track.
    #[error("key index {index} out of bounds for track of length {len}")]
    KeyIndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Track length.
        len: usize,
    },
    /// The track already holds as many keys as the wire count can express.
    #[error("track is full at {0} keys")]
    TrackFull(usize),
    /// The parameter type cannot carry keyframes.
    #[error("parameters of type {0} cannot be animated")]
    NotAnimatable(ParamType),
    /// Tangent value variant differs from the key value.
    #[error("tangent type {tangent} does not match key type {key}")]
    InvalidTangent {
        /// Key value type.
        key: ParamType,
        /// Tangent value type.
        tangent: ParamType,
    },
    /// Every assignable id has been used.
    #[error("no free {0} ids left")]
    RegistryFull(&'static str),
}

impl SyncError {
    pub(crate) fn short(context: &'static str, needed: usize, remaining: usize) -> Self {
        SyncError::MalformedPayload {
            context,
            needed,
            remaining,
        }
    }
}
