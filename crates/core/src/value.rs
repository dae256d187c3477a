//! Typed parameter values.
//!
//! [`ParamValue`] is the closed set of value types that can travel over the
//! wire. The variant alone decides the encoded size, so a record never needs
//! a per-value length prefix (strings take whatever the record leaves).

use crate::error::SyncError;
use glam::{Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire tag identifying a [`ParamValue`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ParamType {
    /// Single byte boolean.
    Bool = 2,
    /// Signed 32-bit integer.
    Int32 = 3,
    /// 32-bit float.
    Float32 = 4,
    /// Two floats.
    Vec2 = 5,
    /// Three floats.
    Vec3 = 6,
    /// Four floats.
    Vec4 = 7,
    /// Rotation quaternion, encoded `x y z w`.
    Quaternion = 8,
    /// RGBA color as four floats.
    Color = 9,
    /// UTF-8 text, length implied by the enclosing record.
    String = 10,
}

impl ParamType {
    /// Every supported type, in wire tag order.
    pub const ALL: [ParamType; 9] = [
        ParamType::Bool,
        ParamType::Int32,
        ParamType::Float32,
        ParamType::Vec2,
        ParamType::Vec3,
        ParamType::Vec4,
        ParamType::Quaternion,
        ParamType::Color,
        ParamType::String,
    ];

    /// Wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded size in bytes, or `None` for strings.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ParamType::Bool => Some(1),
            ParamType::Int32 | ParamType::Float32 => Some(4),
            ParamType::Vec2 => Some(8),
            ParamType::Vec3 => Some(12),
            ParamType::Vec4 | ParamType::Quaternion | ParamType::Color => Some(16),
            ParamType::String => None,
        }
    }

    /// Whether values of this type can be keyframed.
    ///
    /// String keys have no delimiter inside a keyframe stream.
    pub fn is_animatable(self) -> bool {
        self.fixed_size().is_some()
    }
}

impl TryFrom<u8> for ParamType {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ParamType::Bool),
            3 => Ok(ParamType::Int32),
            4 => Ok(ParamType::Float32),
            5 => Ok(ParamType::Vec2),
            6 => Ok(ParamType::Vec3),
            7 => Ok(ParamType::Vec4),
            8 => Ok(ParamType::Quaternion),
            9 => Ok(ParamType::Color),
            10 => Ok(ParamType::String),
            other => Err(SyncError::UnknownType(other)),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool => "bool",
            ParamType::Int32 => "int32",
            ParamType::Float32 => "float32",
            ParamType::Vec2 => "vec2",
            ParamType::Vec3 => "vec3",
            ParamType::Vec4 => "vec4",
            ParamType::Quaternion => "quaternion",
            ParamType::Color => "color",
            ParamType::String => "string",
        };
        f.write_str(name)
    }
}

/// A synchronized parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int32(i32),
    /// Scalar float.
    Float32(f32),
    /// 2D vector.
    Vec2(Vec2),
    /// 3D vector (positions, scales).
    Vec3(Vec3),
    /// 4D vector.
    Vec4(Vec4),
    /// Rotation.
    Quaternion(Quat),
    /// RGBA color.
    Color(Vec4),
    /// Text.
    String(String),
}

impl ParamValue {
    /// Type tag of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Int32(_) => ParamType::Int32,
            ParamValue::Float32(_) => ParamType::Float32,
            ParamValue::Vec2(_) => ParamType::Vec2,
            ParamValue::Vec3(_) => ParamType::Vec3,
            ParamValue::Vec4(_) => ParamType::Vec4,
            ParamValue::Quaternion(_) => ParamType::Quaternion,
            ParamValue::Color(_) => ParamType::Color,
            ParamValue::String(_) => ParamType::String,
        }
    }

    /// Number of bytes this value occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            ParamValue::String(text) => text.len(),
            other => other.param_type().fixed_size().unwrap_or(0),
        }
    }

    /// Zero value for `ty` (identity rotation for quaternions, opaque black for colors).
    pub fn default_for(ty: ParamType) -> Self {
        match ty {
            ParamType::Bool => ParamValue::Bool(false),
            ParamType::Int32 => ParamValue::Int32(0),
            ParamType::Float32 => ParamValue::Float32(0.0),
            ParamType::Vec2 => ParamValue::Vec2(Vec2::ZERO),
            ParamType::Vec3 => ParamValue::Vec3(Vec3::ZERO),
            ParamType::Vec4 => ParamValue::Vec4(Vec4::ZERO),
            ParamType::Quaternion => ParamValue::Quaternion(Quat::IDENTITY),
            ParamType::Color => ParamValue::Color(Vec4::new(0.0, 0.0, 0.0, 1.0)),
            ParamType::String => ParamValue::String(String::new()),
        }
    }

    /// Fail with [`SyncError::TypeMismatch`] unless this value is of type `expected`.
    pub fn expect_type(&self, expected: ParamType) -> Result<(), SyncError> {
        let found = self.param_type();
        if found == expected {
            Ok(())
        } else {
            Err(SyncError::TypeMismatch { expected, found })
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int32(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Float32(value)
    }
}

impl From<Vec2> for ParamValue {
    fn from(value: Vec2) -> Self {
        ParamValue::Vec2(value)
    }
}

impl From<Vec3> for ParamValue {
    fn from(value: Vec3) -> Self {
        ParamValue::Vec3(value)
    }
}

impl From<Vec4> for ParamValue {
    fn from(value: Vec4) -> Self {
        ParamValue::Vec4(value)
    }
}

impl From<Quat> for ParamValue {
    fn from(value: Quat) -> Self {
        ParamValue::Quaternion(value)
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}
