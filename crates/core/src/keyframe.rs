//! Keyframes and keyframe tracks for animated parameters.

use crate::error::SyncError;
use crate::value::ParamValue;
use serde::{Deserialize, Serialize};

/// Most keys a track can hold; the wire count is a `u16`.
pub const MAX_KEYS: usize = u16::MAX as usize;

/// How a key blends into the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Interpolation {
    /// Hold the value until the next key.
    Step = 1,
    /// Straight line to the next key.
    Linear = 2,
    /// Cubic curve shaped by the tangents.
    Bezier = 3,
}

impl Interpolation {
    /// Wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Interpolation {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Interpolation::Step),
            2 => Ok(Interpolation::Linear),
            3 => Ok(Interpolation::Bezier),
            other => Err(SyncError::InvalidPayload(format!(
                "unknown interpolation tag {other}"
            ))),
        }
    }
}

/// A timestamped value sample with tangents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Key time (timeline frames).
    pub time: f32,
    /// Value at `time`.
    pub value: ParamValue,
    /// Blend mode towards the next key.
    pub interpolation: Interpolation,
    /// Time of the incoming tangent handle.
    pub left_tangent_time: f32,
    /// Time of the outgoing tangent handle.
    pub right_tangent_time: f32,
    /// Value of the incoming tangent handle.
    pub left_tangent_value: ParamValue,
    /// Value of the outgoing tangent handle.
    pub right_tangent_value: ParamValue,
}

impl Keyframe {
    /// Linear key with degenerate tangents (no curvature).
    pub fn new(time: f32, value: ParamValue) -> Self {
        Self::with_interpolation(time, value, Interpolation::Linear)
    }

    /// Key with degenerate tangents and an explicit interpolation.
    pub fn with_interpolation(time: f32, value: ParamValue, interpolation: Interpolation) -> Self {
        Self {
            time,
            left_tangent_time: time,
            right_tangent_time: time,
            left_tangent_value: value.clone(),
            right_tangent_value: value.clone(),
            value,
            interpolation,
        }
    }

    /// Bezier key with explicit tangent handles.
    pub fn bezier(
        time: f32,
        value: ParamValue,
        left: (f32, ParamValue),
        right: (f32, ParamValue),
    ) -> Result<Self, SyncError> {
        let key = Self {
            time,
            value,
            interpolation: Interpolation::Bezier,
            left_tangent_time: left.0,
            right_tangent_time: right.0,
            left_tangent_value: left.1,
            right_tangent_value: right.1,
        };
        key.validate()?;
        Ok(key)
    }

    /// Check that both tangent values share the key value's variant.
    pub fn validate(&self) -> Result<(), SyncError> {
        let key = self.value.param_type();
        for tangent in [&self.left_tangent_value, &self.right_tangent_value] {
            if tangent.param_type() != key {
                return Err(SyncError::InvalidTangent {
                    key,
                    tangent: tangent.param_type(),
                });
            }
        }
        Ok(())
    }
}

/// Position-indexed keyframe sequence with a change flag.
///
/// Keys are not sorted by time: callers choose the insertion position. The
/// `changed` flag is raised by any edit that alters the contents and stays up
/// until the consumer calls [`KeyTrack::take_changed`] or
/// [`KeyTrack::reset_changed`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyTrack {
    keys: Vec<Keyframe>,
    #[serde(skip)]
    changed: bool,
}

impl KeyTrack {
    /// Empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track built from `keys`, flagged as changed when non-empty.
    pub fn from_keys(keys: Vec<Keyframe>) -> Self {
        let changed = !keys.is_empty();
        Self { keys, changed }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the track has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `index`.
    pub fn get(&self, index: usize) -> Option<&Keyframe> {
        self.keys.get(index)
    }

    /// Iterate keys in track order.
    pub fn iter(&self) -> std::slice::Iter<'_, Keyframe> {
        self.keys.iter()
    }

    /// Keys as a slice.
    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    /// Insert or overwrite the key at `index`.
    ///
    /// `index == len` appends, unless the track already holds [`MAX_KEYS`].
    /// `index < len` always overwrites but only raises `changed` if the new
    /// key differs from the old one.
    pub fn set(&mut self, index: usize, key: Keyframe) -> Result<(), SyncError> {
        let len = self.keys.len();
        if index > len {
            return Err(SyncError::KeyIndexOutOfBounds { index, len });
        }
        if index == len {
            if len >= MAX_KEYS {
                return Err(SyncError::TrackFull(MAX_KEYS));
            }
            self.keys.push(key);
            self.changed = true;
        } else {
            if self.keys[index] != key {
                self.changed = true;
            }
            self.keys[index] = key;
        }
        Ok(())
    }

    /// Append a key.
    pub fn push(&mut self, key: Keyframe) {
        self.keys.push(key);
        self.changed = true;
    }

    /// Remove and return the key at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Keyframe, SyncError> {
        if index >= self.keys.len() {
            return Err(SyncError::KeyIndexOutOfBounds {
                index,
                len: self.keys.len(),
            });
        }
        self.changed = true;
        Ok(self.keys.remove(index))
    }

    /// Remove every key.
    pub fn clear(&mut self) {
        if !self.keys.is_empty() {
            self.changed = true;
        }
        self.keys.clear();
    }

    /// Make this track hold exactly `keys`, position by position.
    ///
    /// Goes through [`KeyTrack::set`] so re-applying identical keys leaves
    /// `changed` untouched.
    pub fn replace_with(&mut self, keys: Vec<Keyframe>) {
        let incoming = keys.len();
        for (index, key) in keys.into_iter().enumerate() {
            // index <= len holds for every step of an in-order walk
            let _ = self.set(index, key);
        }
        if self.keys.len() > incoming {
            self.keys.truncate(incoming);
            self.changed = true;
        }
    }

    /// Whether the contents changed since the flag was last cleared.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Read and clear the change flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Clear the change flag.
    pub fn reset_changed(&mut self) {
        self.changed = false;
    }
}

impl<'a> IntoIterator for &'a KeyTrack {
    type Item = &'a Keyframe;
    type IntoIter = std::slice::Iter<'a, Keyframe>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
