//! Binary encoding of values, keyframes and tracks.
//!
//! All multi-byte fields are little-endian. The codec is pure: it never
//! remaps axes or handedness, that belongs to the host integration.
//!
//! Keyframe layout:
//! `[interp: u8][time: f32][left_time: f32][right_time: f32][value][left_value][right_value]`
//!
//! Track layout: `[count: u16][count x keyframe]`

use crate::error::SyncError;
use crate::keyframe::{Interpolation, KeyTrack, Keyframe, MAX_KEYS};
use crate::value::{ParamType, ParamValue};
use glam::{Quat, Vec2, Vec3, Vec4};
use tracing::warn;

/// Bytes taken by a keyframe header (interpolation tag and three times).
pub const KEYFRAME_HEADER_LEN: usize = 1 + 4 * 3;

/// Cursor over an inbound byte slice.
///
/// Every read checks the remaining length first and reports
/// [`SyncError::MalformedPayload`] instead of panicking.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset into the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], SyncError> {
        if self.remaining() < len {
            return Err(SyncError::short(context, len, self.remaining()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Take everything that is left.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N], SyncError> {
        let bytes = self.take(N, context)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a `u8`.
    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, SyncError> {
        Ok(self.array::<1>(context)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self, context: &'static str) -> Result<u16, SyncError> {
        Ok(u16::from_le_bytes(self.array(context)?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self, context: &'static str) -> Result<u32, SyncError> {
        Ok(u32::from_le_bytes(self.array(context)?))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self, context: &'static str) -> Result<i32, SyncError> {
        Ok(i32::from_le_bytes(self.array(context)?))
    }

    /// Read a little-endian `f32`.
    pub fn read_f32(&mut self, context: &'static str) -> Result<f32, SyncError> {
        Ok(f32::from_le_bytes(self.array(context)?))
    }

    fn read_f32s<const N: usize>(&mut self, context: &'static str) -> Result<[f32; N], SyncError> {
        if self.remaining() < N * 4 {
            return Err(SyncError::short(context, N * 4, self.remaining()));
        }
        let mut out = [0.0f32; N];
        for slot in &mut out {
            *slot = self.read_f32(context)?;
        }
        Ok(out)
    }
}

/// Append the wire form of `value` to `out`.
pub fn encode_value(value: &ParamValue, out: &mut Vec<u8>) {
    match value {
        ParamValue::Bool(b) => out.push(u8::from(*b)),
        ParamValue::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        ParamValue::Float32(f) => out.extend_from_slice(&f.to_le_bytes()),
        ParamValue::Vec2(v) => put_f32s(out, &v.to_array()),
        ParamValue::Vec3(v) => put_f32s(out, &v.to_array()),
        ParamValue::Vec4(v) | ParamValue::Color(v) => put_f32s(out, &v.to_array()),
        ParamValue::Quaternion(q) => put_f32s(out, &q.to_array()),
        ParamValue::String(s) => out.extend_from_slice(s.as_bytes()),
    }
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Encode `value` into a fresh buffer.
pub fn value_to_bytes(value: &ParamValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.encoded_len());
    encode_value(value, &mut out);
    out
}

/// Decode one value of type `ty` from the reader.
///
/// Strings consume every remaining byte.
pub fn decode_value(reader: &mut WireReader<'_>, ty: ParamType) -> Result<ParamValue, SyncError> {
    let value = match ty {
        ParamType::Bool => ParamValue::Bool(reader.read_u8("bool")? != 0),
        ParamType::Int32 => ParamValue::Int32(reader.read_i32("int32")?),
        ParamType::Float32 => ParamValue::Float32(reader.read_f32("float32")?),
        ParamType::Vec2 => ParamValue::Vec2(Vec2::from_array(reader.read_f32s("vec2")?)),
        ParamType::Vec3 => ParamValue::Vec3(Vec3::from_array(reader.read_f32s("vec3")?)),
        ParamType::Vec4 => ParamValue::Vec4(Vec4::from_array(reader.read_f32s("vec4")?)),
        ParamType::Quaternion => {
            ParamValue::Quaternion(Quat::from_array(reader.read_f32s("quaternion")?))
        }
        ParamType::Color => ParamValue::Color(Vec4::from_array(reader.read_f32s("color")?)),
        ParamType::String => {
            let bytes = reader.take_rest();
            let text = std::str::from_utf8(bytes)
                .map_err(|err| SyncError::InvalidPayload(format!("string is not utf-8: {err}")))?;
            ParamValue::String(text.to_string())
        }
    };
    Ok(value)
}

/// Decode a value from `bytes` given its raw wire tag.
pub fn value_from_bytes(bytes: &[u8], type_tag: u8) -> Result<ParamValue, SyncError> {
    let ty = ParamType::try_from(type_tag)?;
    decode_value(&mut WireReader::new(bytes), ty)
}

/// Append the wire form of `key` to `out`.
pub fn encode_keyframe(key: &Keyframe, out: &mut Vec<u8>) {
    out.push(key.interpolation.tag());
    out.extend_from_slice(&key.time.to_le_bytes());
    out.extend_from_slice(&key.left_tangent_time.to_le_bytes());
    out.extend_from_slice(&key.right_tangent_time.to_le_bytes());
    encode_value(&key.value, out);
    encode_value(&key.left_tangent_value, out);
    encode_value(&key.right_tangent_value, out);
}

/// Decode one keyframe whose values have type `ty`.
pub fn decode_keyframe(reader: &mut WireReader<'_>, ty: ParamType) -> Result<Keyframe, SyncError> {
    if !ty.is_animatable() {
        return Err(SyncError::NotAnimatable(ty));
    }
    let interpolation = Interpolation::try_from(reader.read_u8("keyframe interpolation")?)?;
    let time = reader.read_f32("keyframe time")?;
    let left_tangent_time = reader.read_f32("keyframe left tangent time")?;
    let right_tangent_time = reader.read_f32("keyframe right tangent time")?;
    let value = decode_value(reader, ty)?;
    let left_tangent_value = decode_value(reader, ty)?;
    let right_tangent_value = decode_value(reader, ty)?;
    Ok(Keyframe {
        time,
        value,
        interpolation,
        left_tangent_time,
        right_tangent_time,
        left_tangent_value,
        right_tangent_value,
    })
}

/// Append the wire form of `track` to `out`.
///
/// Edits cannot grow a track past [`MAX_KEYS`]. A track built from a longer
/// list is cut at the limit with a warning.
pub fn encode_track(track: &KeyTrack, out: &mut Vec<u8>) {
    let count = track.len().min(MAX_KEYS);
    if count < track.len() {
        warn!(
            keys = track.len(),
            limit = MAX_KEYS,
            "track exceeds the wire key count, trailing keys not encoded"
        );
    }
    out.extend_from_slice(&(count as u16).to_le_bytes());
    for key in track.iter().take(count) {
        encode_keyframe(key, out);
    }
}

/// Decode a keyframe stream of type `ty` into a list of keys.
///
/// The declared count is checked against the bytes present before anything
/// is allocated.
pub fn decode_keys(reader: &mut WireReader<'_>, ty: ParamType) -> Result<Vec<Keyframe>, SyncError> {
    let size = ty.fixed_size().ok_or(SyncError::NotAnimatable(ty))?;
    let count = reader.read_u16("track key count")? as usize;
    let key_len = KEYFRAME_HEADER_LEN + 3 * size;
    if reader.remaining() < count * key_len {
        return Err(SyncError::short(
            "keyframe stream",
            count * key_len,
            reader.remaining(),
        ));
    }
    (0..count).map(|_| decode_keyframe(reader, ty)).collect()
}

/// Decode a full track of type `ty`.
pub fn decode_track(reader: &mut WireReader<'_>, ty: ParamType) -> Result<KeyTrack, SyncError> {
    Ok(KeyTrack::from_keys(decode_keys(reader, ty)?))
}

/// Encoded size of a keyframe of type `ty`.
pub fn keyframe_len(ty: ParamType) -> Option<usize> {
    ty.fixed_size().map(|size| KEYFRAME_HEADER_LEN + 3 * size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: ParamValue) {
        let bytes = value_to_bytes(&value);
        assert_eq!(bytes.len(), value.encoded_len());
        let decoded = value_from_bytes(&bytes, value.param_type().tag()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn every_variant_roundtrips() {
        roundtrip(ParamValue::Bool(true));
        roundtrip(ParamValue::Bool(false));
        roundtrip(ParamValue::Int32(i32::MIN));
        roundtrip(ParamValue::Int32(42));
        roundtrip(ParamValue::Float32(-0.75));
        roundtrip(ParamValue::Vec2(Vec2::new(1.0, -2.0)));
        roundtrip(ParamValue::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        roundtrip(ParamValue::Vec4(Vec4::new(1.0, 2.0, 3.0, 4.0)));
        roundtrip(ParamValue::Quaternion(Quat::from_xyzw(0.0, 0.7071, 0.0, 0.7071)));
        roundtrip(ParamValue::Color(Vec4::new(1.0, 0.5, 0.25, 1.0)));
        roundtrip(ParamValue::from("Spot Light"));
        roundtrip(ParamValue::from(""));
    }

    #[test]
    fn float_layout_is_little_endian() {
        let bytes = value_to_bytes(&ParamValue::Float32(0.75));
        assert_eq!(bytes, 0.75f32.to_le_bytes());
    }

    #[test]
    fn quaternion_is_written_xyzw() {
        let bytes = value_to_bytes(&ParamValue::Quaternion(Quat::from_xyzw(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(&bytes[12..16], &4.0f32.to_le_bytes());
    }

    #[test]
    fn short_payload_is_malformed() {
        let result = value_from_bytes(&[0, 0, 0], ParamType::Float32.tag());
        assert!(matches!(
            result,
            Err(SyncError::MalformedPayload {
                needed: 4,
                remaining: 3,
                ..
            })
        ));
        assert!(value_from_bytes(&[0; 11], ParamType::Vec3.tag()).is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            value_from_bytes(&[0; 4], 42),
            Err(SyncError::UnknownType(42))
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(matches!(
            value_from_bytes(&[0xff, 0xfe], ParamType::String.tag()),
            Err(SyncError::InvalidPayload(_))
        ));
    }

    #[test]
    fn keyframe_layout_matches_documented_order() {
        let key = Keyframe::bezier(
            2.0,
            ParamValue::Float32(1.0),
            (1.5, ParamValue::Float32(0.5)),
            (2.5, ParamValue::Float32(1.5)),
        )
        .unwrap();
        let mut out = Vec::new();
        encode_keyframe(&key, &mut out);
        assert_eq!(out.len(), keyframe_len(ParamType::Float32).unwrap());
        assert_eq!(out[0], Interpolation::Bezier.tag());
        assert_eq!(&out[1..5], &2.0f32.to_le_bytes());
        assert_eq!(&out[5..9], &1.5f32.to_le_bytes());
        assert_eq!(&out[9..13], &2.5f32.to_le_bytes());
        assert_eq!(&out[13..17], &1.0f32.to_le_bytes());
        assert_eq!(&out[17..21], &0.5f32.to_le_bytes());
        assert_eq!(&out[21..25], &1.5f32.to_le_bytes());
    }

    #[test]
    fn tracks_roundtrip_for_zero_one_and_many_keys() {
        let mut many = KeyTrack::new();
        for i in 0..6 {
            let t = i as f32 * 10.0;
            let v = ParamValue::Vec3(Vec3::splat(i as f32));
            many.push(
                Keyframe::bezier(
                    t,
                    v.clone(),
                    (t - 2.0, ParamValue::Vec3(Vec3::splat(-1.0))),
                    (t + 2.0, ParamValue::Vec3(Vec3::splat(1.0))),
                )
                .unwrap(),
            );
        }
        let one = KeyTrack::from_keys(vec![Keyframe::new(0.0, ParamValue::Vec3(Vec3::ONE))]);

        for track in [KeyTrack::new(), one, many] {
            let mut out = Vec::new();
            encode_track(&track, &mut out);
            let mut reader = WireReader::new(&out);
            let decoded = decode_track(&mut reader, ParamType::Vec3).unwrap();
            assert!(reader.is_empty());
            assert_eq!(decoded.keys(), track.keys());
        }
    }

    #[test]
    fn track_count_larger_than_payload_is_malformed() {
        let mut out = Vec::new();
        out.extend_from_slice(&500u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 20]);
        let result = decode_track(&mut WireReader::new(&out), ParamType::Float32);
        assert!(matches!(result, Err(SyncError::MalformedPayload { .. })));
    }

    #[test]
    fn bad_interpolation_tag_is_rejected() {
        let mut out = Vec::new();
        encode_keyframe(&Keyframe::new(0.0, ParamValue::Bool(true)), &mut out);
        out[0] = 9;
        let result = decode_keyframe(&mut WireReader::new(&out), ParamType::Bool);
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }

    #[test]
    fn string_tracks_are_not_decodable() {
        let out = 0u16.to_le_bytes();
        assert!(matches!(
            decode_track(&mut WireReader::new(&out), ParamType::String),
            Err(SyncError::NotAnimatable(ParamType::String))
        ));
    }

    #[test]
    fn overlong_track_count_matches_encoded_keys() {
        let key = Keyframe::new(0.0, ParamValue::Bool(true));
        let track = KeyTrack::from_keys(vec![key; MAX_KEYS + 3]);
        let mut out = Vec::new();
        encode_track(&track, &mut out);
        assert_eq!(&out[..2], &u16::MAX.to_le_bytes());
        assert_eq!(out.len(), 2 + MAX_KEYS * keyframe_len(ParamType::Bool).unwrap());

        let mut reader = WireReader::new(&out);
        let decoded = decode_track(&mut reader, ParamType::Bool).unwrap();
        assert!(reader.is_empty());
        assert_eq!(decoded.len(), MAX_KEYS);
    }
}
