//! Property tests for the value and keyframe codec.

use glam::{Quat, Vec2, Vec3, Vec4};
use proptest::prelude::*;
use tracer_sync_core::codec::{
    decode_keys, decode_track, encode_track, value_from_bytes, value_to_bytes, WireReader,
};
use tracer_sync_core::{Interpolation, KeyTrack, Keyframe, ParamType, ParamValue};

fn finite() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

fn value_of(ty: ParamType) -> BoxedStrategy<ParamValue> {
    match ty {
        ParamType::Bool => any::<bool>().prop_map(ParamValue::Bool).boxed(),
        ParamType::Int32 => any::<i32>().prop_map(ParamValue::Int32).boxed(),
        ParamType::Float32 => finite().prop_map(ParamValue::Float32).boxed(),
        ParamType::Vec2 => [finite(), finite()]
            .prop_map(|a| ParamValue::Vec2(Vec2::from_array(a)))
            .boxed(),
        ParamType::Vec3 => [finite(), finite(), finite()]
            .prop_map(|a| ParamValue::Vec3(Vec3::from_array(a)))
            .boxed(),
        ParamType::Vec4 => [finite(), finite(), finite(), finite()]
            .prop_map(|a| ParamValue::Vec4(Vec4::from_array(a)))
            .boxed(),
        ParamType::Quaternion => [finite(), finite(), finite(), finite()]
            .prop_map(|a| ParamValue::Quaternion(Quat::from_array(a)))
            .boxed(),
        ParamType::Color => [finite(), finite(), finite(), finite()]
            .prop_map(|a| ParamValue::Color(Vec4::from_array(a)))
            .boxed(),
        ParamType::String => ".{0,64}".prop_map(ParamValue::String).boxed(),
    }
}

fn any_value() -> impl Strategy<Value = ParamValue> {
    prop::sample::select(ParamType::ALL.to_vec()).prop_flat_map(value_of)
}

fn animatable_type() -> impl Strategy<Value = ParamType> {
    prop::sample::select(
        ParamType::ALL
            .iter()
            .copied()
            .filter(|ty| ty.is_animatable())
            .collect::<Vec<_>>(),
    )
}

fn keyframe_of(ty: ParamType) -> impl Strategy<Value = Keyframe> {
    (
        finite(),
        finite(),
        finite(),
        value_of(ty),
        value_of(ty),
        value_of(ty),
        prop::sample::select(vec![
            Interpolation::Step,
            Interpolation::Linear,
            Interpolation::Bezier,
        ]),
    )
        .prop_map(|(time, lt, rt, value, lv, rv, interpolation)| Keyframe {
            time,
            value,
            interpolation,
            left_tangent_time: lt,
            right_tangent_time: rt,
            left_tangent_value: lv,
            right_tangent_value: rv,
        })
}

fn track() -> impl Strategy<Value = (ParamType, Vec<Keyframe>)> {
    animatable_type().prop_flat_map(|ty| {
        (
            Just(ty),
            prop::collection::vec(keyframe_of(ty), 0..12),
        )
    })
}

proptest! {
    /// Property: every value decodes back to itself
    #[test]
    fn values_roundtrip(value in any_value()) {
        let bytes = value_to_bytes(&value);
        prop_assert_eq!(bytes.len(), value.encoded_len());
        let decoded = value_from_bytes(&bytes, value.param_type().tag()).unwrap();
        prop_assert_eq!(decoded, value);
    }

    /// Property: tracks of any length roundtrip, tangents included
    #[test]
    fn tracks_roundtrip((ty, keys) in track()) {
        let track = KeyTrack::from_keys(keys);
        let mut bytes = Vec::new();
        encode_track(&track, &mut bytes);
        let mut reader = WireReader::new(&bytes);
        let decoded = decode_track(&mut reader, ty).unwrap();
        prop_assert!(reader.is_empty());
        prop_assert_eq!(decoded.keys(), track.keys());
    }

    /// Property: re-applying the same keys never raises the change flag
    #[test]
    fn reapplying_keys_is_idempotent((_ty, keys) in track()) {
        let mut track = KeyTrack::new();
        track.replace_with(keys.clone());
        track.reset_changed();
        track.replace_with(keys.clone());
        prop_assert!(!track.changed());
        prop_assert_eq!(track.keys(), keys.as_slice());
    }

    /// Property: truncated fixed-size values are rejected, never mis-read
    #[test]
    fn truncated_values_fail(value in any_value(), cut in 1usize..16) {
        prop_assume!(value.param_type() != ParamType::String);
        let bytes = value_to_bytes(&value);
        let cut = cut.min(bytes.len());
        let result = value_from_bytes(&bytes[..bytes.len() - cut], value.param_type().tag());
        prop_assert!(result.is_err());
    }

    /// Property: arbitrary bytes never panic the decoders
    #[test]
    fn arbitrary_bytes_dont_crash(
        tag in any::<u8>(),
        random_bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let _ = value_from_bytes(&random_bytes, tag);
        if let Ok(ty) = ParamType::try_from(tag) {
            let _ = decode_keys(&mut WireReader::new(&random_bytes), ty);
        }
    }
}
