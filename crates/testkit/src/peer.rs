//! Frames from a fake remote peer.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracer_sync_core::codec;
use tracer_sync_core::{
    EntityId, KeyTrack, Keyframe, ParamValue, ParameterId, RPC_SCOPE_ID, RPC_TARGET_ID,
};
use tracer_sync_net::{
    ClockConfig, ClockSync, FrameHeader, LockRecord, MessageType, ResetRecord, ValueRecord,
    HEADER_LEN,
};

/// A remote client with its own id and logical clock that emits raw frames.
pub struct SyntheticPeer {
    client_id: u8,
    clock: ClockSync,
    rng: StdRng,
}

impl SyntheticPeer {
    /// Peer `client_id` at time 0.
    pub fn new(client_id: u8) -> Self {
        Self::with_seed(client_id, 0x7ace)
    }

    /// Peer whose record shuffling uses `seed`.
    pub fn with_seed(client_id: u8, seed: u64) -> Self {
        Self {
            client_id,
            clock: ClockSync::new(ClockConfig::default()),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Client id in every header.
    pub fn client_id(&self) -> u8 {
        self.client_id
    }

    /// Current logical time.
    pub fn time(&self) -> u8 {
        self.clock.time()
    }

    /// Set the logical time.
    pub fn set_time(&self, time: u8) {
        self.clock.set_time(time);
    }

    /// Advance the clock `ticks` times.
    pub fn advance(&self, ticks: u32) {
        for _ in 0..ticks {
            self.clock.tick();
        }
    }

    fn start(&self, message_type: MessageType) -> Vec<u8> {
        FrameHeader {
            client_id: self.client_id,
            time: self.clock.time(),
            message_type,
        }
        .start_frame()
    }

    /// One ParameterUpdate frame carrying a static value per record.
    pub fn parameter_update(&self, records: &[(EntityId, ParameterId, ParamValue)]) -> Vec<u8> {
        let mut frame = self.start(MessageType::ParameterUpdate);
        for (entity_id, parameter_id, value) in records {
            let payload = codec::value_to_bytes(value);
            self.value_record(&mut frame, *entity_id, *parameter_id, value, &payload);
        }
        frame
    }

    /// ParameterUpdate frame for an animated parameter: value then track.
    pub fn animated_update(
        &self,
        entity_id: EntityId,
        parameter_id: ParameterId,
        value: &ParamValue,
        keys: &[Keyframe],
    ) -> Vec<u8> {
        let mut payload = codec::value_to_bytes(value);
        codec::encode_track(&KeyTrack::from_keys(keys.to_vec()), &mut payload);
        let mut frame = self.start(MessageType::ParameterUpdate);
        self.value_record(&mut frame, entity_id, parameter_id, value, &payload);
        frame
    }

    /// ParameterUpdate frame with an arbitrary type tag and payload.
    pub fn raw_update(
        &self,
        entity_id: EntityId,
        parameter_id: ParameterId,
        type_tag: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = self.start(MessageType::ParameterUpdate);
        ValueRecord {
            scene_id: self.client_id,
            entity_id,
            parameter_id,
            type_tag,
            payload,
        }
        .encode(&mut frame);
        frame
    }

    fn value_record(
        &self,
        frame: &mut Vec<u8>,
        entity_id: EntityId,
        parameter_id: ParameterId,
        value: &ParamValue,
        payload: &[u8],
    ) {
        ValueRecord {
            scene_id: self.client_id,
            entity_id,
            parameter_id,
            type_tag: value.param_type().tag(),
            payload,
        }
        .encode(frame);
    }

    /// The same records, one frame each, in a seeded random order.
    pub fn shuffled_updates(
        &mut self,
        records: &[(EntityId, ParameterId, ParamValue)],
    ) -> Vec<Vec<u8>> {
        let mut frames: Vec<Vec<u8>> = records
            .iter()
            .map(|record| self.parameter_update(std::slice::from_ref(record)))
            .collect();
        frames.shuffle(&mut self.rng);
        frames
    }

    /// Lock frame with one record per entity.
    pub fn lock(&self, entities: &[EntityId], locked: bool) -> Vec<u8> {
        let mut frame = self.start(MessageType::Lock);
        for entity_id in entities {
            LockRecord {
                scene_id: self.client_id,
                entity_id: *entity_id,
                locked,
            }
            .encode(&mut frame);
        }
        frame
    }

    /// ResetObject frame for `entity_id`.
    pub fn reset(&self, entity_id: EntityId) -> Vec<u8> {
        let mut frame = self.start(MessageType::ResetObject);
        ResetRecord {
            scene_id: self.client_id,
            entity_id,
        }
        .encode(&mut frame);
        frame
    }

    /// Rpc frame for call `call_id`.
    pub fn rpc(&self, call_id: ParameterId, value: &ParamValue) -> Vec<u8> {
        let payload = codec::value_to_bytes(value);
        let mut frame = self.start(MessageType::Rpc);
        ValueRecord {
            scene_id: RPC_SCOPE_ID,
            entity_id: RPC_TARGET_ID,
            parameter_id: call_id,
            type_tag: value.param_type().tag(),
            payload: &payload,
        }
        .encode(&mut frame);
        frame
    }

    /// Sync frame carrying this peer's time.
    pub fn sync(&self) -> Vec<u8> {
        self.start(MessageType::Sync)
    }

    /// Ping frame, as sent or echoed by this peer.
    pub fn ping(&self) -> Vec<u8> {
        self.start(MessageType::Ping)
    }

    /// Frame of an arbitrary, possibly unknown, message type byte.
    pub fn raw_frame(&self, message_type: u8, body: &[u8]) -> Vec<u8> {
        let mut frame = vec![self.client_id, self.clock.time(), message_type];
        frame.extend_from_slice(body);
        frame
    }
}

/// Overwrite the `record_length` of the first value record in `frame`.
pub fn with_record_length(mut frame: Vec<u8>, declared: u32) -> Vec<u8> {
    let at = HEADER_LEN + 6;
    if frame.len() >= at + 4 {
        frame[at..at + 4].copy_from_slice(&declared.to_le_bytes());
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_update_is_seventeen_bytes() {
        let peer = SyntheticPeer::new(4);
        let frame = peer.parameter_update(&[(3, 2, ParamValue::Float32(0.75))]);
        assert_eq!(frame.len(), 17);
        assert_eq!(&frame[..3], &[4, 0, 0]);
        assert_eq!(&frame[9..13], &14u32.to_le_bytes());
    }

    #[test]
    fn shuffling_is_seeded() {
        let records: Vec<_> = (0..8)
            .map(|i| (1, i, ParamValue::Int32(i32::from(i))))
            .collect();
        let a = SyntheticPeer::with_seed(2, 9).shuffled_updates(&records);
        let b = SyntheticPeer::with_seed(2, 9).shuffled_updates(&records);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn record_length_patch() {
        let peer = SyntheticPeer::new(4);
        let frame = with_record_length(peer.parameter_update(&[(1, 0, 1i32.into())]), 99);
        assert_eq!(&frame[9..13], &99u32.to_le_bytes());
    }
}
