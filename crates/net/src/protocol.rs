//! Frame and record layouts.
//!
//! Every frame starts with `[client_id: u8][time: u8][message_type: u8]`,
//! followed by zero or more records of the type named in the header. All
//! multi-byte integers are little-endian.
//!
//! Value record (ParameterUpdate and Rpc):
//! `[scene: u8][entity: u16][parameter: u16][type: u8][record_length: u32][payload]`
//! where `record_length` counts the 10 header bytes too.
//!
//! Lock record: `[scene: u8][entity: u16][state: u8]`
//!
//! ResetObject record: `[scene: u8][entity: u16]`

use crate::error::NetError;
use serde::{Deserialize, Serialize};
use tracer_sync_core::{EntityId, ParameterId, WireReader};

/// Size of the frame header.
pub const HEADER_LEN: usize = 3;
/// Size of a value record header.
pub const RECORD_HEADER_LEN: usize = 10;
/// Size of a lock record.
pub const LOCK_RECORD_LEN: usize = 4;
/// Size of a reset record.
pub const RESET_RECORD_LEN: usize = 3;

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Parameter value (and track) updates.
    ParameterUpdate = 0,
    /// Entity lock and unlock.
    Lock = 1,
    /// Clock master time broadcast.
    Sync = 2,
    /// Round-trip probe.
    Ping = 3,
    /// Request to re-send state (not handled).
    ResendUpdate = 4,
    /// Undo/redo history entry (not handled).
    UndoRedoAdd = 5,
    /// Return an entity to its registered values.
    ResetObject = 6,
    /// Data hub traffic (not handled).
    DataHub = 7,
    /// One-shot remote call.
    Rpc = 8,
}

impl MessageType {
    /// Wire byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::ParameterUpdate),
            1 => Ok(MessageType::Lock),
            2 => Ok(MessageType::Sync),
            3 => Ok(MessageType::Ping),
            4 => Ok(MessageType::ResendUpdate),
            5 => Ok(MessageType::UndoRedoAdd),
            6 => Ok(MessageType::ResetObject),
            7 => Ok(MessageType::DataHub),
            8 => Ok(MessageType::Rpc),
            other => Err(NetError::UnknownMessageType(other)),
        }
    }
}

/// The 3-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender's client id.
    pub client_id: u8,
    /// Sender's logical time.
    pub time: u8,
    /// Kind of records that follow.
    pub message_type: MessageType,
}

impl FrameHeader {
    /// Start a frame buffer with this header.
    pub fn start_frame(&self) -> Vec<u8> {
        vec![self.client_id, self.time, self.message_type.tag()]
    }

    /// Split `frame` into its header and body.
    pub fn decode(frame: &[u8]) -> Result<(FrameHeader, &[u8]), NetError> {
        if frame.len() < HEADER_LEN {
            return Err(NetError::ShortFrame(frame.len()));
        }
        let header = FrameHeader {
            client_id: frame[0],
            time: frame[1],
            message_type: MessageType::try_from(frame[2])?,
        };
        Ok((header, &frame[HEADER_LEN..]))
    }
}

/// A ParameterUpdate or Rpc record.
///
/// For Rpc records `scene_id` is the scope, `entity_id` the target and
/// `parameter_id` the call id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRecord<'a> {
    /// Scene (or scope) id.
    pub scene_id: u8,
    /// Entity (or target) id.
    pub entity_id: EntityId,
    /// Parameter (or call) id.
    pub parameter_id: ParameterId,
    /// Value type tag.
    pub type_tag: u8,
    /// Serialized parameter.
    pub payload: &'a [u8],
}

impl<'a> ValueRecord<'a> {
    /// Append this record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let record_length = (RECORD_HEADER_LEN + self.payload.len()) as u32;
        out.push(self.scene_id);
        out.extend_from_slice(&self.entity_id.to_le_bytes());
        out.extend_from_slice(&self.parameter_id.to_le_bytes());
        out.push(self.type_tag);
        out.extend_from_slice(&record_length.to_le_bytes());
        out.extend_from_slice(self.payload);
    }

    /// Read the next record from a frame body.
    ///
    /// Any error leaves the reader in an unspecified position: the caller
    /// must abandon the rest of the frame.
    pub fn decode(reader: &mut WireReader<'a>) -> Result<Self, NetError> {
        let remaining = reader.remaining();
        if remaining < RECORD_HEADER_LEN {
            return Err(NetError::TruncatedRecord {
                needed: RECORD_HEADER_LEN,
                remaining,
            });
        }
        let scene_id = reader.read_u8("record scene")?;
        let entity_id = reader.read_u16("record entity")?;
        let parameter_id = reader.read_u16("record parameter")?;
        let type_tag = reader.read_u8("record type")?;
        let declared = reader.read_u32("record length")?;
        let payload_len = (declared as usize)
            .checked_sub(RECORD_HEADER_LEN)
            .filter(|len| *len <= reader.remaining())
            .ok_or(NetError::RecordLength {
                declared,
                remaining,
            })?;
        let payload = reader.take(payload_len, "record payload")?;
        Ok(Self {
            scene_id,
            entity_id,
            parameter_id,
            type_tag,
            payload,
        })
    }
}

/// Lock or unlock of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    /// Scene id.
    pub scene_id: u8,
    /// Locked entity.
    pub entity_id: EntityId,
    /// `true` to lock.
    pub locked: bool,
}

impl LockRecord {
    /// Append this record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.scene_id);
        out.extend_from_slice(&self.entity_id.to_le_bytes());
        out.push(u8::from(self.locked));
    }

    /// Read the next lock record.
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, NetError> {
        if reader.remaining() < LOCK_RECORD_LEN {
            return Err(NetError::TruncatedRecord {
                needed: LOCK_RECORD_LEN,
                remaining: reader.remaining(),
            });
        }
        Ok(Self {
            scene_id: reader.read_u8("lock scene")?,
            entity_id: reader.read_u16("lock entity")?,
            locked: reader.read_u8("lock state")? != 0,
        })
    }
}

/// Reset of one entity to its registered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRecord {
    /// Scene id.
    pub scene_id: u8,
    /// Entity to reset.
    pub entity_id: EntityId,
}

impl ResetRecord {
    /// Append this record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.scene_id);
        out.extend_from_slice(&self.entity_id.to_le_bytes());
    }

    /// Read the next reset record.
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, NetError> {
        if reader.remaining() < RESET_RECORD_LEN {
            return Err(NetError::TruncatedRecord {
                needed: RESET_RECORD_LEN,
                remaining: reader.remaining(),
            });
        }
        Ok(Self {
            scene_id: reader.read_u8("reset scene")?,
            entity_id: reader.read_u16("reset entity")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types_roundtrip() {
        for tag in 0u8..=8 {
            assert_eq!(MessageType::try_from(tag).unwrap().tag(), tag);
        }
        assert!(matches!(
            MessageType::try_from(9),
            Err(NetError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(matches!(
            FrameHeader::decode(&[1, 2]),
            Err(NetError::ShortFrame(2))
        ));
    }

    #[test]
    fn value_record_layout() {
        let payload = 0.75f32.to_le_bytes();
        let mut out = Vec::new();
        ValueRecord {
            scene_id: 7,
            entity_id: 3,
            parameter_id: 2,
            type_tag: 4,
            payload: &payload,
        }
        .encode(&mut out);
        assert_eq!(out.len(), 14);
        assert_eq!(out[0], 7);
        assert_eq!(&out[1..3], &[3, 0]);
        assert_eq!(&out[3..5], &[2, 0]);
        assert_eq!(out[5], 4);
        assert_eq!(&out[6..10], &14u32.to_le_bytes());

        let mut reader = WireReader::new(&out);
        let record = ValueRecord::decode(&mut reader).unwrap();
        assert_eq!(record.payload, &payload);
        assert!(reader.is_empty());
    }

    #[test]
    fn record_length_past_the_frame_is_rejected() {
        let mut out = Vec::new();
        ValueRecord {
            scene_id: 1,
            entity_id: 1,
            parameter_id: 0,
            type_tag: 4,
            payload: &[0; 4],
        }
        .encode(&mut out);
        out[6..10].copy_from_slice(&40u32.to_le_bytes());
        assert!(matches!(
            ValueRecord::decode(&mut WireReader::new(&out)),
            Err(NetError::RecordLength { declared: 40, .. })
        ));

        out[6..10].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            ValueRecord::decode(&mut WireReader::new(&out)),
            Err(NetError::RecordLength { declared: 9, .. })
        ));
    }

    #[test]
    fn lock_and_reset_records_roundtrip() {
        let lock = LockRecord {
            scene_id: 1,
            entity_id: 513,
            locked: true,
        };
        let mut out = Vec::new();
        lock.encode(&mut out);
        assert_eq!(out, vec![1, 1, 2, 1]);
        assert_eq!(LockRecord::decode(&mut WireReader::new(&out)).unwrap(), lock);

        let reset = ResetRecord {
            scene_id: 1,
            entity_id: 4,
        };
        let mut out = Vec::new();
        reset.encode(&mut out);
        assert_eq!(ResetRecord::decode(&mut WireReader::new(&out)).unwrap(), reset);
        assert!(ResetRecord::decode(&mut WireReader::new(&out[..2])).is_err());
    }
}
