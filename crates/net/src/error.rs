//! Errors raised while framing, routing and transporting messages.

use thiserror::Error;
use tracer_sync_core::SyncError;

/// Network-side failures.
///
/// Inbound variants are logged and the offending frame or record dropped.
/// Transport variants make a polling task skip its tick.
#[derive(Debug, Error)]
pub enum NetError {
    /// Frame shorter than the 3-byte header.
    #[error("frame of {0} bytes is shorter than the header")]
    ShortFrame(usize),
    /// Header names a message type outside the known set.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    /// Fewer bytes left than a record header needs.
    #[error("truncated record: needs {needed} bytes, {remaining} remain")]
    TruncatedRecord {
        /// Header size of the record kind.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },
    /// A record's declared length is below its header size or past the frame.
    #[error("record length {declared} is invalid with {remaining} bytes left in the frame")]
    RecordLength {
        /// Declared `record_length`.
        declared: u32,
        /// Bytes left in the frame at the record start.
        remaining: usize,
    },
    /// Socket not bound or connected yet.
    #[error("socket unavailable: {0}")]
    SocketUnavailable(&'static str),
    /// Underlying socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Decode or lookup failure from the data model.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl NetError {
    /// Whether the rest of the frame must be abandoned.
    pub fn aborts_frame(&self) -> bool {
        matches!(
            self,
            NetError::ShortFrame(_)
                | NetError::UnknownMessageType(_)
                | NetError::TruncatedRecord { .. }
                | NetError::RecordLength { .. }
        )
    }
}
