#![warn(missing_docs)]
//! Framing, routing, clock synchronization and transports for scene
//! parameter synchronization between peers.

pub mod clock;
pub mod distribution;
mod error;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use clock::{delta_time, ClockConfig, ClockSync, RttWindow};
pub use distribution::{BlobKind, DistributionServer, SceneBlobProvider, SceneBlobs};
pub use error::NetError;
pub use protocol::{
    FrameHeader, LockRecord, MessageType, ResetRecord, ValueRecord, HEADER_LEN, LOCK_RECORD_LEN,
    RECORD_HEADER_LEN, RESET_RECORD_LEN,
};
pub use router::{
    FrameReport, FrameSender, MessageRouter, NullHost, OutboundFrame, Route, SceneHost,
    UpdatePublisher,
};
pub use session::{
    announcement, is_announcement, poll_subscriber, relay_ready, RunningSession, SyncConfig,
    SyncSession,
};
pub use transport::{request, CommandSocket, PublishSocket, SubscribeSocket, Subscribers};
