#![warn(missing_docs)]
//! Test surfaces for the sync stack: synthetic peers, recording hosts and
//! observers, and a JSONL traffic log.

mod peer;
mod recording;
mod traffic;

pub use peer::*;
pub use recording::*;
pub use traffic::*;
