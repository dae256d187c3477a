//! JSONL log of frames seen by a test, for inspecting failures.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracer_sync_net::FrameHeader;

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received by the peer under test.
    Inbound,
    /// Sent by the peer under test.
    Outbound,
}

/// One logged frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Wall-clock time the frame was logged.
    pub at: DateTime<Utc>,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Sender id from the header, if the header decoded.
    pub client_id: Option<u8>,
    /// Logical time from the header.
    pub time: Option<u8>,
    /// Message type name from the header.
    pub message_type: Option<String>,
    /// Frame length in bytes.
    pub len: usize,
    /// Frame bytes as lowercase hex.
    pub hex: String,
}

impl TrafficRecord {
    /// Describe `frame`, stamped with the current time.
    pub fn from_frame(direction: Direction, frame: &[u8]) -> Self {
        let header = FrameHeader::decode(frame).ok().map(|(header, _)| header);
        Self {
            at: Utc::now(),
            direction,
            client_id: header.map(|h| h.client_id),
            time: header.map(|h| h.time),
            message_type: header.map(|h| format!("{:?}", h.message_type)),
            len: frame.len(),
            hex: frame.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

/// A sink that writes newline-delimited JSON to disk.
pub struct TrafficLog {
    file: File,
}

impl TrafficLog {
    /// Create a new log at `path`, creating parent dirs if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Append a record to the log.
    pub fn write(&mut self, record: &TrafficRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }

    /// Log `frame` travelling in `direction`.
    pub fn log_frame(&mut self, direction: Direction, frame: &[u8]) -> Result<()> {
        self.write(&TrafficRecord::from_frame(direction, frame))
    }
}

/// Read every record back from a log file.
pub fn read_traffic_log<P: AsRef<Path>>(path: P) -> Result<Vec<TrafficRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn traffic_log_roundtrips() {
        let path = std::env::temp_dir().join(format!(
            "traffic-{}.jsonl",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut log = TrafficLog::create(&path).expect("log create");
        log.log_frame(Direction::Inbound, &[7, 3, 2]).unwrap();
        log.log_frame(Direction::Outbound, &[1]).unwrap();
        drop(log);

        let records = read_traffic_log(&path).expect("log readable");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].client_id, Some(7));
        assert_eq!(records[0].message_type.as_deref(), Some("Sync"));
        assert_eq!(records[0].hex, "070302");
        assert_eq!(records[1].message_type, None);
        let _ = fs::remove_file(&path);
    }
}
