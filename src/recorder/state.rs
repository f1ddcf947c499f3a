//! Recording state management
//!
//! Defines the recording state machine, session tracking and the chunks a
//! recording produces.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Recording completed normally
    Stopped,
    /// Capture was lost mid-recording
    Aborted,
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingState::Stopped | RecordingState::Aborted)
    }
}

/// One start-to-stop recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,

    pub state: RecordingState,

    /// Wall-clock start, for display only
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed seconds measured on the monotonic clock
    pub elapsed_seconds: u64,

    /// Sequence numbers of the chunks emitted so far (0, 1, 2, ...)
    pub chunk_sequence: Vec<u64>,

    /// Payload bytes emitted so far
    pub bytes_recorded: u64,

    /// Why the recording was aborted
    pub failure: Option<String>,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            state: RecordingState::Idle,
            started_at: None,
            elapsed_seconds: 0,
            chunk_sequence: Vec::new(),
            bytes_recorded: 0,
            failure: None,
        }
    }
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RecordingState::Recording,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Next sequence number to hand out
    pub fn next_sequence(&self) -> u64 {
        self.chunk_sequence.last().map_or(0, |last| last + 1)
    }
}

/// A bounded, ordered unit of recorded media
///
/// Immutable once produced; ownership moves from the recorder to the
/// upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub recording_id: Uuid,
    pub sequence_number: u64,
    pub payload: Bytes,
    pub is_final: bool,
    /// Recording time covered up to the end of this chunk
    pub elapsed_seconds: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    Started { recording_id: Uuid },
    /// Elapsed seconds changed
    Progress { recording_id: Uuid, elapsed_seconds: u64 },
    ChunkEmitted { recording_id: Uuid, sequence_number: u64, is_final: bool },
    Stopped { recording_id: Uuid, elapsed_seconds: u64 },
    Aborted { recording_id: Uuid, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_sequence_is_gap_free() {
        let mut session = RecordingSession::start();
        assert_eq!(session.next_sequence(), 0);
        session.chunk_sequence.push(0);
        session.chunk_sequence.push(1);
        assert_eq!(session.next_sequence(), 2);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&RecordingState::Aborted).unwrap();
        assert_eq!(json, "\"aborted\"");
        assert!(RecordingState::Stopped.is_terminal());
        assert!(!RecordingState::Recording.is_terminal());
    }
}
