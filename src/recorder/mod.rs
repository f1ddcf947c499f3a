//! Recording system module
//!
//! - `Recorder` turns a capture stream into an ordered chunk sequence
//! - `MediaEncoder` is the opaque codec seam
//! - `RecordingSession` tracks state, elapsed time and emitted sequence numbers

pub mod coordinator;
pub mod encoder;
pub mod state;

pub use coordinator::{Recorder, RecorderError, RecorderResult, RecorderView};
pub use encoder::{InterleavedEncoder, MediaEncoder};
pub use state::{Chunk, RecordingEvent, RecordingSession, RecordingState};
