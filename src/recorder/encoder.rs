//! Chunk payload encoding
//!
//! The codec is opaque to the rest of the pipeline; the recorder only needs
//! something that appends frames to a buffer.

use crate::capture::MediaFrame;
use bytes::{BufMut, BytesMut};

/// Turns captured frames into chunk payload bytes
pub trait MediaEncoder: Send {
    fn encode(&mut self, frame: &MediaFrame, out: &mut BytesMut);

    /// Called once before the final chunk is cut
    fn finish(&mut self, _out: &mut BytesMut) {}
}

/// Length-prefixed, kind-tagged frame interleaving
///
/// Layout per frame: `tag: u8` (`b'V'`/`b'A'`), `len: u32` big-endian, payload.
#[derive(Debug, Default)]
pub struct InterleavedEncoder {
    frames: u64,
}

impl InterleavedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames
    }
}

impl MediaEncoder for InterleavedEncoder {
    fn encode(&mut self, frame: &MediaFrame, out: &mut BytesMut) {
        out.reserve(5 + frame.payload.len());
        out.put_u8(frame.kind.tag());
        out.put_u32(frame.payload.len() as u32);
        out.extend_from_slice(&frame.payload);
        self.frames += 1;
    }
}
