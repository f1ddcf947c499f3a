//! In-process artifact store
//!
//! Reassembles chunks in memory and fakes processing by advancing a fixed
//! step on every status poll.

use super::store::{ProcessingStatus, RemoteStore, StoreError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoredArtifact {
    chunks: Vec<Bytes>,
    finalized: bool,
    progress: f32,
}

pub struct MemoryStore {
    artifacts: Mutex<HashMap<Uuid, StoredArtifact>>,
    step: f32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_step(25.0)
    }

    /// Processing advances by `step` percent per poll
    pub fn with_step(step: f32) -> Self {
        Self {
            artifacts: Mutex::new(HashMap::new()),
            step: step.max(f32::EPSILON),
        }
    }

    /// Concatenated payload of every chunk received so far
    pub fn assembled(&self, artifact_id: Uuid) -> Option<Bytes> {
        let artifacts = self.artifacts.lock();
        let stored = artifacts.get(&artifact_id)?;
        let mut out = BytesMut::new();
        for chunk in &stored.chunks {
            out.extend_from_slice(chunk);
        }
        Some(out.freeze())
    }

    pub fn chunk_count(&self, artifact_id: Uuid) -> usize {
        self.artifacts
            .lock()
            .get(&artifact_id)
            .map_or(0, |stored| stored.chunks.len())
    }

    pub fn is_finalized(&self, artifact_id: Uuid) -> bool {
        self.artifacts
            .lock()
            .get(&artifact_id)
            .is_some_and(|stored| stored.finalized)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upload_chunk(
        &self,
        artifact_id: Uuid,
        sequence_number: u64,
        bytes: Bytes,
        is_final: bool,
    ) -> Result<(), StoreError> {
        let mut artifacts = self.artifacts.lock();
        let stored = artifacts.entry(artifact_id).or_default();

        let next = stored.chunks.len() as u64;
        if sequence_number + 1 == next {
            // retry of a chunk whose ack got lost
            return Ok(());
        }
        if stored.finalized {
            return Err(StoreError::Rejected(format!(
                "artifact {artifact_id} is already finalized"
            )));
        }
        if sequence_number != next {
            return Err(StoreError::Rejected(format!(
                "expected chunk {next}, got {sequence_number}"
            )));
        }

        stored.chunks.push(bytes);
        stored.finalized = is_final;
        Ok(())
    }

    async fn poll_processing_status(&self, artifact_id: Uuid) -> Result<ProcessingStatus, StoreError> {
        let mut artifacts = self.artifacts.lock();
        let Some(stored) = artifacts.get_mut(&artifact_id) else {
            return Err(StoreError::Rejected(format!("unknown artifact {artifact_id}")));
        };
        if !stored.finalized {
            return Err(StoreError::Rejected(format!(
                "artifact {artifact_id} has no final chunk"
            )));
        }

        stored.progress = (stored.progress + self.step).min(100.0);
        if stored.progress >= 100.0 {
            Ok(ProcessingStatus::succeeded())
        } else {
            Ok(ProcessingStatus::running(stored.progress))
        }
    }
}
