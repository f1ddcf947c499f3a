//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use riverside_lib::capture::VirtualBackend;
use riverside_lib::config::{AppConfig, ProcessingConfig, UploadConfig};
use riverside_lib::recorder::Chunk;
use riverside_lib::session::SessionController;
use riverside_lib::upload::{
    MemoryStore, ProcessingStatus, RemoteStore, StoreError, UploadPipeline,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Short backoff and timeouts so paused-clock tests stay readable.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.upload = UploadConfig {
        max_attempts: 3,
        min_backoff_ms: 10,
        max_backoff_ms: 50,
        jitter: false,
        request_timeout_ms: 1000,
    };
    config.processing = ProcessingConfig {
        poll_interval_ms: 100,
        stall_timeout_ms: 1000,
    };
    config
}

pub fn pipeline(store: Arc<dyn RemoteStore>) -> UploadPipeline {
    let config = fast_config();
    UploadPipeline::new(store, &config.upload, config.processing)
}

pub fn controller(backend: &VirtualBackend, store: Arc<dyn RemoteStore>) -> SessionController {
    SessionController::new(fast_config(), Arc::new(backend.clone()), store)
}

/// Channel pre-loaded with chunks carrying the given `(sequence, is_final)` pairs.
pub fn chunk_feed(recording_id: Uuid, sequence: &[(u64, bool)]) -> mpsc::UnboundedReceiver<Chunk> {
    let (tx, rx) = mpsc::unbounded_channel();
    for &(sequence_number, is_final) in sequence {
        tx.send(Chunk {
            recording_id,
            sequence_number,
            payload: Bytes::from(vec![sequence_number as u8 + 1; 64]),
            is_final,
            elapsed_seconds: sequence_number,
        })
        .unwrap();
    }
    rx
}

/// `0..n` with only the last chunk final.
pub fn valid_sequence(n: u64) -> Vec<(u64, bool)> {
    (0..n).map(|seq| (seq, seq + 1 == n)).collect()
}

#[derive(Debug, Clone, Default)]
enum UploadScript {
    #[default]
    Reliable,
    /// Fail transiently this many times per chunk before accepting it
    FailFirst(u32),
    AlwaysTransient,
    Reject,
}

#[derive(Debug, Clone, Default)]
enum ProcessingScript {
    #[default]
    Advance,
    /// Report this progress forever
    Stall(f32),
    Fail(String),
}

/// A [`MemoryStore`] with scripted failures, latency and call accounting.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    upload: UploadScript,
    processing: ProcessingScript,
    upload_delay: Duration,
    attempts: Mutex<HashMap<(Uuid, u64), u32>>,
    upload_calls: AtomicU32,
    polls: AtomicU32,
}

impl ScriptedStore {
    pub fn reliable() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            upload: UploadScript::FailFirst(failures),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            upload: UploadScript::AlwaysTransient,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            upload: UploadScript::Reject,
            ..Self::default()
        }
    }

    pub fn stalling_at(progress: f32) -> Self {
        Self {
            processing: ProcessingScript::Stall(progress),
            ..Self::default()
        }
    }

    pub fn failing_processing(reason: &str) -> Self {
        Self {
            processing: ProcessingScript::Fail(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn upload_calls(&self) -> u32 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, artifact_id: Uuid, sequence_number: u64) -> u32 {
        self.attempts
            .lock()
            .get(&(artifact_id, sequence_number))
            .copied()
            .unwrap_or(0)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn chunk_count(&self, artifact_id: Uuid) -> usize {
        self.inner.chunk_count(artifact_id)
    }

    pub fn assembled(&self, artifact_id: Uuid) -> Option<Bytes> {
        self.inner.assembled(artifact_id)
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn upload_chunk(
        &self,
        artifact_id: Uuid,
        sequence_number: u64,
        bytes: Bytes,
        is_final: bool,
    ) -> Result<(), StoreError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry((artifact_id, sequence_number)).or_insert(0);
            *count += 1;
            *count
        };

        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }

        match self.upload {
            UploadScript::Reliable => {}
            UploadScript::FailFirst(failures) if attempt <= failures => {
                return Err(StoreError::Transient(format!("attempt {attempt} dropped")));
            }
            UploadScript::FailFirst(_) => {}
            UploadScript::AlwaysTransient => {
                return Err(StoreError::Transient("503 Service Unavailable".into()));
            }
            UploadScript::Reject => {
                return Err(StoreError::Rejected("413 Payload Too Large".into()));
            }
        }
        self.inner
            .upload_chunk(artifact_id, sequence_number, bytes, is_final)
            .await
    }

    async fn poll_processing_status(&self, artifact_id: Uuid) -> Result<ProcessingStatus, StoreError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match &self.processing {
            ProcessingScript::Advance => self.inner.poll_processing_status(artifact_id).await,
            ProcessingScript::Stall(progress) => Ok(ProcessingStatus::running(*progress)),
            ProcessingScript::Fail(reason) => Ok(ProcessingStatus::failed(10.0, reason.clone())),
        }
    }
}
