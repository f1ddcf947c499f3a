//! Remote artifact store boundary

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Store call failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection reset, 5xx, throttling; worth another attempt
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The store refused the request; retrying cannot help
    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Store request timed out")]
    Timeout,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

/// Terminal signal of remote processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum ProcessingOutcome {
    Succeeded,
    Failed(String),
}

/// One observation of remote processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    /// 0..=100
    pub progress: f32,
    pub outcome: Option<ProcessingOutcome>,
}

impl ProcessingStatus {
    pub fn running(progress: f32) -> Self {
        Self {
            progress,
            outcome: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            progress: 100.0,
            outcome: Some(ProcessingOutcome::Succeeded),
        }
    }

    pub fn failed(progress: f32, reason: impl Into<String>) -> Self {
        Self {
            progress,
            outcome: Some(ProcessingOutcome::Failed(reason.into())),
        }
    }
}

/// Where artifacts are transferred to and processed
///
/// Chunks of one artifact are always sent in sequence order, one at a time;
/// a retried chunk reuses its sequence number, so implementations should
/// accept a repeated upload of the last acknowledged chunk.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload_chunk(
        &self,
        artifact_id: Uuid,
        sequence_number: u64,
        bytes: Bytes,
        is_final: bool,
    ) -> Result<(), StoreError>;

    async fn poll_processing_status(&self, artifact_id: Uuid) -> Result<ProcessingStatus, StoreError>;
}
