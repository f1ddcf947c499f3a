//! HTTP artifact store
//!
//! `PUT {base}/artifacts/{id}/chunks/{seq}?final={bool}` carries the chunk
//! bytes; `GET {base}/artifacts/{id}/status` reports processing.

use super::store::{ProcessingStatus, RemoteStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteState {
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    progress: f32,
    state: RemoteState,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("riverside/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Rejected(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn chunk_url(&self, artifact_id: Uuid, sequence_number: u64) -> String {
        format!("{}/artifacts/{}/chunks/{}", self.base_url, artifact_id, sequence_number)
    }

    fn status_url(&self, artifact_id: Uuid) -> String {
        format!("{}/artifacts/{}/status", self.base_url, artifact_id)
    }
}

fn classify_status(status: StatusCode, body: String) -> StoreError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        StoreError::Transient(message)
    } else {
        StoreError::Rejected(message)
    }
}

fn classify_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Transient(error.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn upload_chunk(
        &self,
        artifact_id: Uuid,
        sequence_number: u64,
        bytes: Bytes,
        is_final: bool,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.chunk_url(artifact_id, sequence_number))
            .query(&[("final", is_final)])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }

    async fn poll_processing_status(&self, artifact_id: Uuid) -> Result<ProcessingStatus, StoreError> {
        let response = self
            .client
            .get(self.status_url(artifact_id))
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| StoreError::Transient(format!("invalid status body: {e}")))?;

        Ok(match body.state {
            RemoteState::Processing => ProcessingStatus::running(body.progress),
            RemoteState::Ready => ProcessingStatus::succeeded(),
            RemoteState::Failed => ProcessingStatus::failed(
                body.progress,
                body.error.unwrap_or_else(|| "remote processing failed".to_string()),
            ),
        })
    }
}
