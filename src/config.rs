//! Application configuration
//!
//! Loaded from a JSON file; every field has a default so a partial (or
//! missing) file is fine.

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub recorder: RecorderConfig,
    pub upload: UploadConfig,
    pub processing: ProcessingConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
}

/// Chunk cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Wall-clock interval between chunk flushes
    pub chunk_interval_ms: u64,
    /// A chunk is flushed early once its buffer reaches this size
    pub max_chunk_bytes: usize,
    /// Frames buffered between the capture stream and the recorder
    pub frame_queue_depth: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 1000,
            max_chunk_bytes: 1024 * 1024,
            frame_queue_depth: 256,
        }
    }
}

impl RecorderConfig {
    /// Never zero; a zero period would panic the flush timer
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }
}

/// Chunk transfer retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadConfig {
    /// Attempts per chunk, including the first one
    pub max_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
    /// Per-attempt deadline; an expired attempt is retried with the same sequence number
    pub request_timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff_ms: 200,
            max_backoff_ms: 5000,
            jitter: true,
            request_timeout_ms: 30_000,
        }
    }
}

impl UploadConfig {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Remote processing observation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessingConfig {
    pub poll_interval_ms: u64,
    /// Fail with a stall once no progress was observed for this long
    pub stall_timeout_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            stall_timeout_ms: 60_000,
        }
    }
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Artifact store endpoint; the in-process store is used when unset
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "riverside=info,riverside_lib=info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub room_id: String,
    pub display_name: String,
    /// How long the command-line session records before stopping
    pub record_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: "studio".to_string(),
            display_name: "You".to_string(),
            record_seconds: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.recorder.chunk_interval_ms == 0 {
            return Err(AppError::Config("recorder.chunkIntervalMs must be > 0".into()));
        }
        if self.recorder.max_chunk_bytes == 0 {
            return Err(AppError::Config("recorder.maxChunkBytes must be > 0".into()));
        }
        if self.upload.max_attempts == 0 {
            return Err(AppError::Config("upload.maxAttempts must be >= 1".into()));
        }
        if self.upload.min_backoff_ms > self.upload.max_backoff_ms {
            return Err(AppError::Config(
                "upload.minBackoffMs must not exceed upload.maxBackoffMs".into(),
            ));
        }
        if self.upload.request_timeout_ms == 0 {
            return Err(AppError::Config("upload.requestTimeoutMs must be > 0".into()));
        }
        if self.processing.poll_interval_ms == 0 || self.processing.stall_timeout_ms == 0 {
            return Err(AppError::Config(
                "processing intervals must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.recorder.chunk_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let recorder = RecorderConfig {
            chunk_interval_ms: 0,
            ..RecorderConfig::default()
        };
        let processing = ProcessingConfig {
            poll_interval_ms: 0,
            ..ProcessingConfig::default()
        };

        assert_eq!(recorder.chunk_interval(), Duration::from_millis(1));
        assert_eq!(processing.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "upload": {{ "maxAttempts": 3 }}, "remote": {{ "baseUrl": "http://localhost:9000" }} }}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.max_backoff_ms, 5000);
        assert_eq!(config.remote.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.processing.stall_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.upload.min_backoff_ms = 10_000;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(AppError::Serialization(_))
        ));
    }
}
