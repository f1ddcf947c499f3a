//! Capture trait definitions
//!
//! Platform-agnostic types and traits for capture devices and live tracks.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

/// Kind of media a device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Video, TrackKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }

    /// Tag used by the chunk encoder
    pub fn tag(&self) -> u8 {
        match self {
            TrackKind::Video => b'V',
            TrackKind::Audio => b'A',
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about a capture device
///
/// Labels may be empty until permission has been granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque device identifier
    pub id: String,

    /// Media kind
    pub kind: TrackKind,

    /// Human readable name (may be empty before permission grant)
    pub label: String,
}

impl Device {
    pub fn new(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }

    pub fn has_label(&self) -> bool {
        !self.label.is_empty()
    }
}

/// Capture permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Prompt,
    Granted,
    Denied,
}

/// A single frame read from a live track
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: TrackKind,
    pub payload: Bytes,
}

/// Device registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied for {}", kinds_label(.0))]
    PermissionDenied(Vec<TrackKind>),

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),
}

fn kinds_label(kinds: &[TrackKind]) -> String {
    kinds
        .iter()
        .map(TrackKind::as_str)
        .collect::<Vec<_>>()
        .join("+")
}

/// Errors raised while acquiring a device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("No {0} device available")]
    NoDevice(TrackKind),

    #[error("Capture permission has not been granted")]
    PermissionRequired,

    #[error("Device acquisition cancelled")]
    Cancelled,

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Raised by a live track that stopped producing media
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} track on '{device_id}' ended: {reason}")]
pub struct TrackEnded {
    pub kind: TrackKind,
    pub device_id: String,
    pub reason: String,
}

/// Source of devices and live tracks (platform, virtual, ...)
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// List every capture device currently present
    async fn enumerate(&self) -> Result<Vec<Device>, DeviceError>;

    /// Ask the user for capture permission
    async fn request_permission(&self, kinds: &[TrackKind]) -> Result<(), DeviceError>;

    /// Open an exclusive hardware handle on a device
    ///
    /// The handle is released when the returned track is dropped.
    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<Box<dyn LiveTrack>, AcquisitionError>;

    /// Hot-plug notifications, if the backend supports them
    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}

/// A live, exclusively held capture track
#[async_trait]
pub trait LiveTrack: Send {
    fn kind(&self) -> TrackKind;

    fn device_id(&self) -> &str;

    /// Wait for the next frame. An error means the track is gone for good.
    async fn next_frame(&mut self) -> Result<Bytes, TrackEnded>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_message() {
        let err = DeviceError::PermissionDenied(vec![TrackKind::Video, TrackKind::Audio]);
        assert_eq!(err.to_string(), "Permission denied for video+audio");
    }

    #[test]
    fn test_track_kind_serializes_lowercase() {
        let json = serde_json::to_string(&TrackKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
    }

    #[test]
    fn test_device_label_presence() {
        assert!(!Device::new("v1", TrackKind::Video, "").has_label());
        assert!(Device::new("v1", TrackKind::Video, "Camera").has_label());
    }
}
