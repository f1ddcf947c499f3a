//! Reactive UI state

use super::roster::{Participant, Roster};
use crate::capture::{CaptureView, Device, DeviceRegistry, PermissionState, TrackSelection};
use crate::recorder::{RecorderView, RecordingState};
use crate::upload::{Artifact, UploadPipeline};
use crate::utils::error::ErrorResponse;
use crate::utils::format::format_elapsed;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Everything the UI renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub room_id: String,
    pub permission: PermissionState,
    pub devices: Vec<Device>,
    pub selection: Vec<TrackSelection>,
    pub capture_ready: bool,
    pub recording_state: RecordingState,
    pub recording_id: Option<Uuid>,
    pub elapsed_seconds: u64,
    /// `HH:MM:SS`
    pub elapsed_label: String,
    pub artifacts: Vec<Artifact>,
    pub participants: Vec<Participant>,
    pub last_error: Option<ErrorResponse>,
}

/// Read handles onto every component, cheap to clone into background tasks
#[derive(Clone)]
pub(crate) struct SnapshotSource {
    pub room_id: String,
    pub registry: DeviceRegistry,
    pub capture: CaptureView,
    pub recorder: RecorderView,
    pub pipeline: UploadPipeline,
    pub roster: Arc<RwLock<Roster>>,
    pub ready: Arc<AtomicBool>,
    pub last_error: Arc<RwLock<Option<ErrorResponse>>>,
    pub publisher: Arc<watch::Sender<SessionSnapshot>>,
}

impl SnapshotSource {
    pub fn capture_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.capture.is_live()
    }

    pub fn build(&self) -> SessionSnapshot {
        let recording = self.recorder.session();
        SessionSnapshot {
            room_id: self.room_id.clone(),
            permission: self.registry.permission(),
            devices: self.registry.devices(),
            selection: self.capture.selection(),
            capture_ready: self.capture_ready(),
            recording_state: recording.state,
            recording_id: (recording.state != RecordingState::Idle).then_some(recording.id),
            elapsed_seconds: recording.elapsed_seconds,
            elapsed_label: format_elapsed(recording.elapsed_seconds),
            artifacts: self.pipeline.artifacts(),
            participants: self.roster.read().participants(),
            last_error: self.last_error.read().clone(),
        }
    }

    /// Publish a fresh snapshot if anything changed
    pub fn refresh(&self) {
        let next = self.build();
        self.publisher.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    pub fn report(&self, error: ErrorResponse) {
        *self.last_error.write() = Some(error);
    }
}
