//! Session lifecycle controller
//!
//! Sequences device registry, capture session, recorder and upload pipeline
//! behind the operations the UI issues: prepare, set a track, toggle
//! recording, leave.

use super::roster::{RemoteStream, Roster, MAX_PARTICIPANTS};
use super::snapshot::{SessionSnapshot, SnapshotSource};
use crate::capture::{
    AcquisitionError, CaptureSession, DeviceError, DeviceRegistry, MediaBackend, TrackKind,
    TrackSelection,
};
use crate::config::AppConfig;
use crate::recorder::{Recorder, RecorderError, RecordingEvent};
use crate::upload::{ArtifactEvent, ArtifactMeta, RemoteStore, UploadPipeline};
use crate::utils::error::ErrorResponse;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Controller errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session is not ready: capture has not been prepared")]
    NotReady,

    #[error("Room is full ({0} participants)")]
    RoomFull(usize),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Outcome of [`SessionController::toggle_recording`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingToggle {
    Started {
        recording_id: Uuid,
        artifact_id: Uuid,
    },
    Stopped {
        recording_id: Uuid,
        artifact_id: Uuid,
        elapsed_seconds: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct CurrentRecording {
    recording_id: Uuid,
    artifact_id: Uuid,
}

pub struct SessionController {
    config: AppConfig,
    registry: DeviceRegistry,
    capture: CaptureSession,
    recorder: Recorder,
    pipeline: UploadPipeline,
    source: SnapshotSource,
    current: Option<CurrentRecording>,
    recordings_started: u32,
    /// Cancels pending device acquisition; replaced after each use
    cancel: CancellationToken,
    relay: JoinHandle<()>,
}

impl SessionController {
    /// Build a controller; must be called inside a Tokio runtime
    pub fn new(config: AppConfig, backend: Arc<dyn MediaBackend>, store: Arc<dyn RemoteStore>) -> Self {
        let registry = DeviceRegistry::new(backend.clone());
        let capture = CaptureSession::new(backend);
        let recorder = Recorder::new(config.recorder.clone());
        let pipeline = UploadPipeline::new(store, &config.upload, config.processing.clone());

        let initial = SessionSnapshot {
            room_id: config.session.room_id.clone(),
            permission: Default::default(),
            devices: Vec::new(),
            selection: capture.selection(),
            capture_ready: false,
            recording_state: Default::default(),
            recording_id: None,
            elapsed_seconds: 0,
            elapsed_label: crate::utils::format::format_elapsed(0),
            artifacts: Vec::new(),
            participants: Vec::new(),
            last_error: None,
        };
        let (publisher, _) = watch::channel(initial);

        let source = SnapshotSource {
            room_id: config.session.room_id.clone(),
            registry: registry.clone(),
            capture: capture.view(),
            recorder: recorder.view(),
            pipeline: pipeline.clone(),
            roster: Arc::new(RwLock::new(Roster::default())),
            ready: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(RwLock::new(None)),
            publisher: Arc::new(publisher),
        };

        let relay = tokio::spawn(relay_events(
            source.clone(),
            recorder.subscribe(),
            pipeline.subscribe(),
        ));

        Self {
            config,
            registry,
            capture,
            recorder,
            pipeline,
            source,
            current: None,
            recordings_started: 0,
            cancel: CancellationToken::new(),
            relay,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    pub fn is_ready(&self) -> bool {
        self.source.capture_ready()
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.source.build()
    }

    /// Snapshot stream, refreshed on every change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.source.refresh();
        self.source.publisher.subscribe()
    }

    /// Token that aborts a pending `prepare`/`set_track` from another task
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enumerate, ask for permission and acquire the initial capture stream
    ///
    /// On denial nothing is acquired and the session stays not-ready.
    pub async fn prepare(&mut self) -> SessionResult<()> {
        let token = self.cancel.clone();
        let result = cancellable(&token, self.acquire_initial()).await;

        if result.is_err() {
            self.source.ready.store(false, Ordering::Release);
            if token.is_cancelled() {
                self.capture.release_all().await;
            }
        }
        self.rearm(&token);
        self.finish(result)
    }

    async fn acquire_initial(&mut self) -> SessionResult<()> {
        self.registry.enumerate().await?;

        if let Err(e) = self.registry.request_permission(&TrackKind::ALL).await {
            self.capture.release_all().await;
            return Err(e.into());
        }

        let mut selections = Vec::with_capacity(TrackKind::ALL.len());
        for kind in TrackKind::ALL {
            let current = self.capture.view().selection_for(kind);
            let device_id = self.registry.resolve(kind, current.device_id.as_deref());
            let enabled = current.device_id.is_none() || current.enabled;
            selections.push(TrackSelection::new(kind, device_id, enabled));
        }

        self.capture.configure(&selections).await?;

        if !self.capture.is_live() {
            return Err(AcquisitionError::NoDevice(TrackKind::Video).into());
        }

        self.source.ready.store(true, Ordering::Release);
        self.source
            .roster
            .write()
            .join_local(&self.config.session.display_name, &self.capture.selection());
        tracing::info!(
            "Session '{}' prepared: {:?}",
            self.config.session.room_id,
            self.capture.selection()
        );
        Ok(())
    }

    /// Select a device (or none) for `kind` and set its enabled flag
    pub async fn set_track(&mut self, kind: TrackKind, device_id: Option<String>, enabled: bool) -> SessionResult<()> {
        let token = self.cancel.clone();
        let selection = TrackSelection::new(kind, device_id, enabled);
        let result = cancellable(&token, async {
            self.capture.set_track(selection).await.map_err(SessionError::from)
        })
        .await;

        if token.is_cancelled() {
            self.capture.reconcile(kind);
        }
        self.rearm(&token);
        self.source.roster.write().sync_local(&self.capture.selection());
        self.finish(result)
    }

    /// A fired token only aborts the operation it was armed for
    fn rearm(&mut self, token: &CancellationToken) {
        if token.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    /// Start a recording, or stop the current one
    pub async fn toggle_recording(&mut self) -> SessionResult<RecordingToggle> {
        let result = match self.current.take() {
            Some(current) => self.stop_recording(current).await,
            None => self.start_recording(),
        };
        self.finish(result)
    }

    fn start_recording(&mut self) -> SessionResult<RecordingToggle> {
        if !self.source.capture_ready() {
            return Err(SessionError::NotReady);
        }
        let stream = self.capture.stream().ok_or(SessionError::NotReady)?;
        let chunks = self.recorder.start(stream)?;
        let recording_id = self.recorder.session().id;

        self.recordings_started += 1;
        let meta = ArtifactMeta {
            recording_id,
            name: format!(
                "{} recording #{}",
                self.config.session.room_id, self.recordings_started
            ),
            participants_count: self.source.roster.read().len().max(1),
        };
        let artifact_id = self.pipeline.ingest(meta, chunks);

        self.current = Some(CurrentRecording {
            recording_id,
            artifact_id,
        });
        Ok(RecordingToggle::Started {
            recording_id,
            artifact_id,
        })
    }

    async fn stop_recording(&mut self, current: CurrentRecording) -> SessionResult<RecordingToggle> {
        let session = self.recorder.stop().await?;
        Ok(RecordingToggle::Stopped {
            recording_id: current.recording_id,
            artifact_id: current.artifact_id,
            elapsed_seconds: session.elapsed_seconds,
        })
    }

    /// Tear down capture and release every device handle
    ///
    /// An active recording is stopped so its final chunk reaches the
    /// pipeline; uploads already handed over keep running.
    pub async fn leave(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();

        if let Some(current) = self.current.take() {
            if let Err(e) = self.stop_recording(current).await {
                tracing::warn!("Recording ended with error while leaving: {}", e);
                self.source.report(ErrorResponse::from(&e));
            }
        }

        self.capture.release_all().await;
        self.source.ready.store(false, Ordering::Release);
        self.source.roster.write().clear();
        self.source.refresh();

        tracing::info!(
            "Left session '{}' ({} upload(s) still in flight)",
            self.config.session.room_id,
            self.pipeline.in_flight()
        );
    }

    /// React to a hot-plug notification
    ///
    /// Re-enumerates; a selected device that vanished is replaced by the
    /// first available device of its kind. Returns whether capture was
    /// reconfigured.
    ///
    /// Not called automatically: drive it from
    /// `registry().subscribe_changes()`.
    pub async fn handle_device_change(&mut self) -> SessionResult<bool> {
        let result = self.reconcile_devices().await;
        self.source.roster.write().sync_local(&self.capture.selection());
        self.finish(result)
    }

    async fn reconcile_devices(&mut self) -> SessionResult<bool> {
        self.registry.enumerate().await?;
        if !self.source.ready.load(Ordering::Acquire) {
            return Ok(false);
        }

        let mut reconfigured = false;
        for kind in TrackKind::ALL {
            let selection = self.capture.view().selection_for(kind);
            let Some(device_id) = selection.device_id.as_deref() else {
                continue;
            };
            if self.registry.find(kind, device_id).is_some() {
                continue;
            }

            let fallback = self.registry.first_of(kind).map(|d| d.id);
            tracing::warn!(
                "{} device '{}' disappeared, falling back to {:?}",
                kind,
                device_id,
                fallback
            );
            self.capture
                .set_track(TrackSelection::new(kind, fallback, selection.enabled))
                .await?;
            reconfigured = true;
        }
        Ok(reconfigured)
    }

    /// Extension point for a media transport delivering remote participants
    pub fn on_remote_track(&mut self, participant_id: &str, stream: RemoteStream) -> SessionResult<()> {
        let accepted = self.source.roster.write().apply_remote(participant_id, &stream);
        let result = if accepted {
            tracing::debug!("Remote participant '{}' updated", participant_id);
            Ok(())
        } else {
            Err(SessionError::RoomFull(MAX_PARTICIPANTS))
        };
        self.finish(result)
    }

    /// Record the error for the UI and publish a fresh snapshot
    fn finish<T>(&self, result: SessionResult<T>) -> SessionResult<T> {
        if let Err(e) = &result {
            tracing::warn!("Session operation failed: {}", e);
            self.source.report(ErrorResponse::from(e));
        }
        self.source.refresh();
        result
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.relay.abort();
    }
}

async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> SessionResult<T>
where
    F: Future<Output = SessionResult<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(AcquisitionError::Cancelled.into()),
        result = fut => result,
    }
}

/// Keep the snapshot current between control operations
async fn relay_events(
    source: SnapshotSource,
    mut recording: broadcast::Receiver<RecordingEvent>,
    mut artifacts: broadcast::Receiver<ArtifactEvent>,
) {
    loop {
        tokio::select! {
            event = recording.recv() => match event {
                Ok(RecordingEvent::Aborted { reason, .. }) => {
                    source.report(ErrorResponse::from(&RecorderError::CaptureLost(reason)));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = artifacts.recv() => match event {
                Ok(ArtifactEvent::Failed(artifact)) => {
                    if let Some(error) = artifact.error {
                        source.report(error);
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
        source.refresh();
    }
}
