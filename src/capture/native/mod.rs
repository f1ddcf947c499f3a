//! Native capture devices
//!
//! Microphones through cpal, cameras through nokhwa. Platform handles are
//! not `Send`, so each live track runs on its own OS thread and forwards
//! frames over a channel.

mod audio;
mod camera;

use super::traits::{
    AcquisitionError, Device, DeviceError, LiveTrack, MediaBackend, TrackEnded, TrackKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Frames buffered between a capture thread and its consumer
const THREAD_QUEUE_DEPTH: usize = 64;

/// Platform device backend
#[derive(Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    async fn enumerate(&self) -> Result<Vec<Device>, DeviceError> {
        tokio::task::spawn_blocking(|| {
            let mut devices = camera::list_cameras();
            devices.extend(audio::list_microphones());
            devices
        })
        .await
        .map_err(|e| DeviceError::Enumeration(e.to_string()))
    }

    async fn request_permission(&self, _kinds: &[TrackKind]) -> Result<(), DeviceError> {
        // Desktop platforms prompt when a device is first opened; a refusal
        // then surfaces as an acquisition error.
        Ok(())
    }

    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<Box<dyn LiveTrack>, AcquisitionError> {
        let (tx, rx) = mpsc::channel(THREAD_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let id = device_id.to_string();
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name(format!("capture-{kind}"))
            .spawn(move || match kind {
                TrackKind::Audio => audio::run_microphone(id, tx, ready_tx, thread_stop),
                TrackKind::Video => camera::run_camera(id, tx, ready_tx, thread_stop),
            })
            .map_err(|e| AcquisitionError::Platform(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(ThreadTrack {
                kind,
                device_id: device_id.to_string(),
                rx,
                stop,
                thread: Some(thread),
            })),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AcquisitionError::Platform(format!(
                    "capture thread for {device_id} exited before opening"
                )))
            }
        }
    }
}

type ReadySender = oneshot::Sender<Result<(), AcquisitionError>>;

/// Track fed by a dedicated capture thread
struct ThreadTrack {
    kind: TrackKind,
    device_id: String,
    rx: mpsc::Receiver<Bytes>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[async_trait]
impl LiveTrack for ThreadTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn next_frame(&mut self) -> Result<Bytes, TrackEnded> {
        self.rx.recv().await.ok_or_else(|| TrackEnded {
            kind: self.kind,
            device_id: self.device_id.clone(),
            reason: "capture thread stopped".to_string(),
        })
    }
}

impl Drop for ThreadTrack {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx.close();
        // The thread exits within one frame period; joining guarantees the
        // device is closed before anyone reopens it.
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("{} capture thread panicked", self.kind);
            }
        }
    }
}
