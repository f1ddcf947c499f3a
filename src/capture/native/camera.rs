//! Camera capture using nokhwa

use super::ReadySender;
use crate::capture::traits::{AcquisitionError, Device, TrackKind};
use bytes::Bytes;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Consecutive failed reads after which the camera counts as lost
const MAX_FRAME_ERRORS: u32 = 30;

pub(super) fn list_cameras() -> Vec<Device> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                Device::new(id, TrackKind::Video, info.human_name())
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

/// Capture thread body: open the camera and forward raw frames until
/// `stop` is raised or the camera stops delivering.
pub(super) fn run_camera(
    device_id: String,
    tx: mpsc::Sender<Bytes>,
    ready: ReadySender,
    stop: Arc<AtomicBool>,
) {
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(camera_index(&device_id), format) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(AcquisitionError::NotFound(format!("{device_id}: {e}"))));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready.send(Err(AcquisitionError::Busy(format!("{device_id}: {e}"))));
        return;
    }

    let camera_format = camera.camera_format();
    tracing::info!(
        "Camera '{}' opened: {}x{} @ {}fps",
        device_id,
        camera_format.resolution().width(),
        camera_format.resolution().height(),
        camera_format.frame_rate()
    );
    let _ = ready.send(Ok(()));

    let mut errors = 0u32;
    while !stop.load(Ordering::SeqCst) {
        match camera.frame() {
            Ok(frame) => {
                errors = 0;
                if tx.blocking_send(Bytes::copy_from_slice(frame.buffer())).is_err() {
                    break;
                }
            }
            Err(e) => {
                errors += 1;
                tracing::debug!("Failed to capture frame: {:?}", e);
                if errors >= MAX_FRAME_ERRORS {
                    tracing::warn!("Camera '{}' stopped delivering frames", device_id);
                    break;
                }
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
    tracing::info!("Camera '{}' closed", device_id);
}
