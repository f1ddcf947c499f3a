//! Microphone capture using cpal

use super::ReadySender;
use crate::capture::traits::{AcquisitionError, Device, TrackKind};
use bytes::{BufMut, Bytes, BytesMut};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// List input devices; cpal has no stable ids so the name doubles as id
pub(super) fn list_microphones() -> Vec<Device> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|d| d.name().ok())
            .map(|name| Device::new(name.clone(), TrackKind::Audio, name))
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate microphones: {:?}", e);
            Vec::new()
        }
    }
}

/// Capture thread body: open the microphone, forward 16-bit PCM packets
/// until `stop` is raised or the device fails.
pub(super) fn run_microphone(
    device_id: String,
    tx: mpsc::Sender<Bytes>,
    ready: ReadySender,
    stop: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .ok()
        .and_then(|mut devices| devices.find(|d| d.name().is_ok_and(|n| n == device_id)));
    let Some(device) = device else {
        let _ = ready.send(Err(AcquisitionError::NotFound(device_id)));
        return;
    };

    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(AcquisitionError::Platform(e.to_string())));
            return;
        }
    };

    let failed = Arc::new(AtomicBool::new(false));
    let sample_format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let failed = failed.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut packet = BytesMut::with_capacity(data.len() * 2);
                    for sample in data {
                        packet.put_i16_le((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    }
                    let _ = tx.try_send(packet.freeze());
                },
                move |err| {
                    tracing::warn!("Microphone stream error: {}", err);
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let failed = failed.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mut packet = BytesMut::with_capacity(data.len() * 2);
                    for sample in data {
                        packet.put_i16_le(*sample);
                    }
                    let _ = tx.try_send(packet.freeze());
                },
                move |err| {
                    tracing::warn!("Microphone stream error: {}", err);
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
        }
        other => {
            let _ = ready.send(Err(AcquisitionError::Platform(format!(
                "unsupported sample format {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(AcquisitionError::Busy(format!("{device_id}: {e}"))));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AcquisitionError::Platform(e.to_string())));
        return;
    }

    tracing::info!(
        "Microphone '{}' opened: {} Hz, {} channels",
        device_id,
        stream_config.sample_rate.0,
        stream_config.channels
    );
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) && !failed.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::info!("Microphone '{}' closed", device_id);
}
