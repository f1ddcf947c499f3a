//! Virtual capture devices
//!
//! A deterministic in-process backend that produces synthetic test-pattern
//! frames. Used when no native backend is compiled in, and by the tests to
//! script permission denials, busy devices, hot-plug and unplug mid-capture.

use super::traits::{
    AcquisitionError, Device, DeviceError, LiveTrack, MediaBackend, TrackEnded, TrackKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default frame cadence for synthetic video
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(100);
/// Default packet cadence for synthetic audio
const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);

const VIDEO_FRAME_BYTES: usize = 4096;
const AUDIO_FRAME_BYTES: usize = 640;

struct VirtualState {
    devices: Mutex<Vec<Device>>,
    granted: AtomicBool,
    deny_permission: AtomicBool,
    failing: Mutex<HashSet<String>>,
    /// Device id -> token ending the live track on that device
    open: Mutex<HashMap<String, CancellationToken>>,
    video_handles: AtomicUsize,
    audio_handles: AtomicUsize,
    opens: AtomicUsize,
    /// Simulated driver latency before a device opens
    open_delay: Mutex<Duration>,
    changes: broadcast::Sender<()>,
}

impl VirtualState {
    fn handles(&self, kind: TrackKind) -> &AtomicUsize {
        match kind {
            TrackKind::Video => &self.video_handles,
            TrackKind::Audio => &self.audio_handles,
        }
    }
}

/// In-process device backend with scripted behaviour
#[derive(Clone)]
pub struct VirtualBackend {
    state: Arc<VirtualState>,
}

impl VirtualBackend {
    pub fn new(devices: Vec<Device>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            state: Arc::new(VirtualState {
                devices: Mutex::new(devices),
                granted: AtomicBool::new(false),
                deny_permission: AtomicBool::new(false),
                failing: Mutex::new(HashSet::new()),
                open: Mutex::new(HashMap::new()),
                video_handles: AtomicUsize::new(0),
                audio_handles: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                open_delay: Mutex::new(Duration::ZERO),
                changes,
            }),
        }
    }

    /// Two cameras and one microphone
    pub fn default_lineup() -> Self {
        Self::new(vec![
            Device::new("cam-1", TrackKind::Video, "FaceTime HD Camera"),
            Device::new("cam-2", TrackKind::Video, "USB Camera"),
            Device::new("mic-1", TrackKind::Audio, "Built-in Microphone"),
        ])
    }

    /// Make the next permission prompts fail
    pub fn set_deny_permission(&self, deny: bool) {
        self.state.deny_permission.store(deny, Ordering::SeqCst);
    }

    /// Make opening `device_id` fail with a platform error
    pub fn fail_device(&self, device_id: &str) {
        self.state.failing.lock().insert(device_id.to_string());
    }

    /// Delay every subsequent open by `delay`
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = delay;
    }

    pub fn restore_device(&self, device_id: &str) {
        self.state.failing.lock().remove(device_id);
    }

    /// End the live track on `device_id` as if the hardware went away
    pub fn end_track(&self, device_id: &str) {
        if let Some(token) = self.state.open.lock().get(device_id) {
            token.cancel();
        }
    }

    pub fn plug(&self, device: Device) {
        tracing::debug!("Virtual device plugged: {}", device.id);
        self.state.devices.lock().push(device);
        let _ = self.state.changes.send(());
    }

    pub fn unplug(&self, device_id: &str) {
        tracing::debug!("Virtual device unplugged: {}", device_id);
        self.state.devices.lock().retain(|d| d.id != device_id);
        self.end_track(device_id);
        let _ = self.state.changes.send(());
    }

    /// Hardware handles currently held for `kind`
    pub fn open_handles(&self, kind: TrackKind) -> usize {
        self.state.handles(kind).load(Ordering::SeqCst)
    }

    pub fn total_open_handles(&self) -> usize {
        TrackKind::ALL.iter().map(|k| self.open_handles(*k)).sum()
    }

    /// Number of successful opens since creation
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.state.open.lock().contains_key(device_id)
    }
}

#[async_trait]
impl MediaBackend for VirtualBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    async fn enumerate(&self) -> Result<Vec<Device>, DeviceError> {
        let granted = self.state.granted.load(Ordering::SeqCst);
        let devices = self.state.devices.lock().clone();
        Ok(devices
            .into_iter()
            .map(|mut d| {
                if !granted {
                    d.label.clear();
                }
                d
            })
            .collect())
    }

    async fn request_permission(&self, kinds: &[TrackKind]) -> Result<(), DeviceError> {
        if self.state.deny_permission.load(Ordering::SeqCst) {
            self.state.granted.store(false, Ordering::SeqCst);
            return Err(DeviceError::PermissionDenied(kinds.to_vec()));
        }
        self.state.granted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<Box<dyn LiveTrack>, AcquisitionError> {
        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.state.granted.load(Ordering::SeqCst) {
            return Err(AcquisitionError::PermissionRequired);
        }
        let present = self
            .state
            .devices
            .lock()
            .iter()
            .any(|d| d.id == device_id && d.kind == kind);
        if !present {
            return Err(AcquisitionError::NotFound(device_id.to_string()));
        }
        if self.state.failing.lock().contains(device_id) {
            return Err(AcquisitionError::Platform(format!(
                "{device_id} refused to start"
            )));
        }

        let ended = CancellationToken::new();
        {
            let mut open = self.state.open.lock();
            if open.contains_key(device_id) {
                return Err(AcquisitionError::Busy(device_id.to_string()));
            }
            open.insert(device_id.to_string(), ended.clone());
        }
        self.state.handles(kind).fetch_add(1, Ordering::SeqCst);
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let (cadence, frame_bytes) = match kind {
            TrackKind::Video => (VIDEO_FRAME_INTERVAL, VIDEO_FRAME_BYTES),
            TrackKind::Audio => (AUDIO_FRAME_INTERVAL, AUDIO_FRAME_BYTES),
        };
        let mut ticker = interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Virtual {} track opened on {}", kind, device_id);

        Ok(Box::new(VirtualTrack {
            kind,
            device_id: device_id.to_string(),
            ticker,
            frame_bytes,
            frame_index: 0,
            ended,
            state: self.state.clone(),
        }))
    }

    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.state.changes.subscribe())
    }
}

/// Synthetic track; releases its handle on drop
struct VirtualTrack {
    kind: TrackKind,
    device_id: String,
    ticker: Interval,
    frame_bytes: usize,
    frame_index: u64,
    ended: CancellationToken,
    state: Arc<VirtualState>,
}

#[async_trait]
impl LiveTrack for VirtualTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn next_frame(&mut self) -> Result<Bytes, TrackEnded> {
        tokio::select! {
            biased;
            _ = self.ended.cancelled() => Err(TrackEnded {
                kind: self.kind,
                device_id: self.device_id.clone(),
                reason: "device disconnected".to_string(),
            }),
            _ = self.ticker.tick() => {
                // Test pattern: every byte carries the low bits of the frame index,
                // offset by one so a muted (zeroed) frame is distinguishable.
                let fill = (self.frame_index % 255) as u8 + 1;
                self.frame_index += 1;
                Ok(Bytes::from(vec![fill; self.frame_bytes]))
            }
        }
    }
}

impl Drop for VirtualTrack {
    fn drop(&mut self) {
        self.state.open.lock().remove(&self.device_id);
        self.state.handles(self.kind).fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("Virtual {} track released on {}", self.kind, self.device_id);
    }
}
