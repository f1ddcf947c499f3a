//! Capture session
//!
//! Owns the single live [`CaptureStream`] and the per-kind [`TrackSelection`].
//! Every reconfiguration is an explicit transition: the held track of the
//! affected kind is fully released before a new one is requested, so at most
//! one hardware handle per kind exists at any time.

use super::traits::{AcquisitionError, LiveTrack, MediaBackend, MediaFrame, TrackKind};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Requested configuration for one track kind
///
/// `device_id: None` means the kind is not acquired at all, which differs
/// from an acquired-but-disabled (muted) track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSelection {
    pub kind: TrackKind,
    pub device_id: Option<String>,
    pub enabled: bool,
}

impl TrackSelection {
    pub fn new(kind: TrackKind, device_id: Option<String>, enabled: bool) -> Self {
        Self {
            kind,
            device_id,
            enabled,
        }
    }

    pub fn absent(kind: TrackKind) -> Self {
        Self::new(kind, None, false)
    }
}

/// Events delivered to whoever taps the capture stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame(MediaFrame),
    /// A track stopped unexpectedly (device unplugged, driver error)
    TrackEnded {
        kind: TrackKind,
        device_id: String,
        reason: String,
    },
}

type SinkSlot = Arc<Mutex<Option<mpsc::Sender<StreamEvent>>>>;

/// A live track plus the pump task forwarding its frames
struct LiveSlot {
    device_id: String,
    enabled: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    stop: CancellationToken,
    pump: JoinHandle<()>,
}

impl LiveSlot {
    fn is_live(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }
}

/// The live set of tracks bound to the selected devices
pub struct CaptureStream {
    id: Uuid,
    slots: BTreeMap<TrackKind, LiveSlot>,
    sink: SinkSlot,
}

impl CaptureStream {
    fn new() -> Self {
        let id = Uuid::new_v4();
        tracing::debug!("Capture stream {} created", id);
        Self {
            id,
            slots: BTreeMap::new(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kinds with a live (not ended) track
    pub fn live_kinds(&self) -> Vec<TrackKind> {
        self.slots
            .iter()
            .filter(|(_, s)| s.is_live())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn has_live_tracks(&self) -> bool {
        self.slots.values().any(LiveSlot::is_live)
    }

    pub fn device_id(&self, kind: TrackKind) -> Option<&str> {
        self.slots.get(&kind).map(|s| s.device_id.as_str())
    }

    /// Attach a consumer to the stream's frames
    ///
    /// Only one consumer at a time; returns `None` if already tapped.
    pub fn tap(&self, depth: usize) -> Option<StreamTap> {
        let mut sink = self.sink.lock();
        if sink.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::channel(depth.max(1));
        *sink = Some(tx);
        Some(StreamTap {
            rx,
            sink: self.sink.clone(),
        })
    }

    fn install(&mut self, track: Box<dyn LiveTrack>, enabled: bool) {
        let kind = track.kind();
        let device_id = track.device_id().to_string();
        let enabled_flag = Arc::new(AtomicBool::new(enabled));
        let ended = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();

        let pump = tokio::spawn(pump_track(
            track,
            enabled_flag.clone(),
            ended.clone(),
            self.sink.clone(),
            stop.clone(),
        ));

        tracing::info!("Acquired {} track on {}", kind, device_id);
        self.slots.insert(
            kind,
            LiveSlot {
                device_id,
                enabled: enabled_flag,
                ended,
                stop,
                pump,
            },
        );
    }

    /// Release the track of `kind` and wait until its handle is dropped
    async fn release(&mut self, kind: TrackKind) {
        if let Some(slot) = self.slots.remove(&kind) {
            slot.stop.cancel();
            if let Err(e) = slot.pump.await {
                tracing::warn!("{} pump task ended abnormally: {}", kind, e);
            }
            tracing::info!("Released {} track on {}", kind, slot.device_id);
        }
    }

    async fn release_all(&mut self) {
        for kind in TrackKind::ALL {
            self.release(kind).await;
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        for slot in self.slots.values() {
            slot.stop.cancel();
        }
    }
}

/// Receiving side of a stream tap; detaches on drop
pub struct StreamTap {
    rx: mpsc::Receiver<StreamEvent>,
    sink: SinkSlot,
}

impl StreamTap {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StreamTap {
    fn drop(&mut self) {
        self.sink.lock().take();
    }
}

async fn pump_track(
    mut track: Box<dyn LiveTrack>,
    enabled: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    sink: SinkSlot,
    stop: CancellationToken,
) {
    let kind = track.kind();
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = track.next_frame() => next,
        };

        let event = match next {
            Ok(payload) => {
                // Muted tracks keep flowing as silence / blank frames
                let payload = if enabled.load(Ordering::Acquire) {
                    payload
                } else {
                    Bytes::from(vec![0u8; payload.len()])
                };
                StreamEvent::Frame(MediaFrame { kind, payload })
            }
            Err(lost) => {
                tracing::warn!("Capture track lost: {}", lost);
                ended.store(true, Ordering::Release);
                StreamEvent::TrackEnded {
                    kind,
                    device_id: lost.device_id,
                    reason: lost.reason,
                }
            }
        };
        let is_end = matches!(event, StreamEvent::TrackEnded { .. });

        let tx = sink.lock().clone();
        if let Some(tx) = tx {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                sent = tx.send(event) => {
                    if sent.is_err() {
                        tracing::trace!("{} frame dropped: no consumer", kind);
                    }
                }
            }
        }

        if is_end {
            break;
        }
    }
    drop(track);
}

/// Read-only view of the capture configuration, shareable with the UI layer
#[derive(Clone, Default)]
pub struct CaptureView {
    selection: Arc<RwLock<BTreeMap<TrackKind, TrackSelection>>>,
    live: Arc<RwLock<Vec<(TrackKind, Arc<AtomicBool>)>>>,
}

impl CaptureView {
    pub fn selection(&self) -> Vec<TrackSelection> {
        TrackKind::ALL
            .iter()
            .map(|k| {
                self.selection
                    .read()
                    .get(k)
                    .cloned()
                    .unwrap_or_else(|| TrackSelection::absent(*k))
            })
            .collect()
    }

    pub fn selection_for(&self, kind: TrackKind) -> TrackSelection {
        self.selection
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| TrackSelection::absent(kind))
    }

    /// True while at least one acquired track is still producing media
    pub fn is_live(&self) -> bool {
        self.live
            .read()
            .iter()
            .any(|(_, ended)| !ended.load(Ordering::Acquire))
    }
}

/// Owner of the live capture stream
pub struct CaptureSession {
    backend: Arc<dyn MediaBackend>,
    stream: Option<CaptureStream>,
    view: CaptureView,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            stream: None,
            view: CaptureView::default(),
        }
    }

    pub fn view(&self) -> CaptureView {
        self.view.clone()
    }

    pub fn selection(&self) -> Vec<TrackSelection> {
        self.view.selection()
    }

    pub fn stream(&self) -> Option<&CaptureStream> {
        self.stream.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(CaptureStream::has_live_tracks)
    }

    /// Apply a selection for each kind
    ///
    /// Stops at the first failing kind; kinds already applied keep their new
    /// configuration and the failing kind stays on its last good one.
    pub async fn configure(
        &mut self,
        selections: &[TrackSelection],
    ) -> Result<&CaptureStream, AcquisitionError> {
        for selection in selections {
            self.set_track(selection.clone()).await?;
        }
        Ok(self.stream.get_or_insert_with(CaptureStream::new))
    }

    /// Transition one track kind to `selection`
    pub async fn set_track(&mut self, selection: TrackSelection) -> Result<(), AcquisitionError> {
        let kind = selection.kind;
        let previous = self.view.selection_for(kind);
        let backend = self.backend.clone();
        let stream = self.stream.get_or_insert_with(CaptureStream::new);

        let Some(device_id) = selection.device_id.clone() else {
            stream.release(kind).await;
            self.commit(selection);
            return Ok(());
        };

        // Same live device: only the enabled flag changes, no renegotiation
        if let Some(slot) = stream.slots.get(&kind) {
            if slot.device_id == device_id && slot.is_live() {
                slot.enabled.store(selection.enabled, Ordering::Release);
                tracing::debug!(
                    "{} track on {} {}",
                    kind,
                    device_id,
                    if selection.enabled { "enabled" } else { "muted" }
                );
                self.commit(selection);
                return Ok(());
            }
        }

        stream.release(kind).await;
        match backend.open_track(kind, &device_id).await {
            Ok(track) => {
                stream.install(track, selection.enabled);
                self.commit(selection);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Failed to acquire {} on {}: {}", kind, device_id, err);
                let previous_id = previous.device_id.clone();
                let restored = match previous_id {
                    Some(prev_id) if prev_id != device_id => {
                        match backend.open_track(kind, &prev_id).await {
                            Ok(track) => {
                                stream.install(track, previous.enabled);
                                Some(previous)
                            }
                            Err(e) => {
                                tracing::warn!("Could not restore {} on {}: {}", kind, prev_id, e);
                                None
                            }
                        }
                    }
                    _ => None,
                };
                self.commit(restored.unwrap_or_else(|| TrackSelection::absent(kind)));
                Err(err)
            }
        }
    }

    /// Release every track and drop the stream
    pub async fn release_all(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release_all().await;
            tracing::info!("Capture stream {} torn down", stream.id());
        }
        self.view.selection.write().clear();
        self.view.live.write().clear();
    }

    /// Make the published selection for `kind` match the handle actually held
    ///
    /// Needed after an interrupted [`set_track`](Self::set_track), which may
    /// have released the old track without installing a new one.
    pub fn reconcile(&mut self, kind: TrackKind) {
        let held = self
            .stream
            .as_ref()
            .and_then(|s| s.slots.get(&kind))
            .map(|slot| {
                TrackSelection::new(
                    kind,
                    Some(slot.device_id.clone()),
                    slot.enabled.load(Ordering::Acquire),
                )
            });
        let selection = held.unwrap_or_else(|| TrackSelection::absent(kind));
        if self.view.selection_for(kind) != selection {
            tracing::debug!("{} selection reconciled to {:?}", kind, selection.device_id);
        }
        self.commit(selection);
    }

    fn commit(&mut self, selection: TrackSelection) {
        let live = self
            .stream
            .as_ref()
            .map(|s| {
                s.slots
                    .iter()
                    .map(|(k, slot)| (*k, slot.ended.clone()))
                    .collect()
            })
            .unwrap_or_default();
        *self.view.live.write() = live;
        self.view.selection.write().insert(selection.kind, selection);
    }
}
