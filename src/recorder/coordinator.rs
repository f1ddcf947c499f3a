//! Recording coordinator
//!
//! Consumes the capture stream, cuts the encoded media into chunks at a
//! bounded cadence and hands them to whoever owns the chunk receiver.

use super::encoder::{InterleavedEncoder, MediaEncoder};
use super::state::{Chunk, RecordingEvent, RecordingSession, RecordingState};
use crate::capture::{CaptureStream, StreamEvent, StreamTap};
use crate::config::RecorderConfig;
use bytes::BytesMut;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Recorder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Capture stream is already being recorded")]
    StreamBusy,

    #[error("Capture stream has no live tracks")]
    NoLiveTracks,

    #[error("Capture lost: {0}")]
    CaptureLost(String),

    #[error("Recording task failed: {0}")]
    Task(String),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

type EncoderFactory = Box<dyn Fn() -> Box<dyn MediaEncoder> + Send + Sync>;

/// Read-only view of the current recording, shareable with the UI layer
#[derive(Clone)]
pub struct RecorderView {
    session: Arc<RwLock<RecordingSession>>,
}

impl RecorderView {
    pub fn session(&self) -> RecordingSession {
        self.session.read().clone()
    }

    pub fn state(&self) -> RecordingState {
        self.session.read().state
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.session.read().elapsed_seconds
    }
}

struct ActiveRecording {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Turns a capture stream into a gap-free sequence of chunks
///
/// State machine: `idle -> recording -> stopped`, or `recording -> aborted`
/// when the capture stream loses a track.
pub struct Recorder {
    config: RecorderConfig,
    session: Arc<RwLock<RecordingSession>>,
    event_tx: broadcast::Sender<RecordingEvent>,
    active: Option<ActiveRecording>,
    encoder_factory: EncoderFactory,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            session: Arc::new(RwLock::new(RecordingSession::default())),
            event_tx,
            active: None,
            encoder_factory: Box::new(|| Box::new(InterleavedEncoder::new())),
        }
    }

    /// Use a different encoder for subsequent recordings
    pub fn with_encoder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn MediaEncoder> + Send + Sync + 'static,
    {
        self.encoder_factory = Box::new(factory);
        self
    }

    pub fn state(&self) -> RecordingState {
        self.session.read().state
    }

    pub fn session(&self) -> RecordingSession {
        self.session.read().clone()
    }

    pub fn view(&self) -> RecorderView {
        RecorderView {
            session: self.session.clone(),
        }
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Start recording `stream`
    ///
    /// Returns the receiving end of the chunk sequence; whoever holds it owns
    /// the chunks from then on.
    pub fn start(&mut self, stream: &CaptureStream) -> RecorderResult<mpsc::UnboundedReceiver<Chunk>> {
        if let Some(active) = &self.active {
            if !active.task.is_finished() {
                return Err(RecorderError::AlreadyRecording);
            }
        }
        // An aborted recording leaves a finished task behind
        self.active = None;

        if !stream.has_live_tracks() {
            return Err(RecorderError::NoLiveTracks);
        }
        let tap = stream
            .tap(self.config.frame_queue_depth)
            .ok_or(RecorderError::StreamBusy)?;

        let session = RecordingSession::start();
        let recording_id = session.id;
        *self.session.write() = session;

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let task = RecordingTask {
            recording_id,
            config: self.config.clone(),
            tap,
            encoder: (self.encoder_factory)(),
            chunks: chunk_tx,
            session: self.session.clone(),
            events: self.event_tx.clone(),
            stop: stop.clone(),
            buffer: BytesMut::new(),
            started: Instant::now(),
        };
        let task = tokio::spawn(task.run());

        self.active = Some(ActiveRecording { stop, task });
        let _ = self.event_tx.send(RecordingEvent::Started { recording_id });

        tracing::info!("Recording {} started on stream {}", recording_id, stream.id());
        Ok(chunk_rx)
    }

    /// Stop recording, flushing the final chunk
    pub async fn stop(&mut self) -> RecorderResult<RecordingSession> {
        let Some(active) = self.active.take() else {
            return Err(RecorderError::NotRecording);
        };

        active.stop.cancel();
        active
            .task
            .await
            .map_err(|e| RecorderError::Task(e.to_string()))?;

        let session = self.session.read().clone();
        match session.state {
            RecordingState::Aborted => Err(RecorderError::CaptureLost(
                session.failure.clone().unwrap_or_default(),
            )),
            _ => Ok(session),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.stop.cancel();
        }
    }
}

struct RecordingTask {
    recording_id: uuid::Uuid,
    config: RecorderConfig,
    tap: StreamTap,
    encoder: Box<dyn MediaEncoder>,
    chunks: mpsc::UnboundedSender<Chunk>,
    session: Arc<RwLock<RecordingSession>>,
    events: broadcast::Sender<RecordingEvent>,
    stop: CancellationToken,
    buffer: BytesMut,
    /// Monotonic start; elapsed time never depends on chunk cadence
    started: Instant,
}

impl RecordingTask {
    async fn run(mut self) {
        let cadence = self.config.chunk_interval();
        let mut flush = interval_at(self.started + cadence, cadence);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let second = Duration::from_secs(1);
        let mut clock = interval_at(self.started + second, second);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.drain();
                    self.finish(RecordingState::Stopped, None);
                    break;
                }
                event = self.tap.recv() => match event {
                    Some(StreamEvent::Frame(frame)) => {
                        self.encoder.encode(&frame, &mut self.buffer);
                        if self.buffer.len() >= self.config.max_chunk_bytes {
                            self.emit(false);
                        }
                    }
                    Some(StreamEvent::TrackEnded { kind, device_id, reason }) => {
                        let failure = format!("{kind} track on '{device_id}' ended: {reason}");
                        self.finish(RecordingState::Aborted, Some(failure));
                        break;
                    }
                    None => {
                        self.finish(RecordingState::Aborted, Some("capture stream closed".to_string()));
                        break;
                    }
                },
                _ = flush.tick() => {
                    if !self.buffer.is_empty() {
                        self.emit(false);
                    }
                }
                _ = clock.tick() => {
                    let elapsed_seconds = self.elapsed_seconds();
                    self.session.write().elapsed_seconds = elapsed_seconds;
                    let _ = self.events.send(RecordingEvent::Progress {
                        recording_id: self.recording_id,
                        elapsed_seconds,
                    });
                }
            }
        }
    }

    fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Encode frames already queued when stop was requested
    fn drain(&mut self) {
        while let Some(event) = self.tap.try_recv() {
            if let StreamEvent::Frame(frame) = event {
                self.encoder.encode(&frame, &mut self.buffer);
                if self.buffer.len() >= self.config.max_chunk_bytes {
                    self.emit(false);
                }
            }
        }
    }

    fn emit(&mut self, is_final: bool) {
        let payload = self.buffer.split().freeze();
        let elapsed_seconds = self.elapsed_seconds();
        let sequence_number = {
            let mut session = self.session.write();
            let sequence_number = session.next_sequence();
            session.chunk_sequence.push(sequence_number);
            session.bytes_recorded += payload.len() as u64;
            sequence_number
        };

        tracing::debug!(
            "Recording {} chunk {} ({} bytes{})",
            self.recording_id,
            sequence_number,
            payload.len(),
            if is_final { ", final" } else { "" }
        );

        let chunk = Chunk {
            recording_id: self.recording_id,
            sequence_number,
            payload,
            is_final,
            elapsed_seconds,
        };
        if self.chunks.send(chunk).is_err() {
            tracing::error!(
                "Chunk {} of recording {} has no consumer",
                sequence_number,
                self.recording_id
            );
        }
        let _ = self.events.send(RecordingEvent::ChunkEmitted {
            recording_id: self.recording_id,
            sequence_number,
            is_final,
        });
    }

    fn finish(&mut self, state: RecordingState, failure: Option<String>) {
        if state == RecordingState::Stopped {
            self.encoder.finish(&mut self.buffer);
        }
        // The final chunk is always emitted, even when empty, so the
        // consumer can tell a complete sequence from a truncated one.
        self.emit(true);

        let elapsed_seconds = self.elapsed_seconds();
        {
            let mut session = self.session.write();
            session.state = state;
            session.elapsed_seconds = elapsed_seconds;
            session.failure = failure.clone();
        }

        let event = match failure {
            Some(reason) => {
                tracing::error!("Recording {} aborted: {}", self.recording_id, reason);
                RecordingEvent::Aborted {
                    recording_id: self.recording_id,
                    reason,
                }
            }
            None => {
                tracing::info!(
                    "Recording {} stopped after {}s",
                    self.recording_id,
                    elapsed_seconds
                );
                RecordingEvent::Stopped {
                    recording_id: self.recording_id,
                    elapsed_seconds,
                }
            }
        };
        let _ = self.events.send(event);
    }
}
