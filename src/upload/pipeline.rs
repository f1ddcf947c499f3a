//! Upload and processing pipeline
//!
//! Every artifact gets its own worker task which is the only writer of that
//! artifact's state: chunks are transferred strictly in order, one at a
//! time, then remote processing is polled until it settles. Workers for
//! different artifacts share nothing but the read-side registry.

use super::retry::RetryPolicy;
use super::store::{ProcessingOutcome, RemoteStore, StoreError};
use super::types::{Artifact, ArtifactEvent, ArtifactMeta, ArtifactStatus};
use crate::config::{ProcessingConfig, UploadConfig};
use crate::recorder::Chunk;
use crate::utils::error::ErrorResponse;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// Why an artifact failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Chunk out of order: expected sequence {expected}, received {received}")]
    OutOfOrderChunk { expected: u64, received: u64 },

    #[error("Chunk stream closed after {received} chunks without a final chunk")]
    Truncated { received: u64 },

    #[error("Chunk {sequence_number} failed after {attempts} attempt(s): {cause}")]
    UploadFailed {
        sequence_number: u64,
        attempts: u32,
        cause: StoreError,
    },

    #[error("Processing stalled: no progress for {idle_secs}s")]
    ProcessingStalled { idle_secs: u64 },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::OutOfOrderChunk { .. } => "OUT_OF_ORDER_CHUNK",
            PipelineError::Truncated { .. } => "UPLOAD_INCOMPLETE",
            PipelineError::UploadFailed { .. } => "UPLOAD_FAILED",
            PipelineError::ProcessingStalled { .. } => "PROCESSING_STALLED",
            PipelineError::ProcessingFailed(_) => "PROCESSING_FAILED",
        }
    }
}

struct Entry {
    /// Listed once the first chunk was acknowledged
    visible: bool,
    state: watch::Sender<Artifact>,
}

struct Shared {
    entries: RwLock<HashMap<Uuid, Entry>>,
    order: RwLock<Vec<Uuid>>,
    events: broadcast::Sender<ArtifactEvent>,
}

/// Takes ownership of recorded chunks and drives each artifact to a
/// terminal status
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    processing: ProcessingConfig,
    shared: Arc<Shared>,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn RemoteStore>, upload: &UploadConfig, processing: ProcessingConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            retry: RetryPolicy::from_config(upload),
            processing,
            shared: Arc::new(Shared {
                entries: RwLock::new(HashMap::new()),
                order: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    /// Create an artifact fed by `chunks` and start its worker
    pub fn ingest(&self, meta: ArtifactMeta, chunks: mpsc::UnboundedReceiver<Chunk>) -> Uuid {
        let id = Uuid::new_v4();
        let artifact = Artifact::new(id, &meta);
        let (state, _) = watch::channel(artifact.clone());

        self.shared.entries.write().insert(
            id,
            Entry {
                visible: false,
                state,
            },
        );
        self.shared.order.write().push(id);

        tracing::info!(
            "Artifact {} ('{}') created for recording {}",
            id,
            meta.name,
            meta.recording_id
        );

        let worker = ArtifactWorker {
            store: self.store.clone(),
            retry: self.retry.clone(),
            processing: self.processing.clone(),
            shared: self.shared.clone(),
            artifact,
            visible: false,
        };
        tokio::spawn(worker.run(chunks));
        id
    }

    /// Listed artifacts, oldest first
    pub fn artifacts(&self) -> Vec<Artifact> {
        let entries = self.shared.entries.read();
        self.shared
            .order
            .read()
            .iter()
            .filter_map(|id| entries.get(id))
            .filter(|entry| entry.visible)
            .map(|entry| entry.state.borrow().clone())
            .collect()
    }

    pub fn artifact(&self, id: Uuid) -> Option<Artifact> {
        let entries = self.shared.entries.read();
        entries
            .get(&id)
            .filter(|entry| entry.visible)
            .map(|entry| entry.state.borrow().clone())
    }

    /// Follow one artifact, listed or not
    pub fn watch(&self, id: Uuid) -> Option<watch::Receiver<Artifact>> {
        self.shared
            .entries
            .read()
            .get(&id)
            .map(|entry| entry.state.subscribe())
    }

    /// Wait until the artifact is ready or failed
    pub async fn wait_settled(&self, id: Uuid) -> Option<Artifact> {
        let mut rx = self.watch(id)?;
        let settled = rx.wait_for(|a| a.status.is_terminal()).await.ok()?.clone();
        Some(settled)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArtifactEvent> {
        self.shared.events.subscribe()
    }

    /// Artifacts still uploading or processing
    pub fn in_flight(&self) -> usize {
        self.shared
            .entries
            .read()
            .values()
            .filter(|entry| !entry.state.borrow().status.is_terminal())
            .count()
    }
}

struct ArtifactWorker {
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    processing: ProcessingConfig,
    shared: Arc<Shared>,
    artifact: Artifact,
    visible: bool,
}

impl ArtifactWorker {
    async fn run(mut self, mut chunks: mpsc::UnboundedReceiver<Chunk>) {
        let result = match self.upload(&mut chunks).await {
            Ok(()) => self.process().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.artifact.enter(ArtifactStatus::Ready);
                tracing::info!(
                    "Artifact {} ready ({} bytes, {}s)",
                    self.artifact.id,
                    self.artifact.size_bytes,
                    self.artifact.duration_seconds
                );
                self.publish(ArtifactEvent::Ready);
            }
            Err(e) => self.fail(e),
        }
    }

    async fn upload(&mut self, chunks: &mut mpsc::UnboundedReceiver<Chunk>) -> Result<(), PipelineError> {
        let id = self.artifact.id;
        let mut expected = 0u64;
        // Everything handed over so far, transferred or not
        let mut bytes_seen = 0u64;
        let mut backlog: VecDeque<Chunk> = VecDeque::new();

        loop {
            if backlog.is_empty() {
                let Some(chunk) = chunks.recv().await else {
                    return Err(PipelineError::Truncated { received: expected });
                };
                bytes_seen += chunk.len();
                backlog.push_back(chunk);
            }
            bytes_seen += drain_ready(chunks, &mut backlog);

            let Some(chunk) = backlog.pop_front() else {
                continue;
            };
            if chunk.sequence_number != expected {
                return Err(PipelineError::OutOfOrderChunk {
                    expected,
                    received: chunk.sequence_number,
                });
            }

            let sequence_number = chunk.sequence_number;
            let label = format!("Chunk {} of artifact {}", sequence_number, id);
            let store = &self.store;
            self.retry
                .run(&label, || {
                    store.upload_chunk(id, sequence_number, chunk.payload.clone(), chunk.is_final)
                })
                .await
                .map_err(|e| PipelineError::UploadFailed {
                    sequence_number,
                    attempts: e.attempts,
                    cause: e.last,
                })?;

            self.artifact.chunks_acknowledged += 1;
            self.artifact.size_bytes += chunk.len();
            self.artifact.duration_seconds = self.artifact.duration_seconds.max(chunk.elapsed_seconds);
            expected += 1;
            bytes_seen += drain_ready(chunks, &mut backlog);

            // The total is unknown until the final chunk, so stay below 100
            let percent = if chunk.is_final {
                100
            } else if bytes_seen == 0 {
                0
            } else {
                ((self.artifact.size_bytes * 100 / bytes_seen) as u8).min(99)
            };
            self.artifact.advance(percent);

            tracing::debug!(
                "Artifact {} chunk {} acknowledged ({}/{} bytes)",
                id,
                sequence_number,
                self.artifact.size_bytes,
                bytes_seen
            );

            if self.visible {
                self.publish(ArtifactEvent::Updated);
            } else {
                self.visible = true;
                self.publish(ArtifactEvent::Created);
            }

            if chunk.is_final {
                break;
            }
        }

        let stray = backlog.pop_front().or_else(|| chunks.try_recv().ok());
        if let Some(extra) = stray {
            return Err(PipelineError::OutOfOrderChunk {
                expected,
                received: extra.sequence_number,
            });
        }
        Ok(())
    }

    async fn process(&mut self) -> Result<(), PipelineError> {
        let id = self.artifact.id;
        self.artifact.enter(ArtifactStatus::Processing);
        self.publish(ArtifactEvent::Updated);
        tracing::info!("Artifact {} uploaded, processing", id);

        let stall_timeout = self.processing.stall_timeout();
        let mut poll = tokio::time::interval(self.processing.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_progress: Option<f32> = None;
        let mut last_update = Instant::now();

        loop {
            poll.tick().await;

            let polled = tokio::time::timeout(
                self.retry.attempt_timeout(),
                self.store.poll_processing_status(id),
            )
            .await
            .unwrap_or(Err(StoreError::Timeout));

            match polled {
                Ok(status) => {
                    let progress = status.progress.clamp(0.0, 100.0);
                    if last_progress.map_or(true, |last| progress > last) {
                        last_progress = Some(progress);
                        last_update = Instant::now();

                        let before = self.artifact.progress_percent;
                        self.artifact.advance(progress as u8);
                        if self.artifact.progress_percent != before {
                            self.publish(ArtifactEvent::Updated);
                        }
                    }

                    match status.outcome {
                        Some(ProcessingOutcome::Succeeded) => return Ok(()),
                        Some(ProcessingOutcome::Failed(reason)) => {
                            return Err(PipelineError::ProcessingFailed(reason));
                        }
                        None => {}
                    }
                }
                Err(StoreError::Rejected(reason)) => {
                    return Err(PipelineError::ProcessingFailed(reason));
                }
                Err(e) => {
                    tracing::warn!("Polling artifact {} failed: {}", id, e);
                }
            }

            let idle = last_update.elapsed();
            if idle >= stall_timeout {
                return Err(PipelineError::ProcessingStalled {
                    idle_secs: idle.as_secs(),
                });
            }
        }
    }

    fn fail(&mut self, error: PipelineError) {
        if self.artifact.status.is_terminal() {
            return;
        }
        tracing::error!("Artifact {} failed: {}", self.artifact.id, error);
        self.artifact.error = Some(ErrorResponse::from(&error));
        self.artifact.enter(ArtifactStatus::Failed);
        self.publish(ArtifactEvent::Failed);
    }

    /// Store the snapshot and notify; a settled artifact is never rewritten
    fn publish(&self, event: fn(Artifact) -> ArtifactEvent) {
        let snapshot = self.artifact.clone();
        {
            let mut entries = self.shared.entries.write();
            let Some(entry) = entries.get_mut(&snapshot.id) else {
                return;
            };
            if entry.state.borrow().status.is_terminal() {
                return;
            }
            entry.visible |= self.visible;
            entry.state.send_replace(snapshot.clone());
        }
        let _ = self.shared.events.send(event(snapshot));
    }
}

/// Move every chunk already waiting in the channel into the backlog,
/// returning how many bytes were moved
fn drain_ready(chunks: &mut mpsc::UnboundedReceiver<Chunk>, backlog: &mut VecDeque<Chunk>) -> u64 {
    let mut moved = 0;
    while let Ok(chunk) = chunks.try_recv() {
        moved += chunk.len();
        backlog.push_back(chunk);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::MemoryStore;
    use bytes::Bytes;
    use std::time::Duration;

    fn pipeline(store: Arc<dyn RemoteStore>) -> UploadPipeline {
        UploadPipeline::new(
            store,
            &UploadConfig {
                max_attempts: 3,
                min_backoff_ms: 10,
                max_backoff_ms: 50,
                jitter: false,
                request_timeout_ms: 1000,
            },
            ProcessingConfig {
                poll_interval_ms: 100,
                stall_timeout_ms: 1000,
            },
        )
    }

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            recording_id: Uuid::new_v4(),
            name: "Podcast Episode #12".into(),
            participants_count: 1,
        }
    }

    fn chunk(recording_id: Uuid, sequence_number: u64, is_final: bool) -> Chunk {
        Chunk {
            recording_id,
            sequence_number,
            payload: Bytes::from(vec![1u8; 100]),
            is_final,
            elapsed_seconds: sequence_number + 1,
        }
    }

    fn feed(meta: &ArtifactMeta, sequence: &[(u64, bool)]) -> mpsc::UnboundedReceiver<Chunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        for &(seq, is_final) in sequence {
            tx.send(chunk(meta.recording_id, seq, is_final)).unwrap();
        }
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_sequence_reaches_ready() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone());
        let meta = meta();

        let id = pipeline.ingest(meta.clone(), feed(&meta, &[(0, false), (1, false), (2, true)]));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Ready);
        assert_eq!(artifact.progress_percent, 100);
        assert_eq!(artifact.size_bytes, 300);
        assert_eq!(artifact.duration_seconds, 3);
        assert_eq!(store.assembled(id).unwrap().len(), 300);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_fails_with_out_of_order() {
        let pipeline = pipeline(Arc::new(MemoryStore::new()));
        let meta = meta();

        let id = pipeline.ingest(meta.clone(), feed(&meta, &[(0, false), (2, true)]));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Failed);
        assert_eq!(artifact.error.unwrap().code, "OUT_OF_ORDER_CHUNK");
        // chunk 0 was accepted, so the failure is listed
        assert_eq!(pipeline.artifacts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_before_first_ack_is_unlisted_but_reported() {
        let pipeline = pipeline(Arc::new(MemoryStore::new()));
        let mut events = pipeline.subscribe();
        let meta = meta();

        let id = pipeline.ingest(meta.clone(), feed(&meta, &[(1, true)]));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Failed);
        assert!(pipeline.artifacts().is_empty());
        assert!(matches!(events.recv().await.unwrap(), ArtifactEvent::Failed(a) if a.id == id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_without_final_is_truncated() {
        let pipeline = pipeline(Arc::new(MemoryStore::new()));
        let meta = meta();

        let id = pipeline.ingest(meta.clone(), feed(&meta, &[(0, false)]));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.error.unwrap().code, "UPLOAD_INCOMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_progress_is_monotonic_and_capped() {
        let pipeline = pipeline(Arc::new(MemoryStore::new()));
        let mut events = pipeline.subscribe();
        let meta = meta();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = pipeline.ingest(meta.clone(), rx);

        for seq in 0..3 {
            tx.send(chunk(meta.recording_id, seq, false)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        // all handed-over bytes are acknowledged but the final chunk is missing
        let artifact = pipeline.artifact(id).unwrap();
        assert_eq!(artifact.chunks_acknowledged, 3);
        assert!(artifact.progress_percent < 100);

        tx.send(chunk(meta.recording_id, 3, true)).unwrap();
        pipeline.wait_settled(id).await.unwrap();

        let mut last_overall = 0;
        while let Ok(event) = events.try_recv() {
            let overall = event.artifact().overall_percent;
            assert!(overall >= last_overall);
            last_overall = overall;
        }
        assert_eq!(last_overall, 100);
    }
}
