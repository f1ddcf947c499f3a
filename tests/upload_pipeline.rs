//! Upload/processing pipeline behaviour against scripted stores.
//!
//! Covers ordering enforcement, bounded retry, idempotent failure, stall
//! detection and independence of concurrent artifacts.

mod common;

use common::{chunk_feed, pipeline, valid_sequence, ScriptedStore};
use riverside_lib::upload::{ArtifactEvent, ArtifactMeta, ArtifactStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn meta(name: &str) -> ArtifactMeta {
    ArtifactMeta {
        recording_id: Uuid::new_v4(),
        name: name.to_string(),
        participants_count: 3,
    }
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_valid_sequences_reach_ready() {
    for n in [1, 2, 3, 10, 40] {
        let store = Arc::new(ScriptedStore::reliable());
        let pipeline = pipeline(store.clone());
        let meta = meta("Team Meeting #1");

        let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(n)));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Ready, "n = {n}");
        assert_eq!(artifact.progress_percent, 100);
        assert_eq!(artifact.overall_percent, 100);
        assert_eq!(artifact.chunks_acknowledged, n);
        assert_eq!(artifact.size_bytes, 64 * n);
        assert_eq!(store.chunk_count(id), n as usize);
    }
}

#[tokio::test(start_paused = true)]
async fn test_contract_violations_yield_out_of_order() {
    let cases: [&[(u64, bool)]; 5] = [
        &[(1, true)],
        &[(0, false), (2, true)],
        &[(0, false), (0, false), (1, true)],
        &[(0, false), (2, false), (1, true)],
        &[(0, true), (0, true)],
    ];

    for sequence in cases {
        let store = Arc::new(ScriptedStore::reliable());
        let pipeline = pipeline(store.clone());
        let meta = meta("Interview with John");

        let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, sequence));
        let artifact = pipeline.wait_settled(id).await.unwrap();

        assert_eq!(artifact.status, ArtifactStatus::Failed, "{sequence:?}");
        assert_eq!(artifact.error.unwrap().code, "OUT_OF_ORDER_CHUNK", "{sequence:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_sees_strictly_sequential_transfers() {
    let store = Arc::new(ScriptedStore::reliable().with_upload_delay(Duration::from_millis(30)));
    let pipeline = pipeline(store.clone());
    let meta = meta("Podcast Episode #12");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(6)));
    pipeline.wait_settled(id).await.unwrap();

    // MemoryStore rejects anything but the next sequence number
    let assembled = store.assembled(id).unwrap();
    let expected: Vec<u8> = (0..6u8).flat_map(|seq| vec![seq + 1; 64]).collect();
    assert_eq!(&assembled[..], &expected[..]);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_same_sequence() {
    let store = Arc::new(ScriptedStore::failing_first(2));
    let pipeline = pipeline(store.clone());
    let meta = meta("Team Meeting #2");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(3)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Ready);
    for seq in 0..3 {
        assert_eq!(store.attempts_for(id, seq), 3);
    }
    assert_eq!(store.chunk_count(id), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_fails_exactly_once() {
    let store = Arc::new(ScriptedStore::always_failing());
    let pipeline = pipeline(store.clone());
    let mut events = pipeline.subscribe();
    let meta = meta("Doomed");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(3)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Failed);
    let error = artifact.error.unwrap();
    assert_eq!(error.code, "UPLOAD_FAILED");
    assert!(error.message.contains("503"));
    assert_eq!(store.attempts_for(id, 0), 3);
    assert_eq!(store.attempts_for(id, 1), 0);

    // Let anything that might still be running settle
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ArtifactEvent::Failed(_)) {
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
    assert_eq!(pipeline.watch(id).unwrap().borrow().status, ArtifactStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_fails_without_retry() {
    let store = Arc::new(ScriptedStore::rejecting());
    let pipeline = pipeline(store.clone());
    let meta = meta("Too big");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(2)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    assert_eq!(artifact.error.unwrap().code, "UPLOAD_FAILED");
    assert_eq!(store.upload_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_deadline_counts_toward_ceiling() {
    let store = Arc::new(ScriptedStore::reliable().with_upload_delay(Duration::from_secs(5)));
    let pipeline = pipeline(store.clone());
    let meta = meta("Slow link");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(1)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Failed);
    assert!(artifact.error.unwrap().message.contains("timed out"));
    assert_eq!(store.attempts_for(id, 0), 3);
}

// =============================================================================
// Processing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stalled_processing_fails() {
    let store = Arc::new(ScriptedStore::stalling_at(40.0));
    let pipeline = pipeline(store.clone());
    let meta = meta("Frozen");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(2)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Failed);
    assert_eq!(artifact.error.as_ref().unwrap().code, "PROCESSING_STALLED");
    // Partial metadata survives the failure
    assert_eq!(artifact.size_bytes, 128);
    assert_eq!(artifact.progress_percent, 40);
    assert_eq!(artifact.overall_percent, 70);
    assert!(store.polls() >= 10);
}

#[tokio::test(start_paused = true)]
async fn test_remote_processing_failure_surfaces() {
    let store = Arc::new(ScriptedStore::failing_processing("unsupported codec"));
    let pipeline = pipeline(store);
    let meta = meta("Broken");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(1)));
    let artifact = pipeline.wait_settled(id).await.unwrap();

    let error = artifact.error.unwrap();
    assert_eq!(error.code, "PROCESSING_FAILED");
    assert!(error.message.contains("unsupported codec"));
}

#[tokio::test(start_paused = true)]
async fn test_status_passes_through_stages_in_order() {
    let store = Arc::new(ScriptedStore::reliable());
    let pipeline = pipeline(store);
    let mut events = pipeline.subscribe();
    let meta = meta("Staged");

    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &valid_sequence(3)));
    pipeline.wait_settled(id).await.unwrap();

    let mut statuses = Vec::new();
    let mut overall = 0;
    while let Ok(event) = events.try_recv() {
        let artifact = event.artifact();
        assert!(artifact.overall_percent >= overall);
        overall = artifact.overall_percent;
        if statuses.last() != Some(&artifact.status) {
            statuses.push(artifact.status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            ArtifactStatus::Uploading,
            ArtifactStatus::Processing,
            ArtifactStatus::Ready
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_upload_progress_counts_queued_backlog() {
    let store = Arc::new(ScriptedStore::reliable().with_upload_delay(Duration::from_millis(100)));
    let pipeline = pipeline(store);
    let meta = meta("Backlog");

    let backlog = [(0, false), (1, false), (2, false), (3, false)];
    let id = pipeline.ingest(meta.clone(), chunk_feed(meta.recording_id, &backlog));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let artifact = pipeline.artifact(id).unwrap();
    assert_eq!(artifact.chunks_acknowledged, 1);
    assert_eq!(artifact.progress_percent, 25);
    assert_eq!(artifact.status, ArtifactStatus::Uploading);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_artifacts_progress_independently() {
    let slow = Arc::new(ScriptedStore::reliable().with_upload_delay(Duration::from_millis(500)));
    let pipeline = pipeline(slow.clone());

    let first = meta("First");
    let second = meta("Second");
    let first_id = pipeline.ingest(first.clone(), chunk_feed(first.recording_id, &valid_sequence(4)));
    let second_id = pipeline.ingest(second.clone(), chunk_feed(second.recording_id, &valid_sequence(4)));

    let (a, b) = tokio::join!(
        pipeline.wait_settled(first_id),
        pipeline.wait_settled(second_id)
    );
    assert_eq!(a.unwrap().status, ArtifactStatus::Ready);
    assert_eq!(b.unwrap().status, ArtifactStatus::Ready);

    let listed: Vec<_> = pipeline.artifacts().into_iter().map(|a| a.name).collect();
    assert_eq!(listed, vec!["First", "Second"]);
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_does_not_affect_other_artifacts() {
    let store = Arc::new(ScriptedStore::reliable());
    let pipeline = pipeline(store);

    let good = meta("Good");
    let bad = meta("Bad");
    let good_id = pipeline.ingest(good.clone(), chunk_feed(good.recording_id, &valid_sequence(3)));
    let bad_id = pipeline.ingest(bad.clone(), chunk_feed(bad.recording_id, &[(0, false), (5, true)]));

    assert_eq!(
        pipeline.wait_settled(bad_id).await.unwrap().status,
        ArtifactStatus::Failed
    );
    assert_eq!(
        pipeline.wait_settled(good_id).await.unwrap().status,
        ArtifactStatus::Ready
    );
}
