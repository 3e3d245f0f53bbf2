use super::engine_tests_support::*;
use super::*;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn completed_upload_re_keys_the_log_entry_to_the_photo() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    Mock::given(method("POST"))
        .and(path("/v1/uploads/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "upload_id": "u-a.jpg", "status": "completed", "photo_id": "p-1" }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/photos/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "p-1", "status": "indexing", "face_count": 2, "file_size": 8 }
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["a.jpg"]);
    let engine = make_engine(&server, fast_config());
    let ids = engine.add_files(&paths).await;
    let local_id = ids[0].clone();

    wait_until(&engine, Duration::from_secs(5), |s| {
        s.entries.iter().any(|e| e.id == "p-1")
    })
    .await;

    // Exactly one entry for the logical upload, now keyed by the photo id,
    // with the admission-time fields carried over.
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert!(!snapshot.entries.iter().any(|e| e.id == local_id));
    let entry = &snapshot.entries[0];
    assert_eq!(entry.file_name.as_deref(), Some("a.jpg"));
    assert_eq!(entry.upload_id.as_deref(), Some("u-a.jpg"));
    assert!(entry.uploaded_at.is_some());

    {
        let state = engine.inner.state_guard();
        assert!(state.pending_uploads.is_empty());
    }

    // Phase 2 merges the indexing fields into the re-keyed entry.
    wait_until(&engine, Duration::from_secs(5), |s| {
        s.entries
            .iter()
            .any(|e| e.id == "p-1" && e.status == LogStatus::Indexing)
    })
    .await;
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries[0].face_count, Some(2));
    assert_eq!(snapshot.entries[0].file_size, Some(8));
}

#[tokio::test]
async fn expired_upload_marks_the_entry_failed_and_stops_watching() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    Mock::given(method("POST"))
        .and(path("/v1/uploads/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "upload_id": "u-a.jpg", "status": "expired", "error_message": "upload window closed" }
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["a.jpg"]);
    let engine = make_engine(&server, fast_config());
    let ids = engine.add_files(&paths).await;

    // By the time the expired verdict lands, the entry is keyed by the
    // server upload id, not the admission-time local id.
    wait_until(&engine, Duration::from_secs(5), |s| {
        s.entries
            .iter()
            .any(|e| e.id == "u-a.jpg" && e.status == LogStatus::Failed)
    })
    .await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert!(!snapshot.entries.iter().any(|e| e.id == ids[0]));
    assert_eq!(
        snapshot.entries[0].error.as_deref(),
        Some("upload window closed")
    );

    let state = engine.inner.state_guard();
    assert!(state.pending_uploads.is_empty());
    // The entry is terminal, so phase 2 has nothing to watch.
    assert!(photo_poll_targets(&state).is_empty());
    assert!(!state.photo_poller_running);
}

#[tokio::test]
async fn indexed_entries_are_removed_once_after_the_delay() {
    let server = MockServer::start().await;
    let engine = make_engine(&server, fast_config());

    {
        let mut state = engine.inner.state_guard();
        state.log.insert(LogEntry::new("p-1", LogStatus::Indexing));
    }

    let indexed = || PhotoRecord {
        id: "p-1".to_string(),
        status: PhotoStatus::Indexed,
        file_name: None,
        file_size: None,
        face_count: None,
        thumbnail_url: None,
        created_at: None,
        error_message: None,
    };

    engine.apply_photo_records(vec![indexed()]);
    // A repeated terminal observation must not arm a second timer.
    engine.apply_photo_records(vec![indexed()]);

    {
        let state = engine.inner.state_guard();
        assert!(state.log.contains("p-1"));
        assert!(state.log.removal_scheduled_for("p-1"));
    }

    // Not removed before the configured delay.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.inner.state_guard().log.contains("p-1"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    let state = engine.inner.state_guard();
    assert!(!state.log.contains("p-1"));
    assert!(!state.log.removal_scheduled_for("p-1"));
    assert_eq!(state.log.len(), 0);
}

#[tokio::test]
async fn retry_creates_a_fresh_attempt_and_drops_the_failed_one() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["fail-a.jpg", "fail-b.jpg"]);
    let engine = make_engine(&server, fast_config());

    engine.add_files(&paths).await;
    wait_until(&engine, Duration::from_secs(5), |s| s.failed.len() == 2).await;

    let snapshot = engine.snapshot();
    let a_id = snapshot
        .failed
        .iter()
        .find(|item| item.file_name == "fail-a.jpg")
        .unwrap()
        .id
        .clone();
    let b_id = snapshot
        .failed
        .iter()
        .find(|item| item.file_name == "fail-b.jpg")
        .unwrap()
        .id
        .clone();

    let new_id = engine.retry_upload(&a_id).unwrap();
    assert_ne!(new_id, a_id);

    // The old identity is gone everywhere; the other failed item is
    // untouched.
    let snapshot = engine.snapshot();
    assert!(!snapshot.entries.iter().any(|e| e.id == a_id));
    assert!(snapshot.failed.iter().any(|item| item.id == b_id));
    assert!(!snapshot.failed.iter().any(|item| item.id == a_id));

    // The fresh attempt fails again and lands back in the failed set under
    // its new identity.
    wait_until(&engine, Duration::from_secs(5), |s| {
        s.failed.iter().any(|item| item.id == new_id)
    })
    .await;

    let err = engine.retry_upload(&a_id).expect_err("stale id must fail");
    assert!(matches!(err, EngineError::MissingFailed(_)));
}

#[tokio::test]
async fn retry_joins_the_tail_of_the_queue() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, Some(Duration::from_millis(400))).await;

    let dir = tempdir().unwrap();
    let mut config = fast_config();
    config.max_concurrency = 1;
    let engine = make_engine(&server, config);

    let failed = write_photos(&dir, &["fail-a.jpg"]);
    engine.add_files(&failed).await;
    wait_until(&engine, Duration::from_secs(5), |s| s.failed.len() == 1).await;
    let failed_id = engine.snapshot().failed[0].id.clone();

    // One hanging transfer and one queued item, then the retry.
    let others = write_photos(&dir, &["ok-slow.jpg", "ok-next.jpg"]);
    engine.add_files(&others).await;
    let new_id = engine.retry_upload(&failed_id).unwrap();

    let state = engine.inner.state_guard();
    let order: Vec<String> = state
        .queue
        .iter_active()
        .map(|item| item.file_name.clone())
        .collect();
    assert_eq!(order, vec!["ok-slow.jpg", "ok-next.jpg", "fail-a.jpg"]);
    let last = state.queue.iter_active().last().unwrap();
    assert_eq!(last.id, new_id);
}

#[tokio::test]
async fn removing_a_failed_item_purges_every_trace() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["fail-a.jpg"]);
    let engine = make_engine(&server, fast_config());

    engine.add_files(&paths).await;
    wait_until(&engine, Duration::from_secs(5), |s| s.failed.len() == 1).await;
    let id = engine.snapshot().failed[0].id.clone();

    engine.remove_from_queue(&id).unwrap();

    let snapshot = engine.snapshot();
    assert!(snapshot.failed.is_empty());
    assert!(snapshot.entries.is_empty());
    {
        let state = engine.inner.state_guard();
        assert!(state.pending_uploads.is_empty());
        assert!(photo_poll_targets(&state).is_empty());
    }

    let err = engine
        .remove_from_queue(&id)
        .expect_err("second removal must fail");
    assert!(matches!(err, EngineError::MissingFailed(_)));
}

#[tokio::test]
async fn seed_populates_the_log_without_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/events/ev-1/photos"))
        .and(query_param("state", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "p-1",
                    "status": "uploading",
                    "file_name": "DSC_0001.jpg",
                    "created_at": "2025-06-01T10:00:00Z"
                },
                { "id": "p-2", "status": "indexing", "face_count": 1 },
                { "id": "p-3", "status": "indexed" }
            ]
        })))
        .mount(&server)
        .await;

    let engine = make_engine(&server, fast_config());
    let seeded = engine.seed().await.unwrap();
    // Terminal records are not re-surfaced.
    assert_eq!(seeded, 2);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 2);
    let p1 = snapshot.entries.iter().find(|e| e.id == "p-1").unwrap();
    assert_eq!(p1.status, LogStatus::Uploading);
    assert_eq!(p1.file_name.as_deref(), Some("DSC_0001.jpg"));
    assert!(p1.uploaded_at.is_some());

    {
        let state = engine.inner.state_guard();
        let mut targets = photo_poll_targets(&state);
        targets.sort();
        assert_eq!(targets, vec!["p-1".to_string(), "p-2".to_string()]);
    }

    assert_eq!(engine.seed().await.unwrap(), 0);
}
