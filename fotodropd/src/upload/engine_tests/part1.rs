use super::engine_tests_support::*;
use super::*;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn admission_fills_permits_and_queues_the_rest() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, Some(Duration::from_millis(300))).await;

    let dir = tempdir().unwrap();
    let paths = write_photos(
        &dir,
        &[
            "a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg", "g.jpg",
        ],
    );
    let engine = make_engine(&server, fast_config());

    let ids = engine.add_files(&paths).await;
    assert_eq!(ids.len(), 7);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.uploading_count, 5);
    assert_eq!(snapshot.queued_count, 2);
    {
        let state = engine.inner.state_guard();
        assert_eq!(state.pool.available() + state.queue.uploading_len(), 5);
    }

    // Each completion returns its permit and pulls the next queued item in.
    wait_until(&engine, Duration::from_secs(5), |s| {
        s.uploading_count == 0 && s.queued_count == 0
    })
    .await;

    let state = engine.inner.state_guard();
    assert_eq!(state.pool.available(), 5);
    assert_eq!(state.pool.available() + state.queue.uploading_len(), 5);
    assert_eq!(state.pending_uploads.len(), 7);
}

#[tokio::test]
async fn released_permit_promotes_the_next_queued_item() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, Some(Duration::from_millis(100))).await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["first.jpg", "second.jpg"]);
    let mut config = fast_config();
    config.max_concurrency = 1;
    let engine = make_engine(&server, config);

    engine.add_files(&paths).await;
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.uploading_count, 1);
    assert_eq!(snapshot.queued_count, 1);

    // The second item can only reach `processing` via the permit released
    // by the first.
    wait_until(&engine, Duration::from_secs(5), |s| {
        s.entries
            .iter()
            .filter(|e| e.status == LogStatus::Processing)
            .count()
            == 2
    })
    .await;
}

#[tokio::test]
async fn skips_files_that_are_not_photos() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    let dir = tempdir().unwrap();
    let mut paths = write_photos(&dir, &["keep.jpg"]);
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"not a photo").unwrap();
    paths.push(notes);
    paths.push(dir.path().join("missing.jpg"));

    let engine = make_engine(&server, fast_config());
    let ids = engine.add_files(&paths).await;

    assert_eq!(ids.len(), 1);
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].file_name.as_deref(), Some("keep.jpg"));
}

#[tokio::test]
async fn storage_rejection_fails_the_item_and_frees_the_permit() {
    let server = MockServer::start().await;
    mount_presign(&server).await;
    mount_store(&server, None).await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["fail-a.jpg", "fail-b.jpg"]);
    let mut config = fast_config();
    config.max_concurrency = 1;
    let engine = make_engine(&server, config);

    engine.add_files(&paths).await;

    // Both items fail; the second could only start because the first
    // returned its permit.
    wait_until(&engine, Duration::from_secs(5), |s| s.failed.len() == 2).await;

    let snapshot = engine.snapshot();
    for item in &snapshot.failed {
        assert_eq!(item.status, QueueStatus::Failed);
        assert!(
            item.error.as_deref().unwrap().contains("storage write failed"),
            "unexpected error: {:?}",
            item.error
        );
    }
    for entry in &snapshot.entries {
        assert_eq!(entry.status, LogStatus::Failed);
    }

    let state = engine.inner.state_guard();
    assert_eq!(state.pool.available(), 1);
    assert!(state.pending_uploads.is_empty());
}

#[tokio::test]
async fn presign_rejection_fails_the_item_with_the_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/events/ev-1/uploads"))
        .respond_with(ResponseTemplate::new(402).set_body_string("insufficient credits"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let paths = write_photos(&dir, &["a.jpg"]);
    let engine = make_engine(&server, fast_config());

    engine.add_files(&paths).await;
    wait_until(&engine, Duration::from_secs(5), |s| s.failed.len() == 1).await;

    let snapshot = engine.snapshot();
    let error = snapshot.failed[0].error.as_deref().unwrap();
    assert!(error.contains("presign failed"), "unexpected error: {error}");

    let state = engine.inner.state_guard();
    assert_eq!(state.pool.available(), 5);
}
