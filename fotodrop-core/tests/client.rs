use fotodrop_core::{FotodropClient, FotodropError, PhotoStatus, UploadState};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn presign_posts_file_metadata_with_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/events/ev-1/uploads"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "file_name": "DSC_0001.jpg",
            "content_type": "image/jpeg",
            "content_length": 512
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "data": {
                "upload_id": "u-1",
                "put_url": "https://storage.example/bucket/u-1",
                "required_headers": { "content-type": "image/jpeg" },
                "object_key": "events/ev-1/u-1",
                "expires_at": "2025-06-01T00:00:00Z"
            }
        })))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let ticket = client
        .presign("ev-1", "DSC_0001.jpg", "image/jpeg", 512)
        .await
        .unwrap();

    assert_eq!(ticket.upload_id, "u-1");
    assert_eq!(ticket.put_url.as_str(), "https://storage.example/bucket/u-1");
    assert_eq!(
        ticket.required_headers.get("content-type").map(String::as_str),
        Some("image/jpeg")
    );
}

#[tokio::test]
async fn presign_surfaces_api_error_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/events/ev-1/uploads"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "code": "PAYMENT_REQUIRED", "message": "insufficient credits" }
        })))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .presign("ev-1", "DSC_0001.jpg", "image/jpeg", 512)
        .await
        .expect_err("expected api error");

    match err {
        FotodropError::Api { status, body } => {
            assert_eq!(status.as_u16(), 402);
            assert!(body.contains("insufficient credits"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn poll_uploads_parses_statuses_including_unknown() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/uploads/status"))
        .and(body_partial_json(json!({ "ids": ["u-1", "u-2", "u-3"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "upload_id": "u-1", "status": "completed", "photo_id": "p-1" },
                { "upload_id": "u-2", "status": "expired", "error_message": "upload window closed" },
                { "upload_id": "u-3", "status": "quarantined" }
            ]
        })))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let ids = vec!["u-1".to_string(), "u-2".to_string(), "u-3".to_string()];
    let records = client.poll_uploads(&ids).await.unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, UploadState::Completed);
    assert_eq!(records[0].photo_id.as_deref(), Some("p-1"));
    assert_eq!(records[1].status, UploadState::Expired);
    assert_eq!(
        records[1].error_message.as_deref(),
        Some("upload window closed")
    );
    assert_eq!(records[2].status, UploadState::Unknown);
}

#[tokio::test]
async fn poll_photos_parses_partial_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/photos/status"))
        .and(body_partial_json(json!({ "ids": ["p-1"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "p-1",
                    "status": "indexing",
                    "file_size": 2048,
                    "face_count": 4
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let records = client.poll_photos(&["p-1".to_string()]).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, PhotoStatus::Indexing);
    assert_eq!(records[0].file_size, Some(2048));
    assert_eq!(records[0].face_count, Some(4));
    assert_eq!(records[0].thumbnail_url, None);
}

#[tokio::test]
async fn list_pending_photos_sends_state_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/events/ev-1/photos"))
        .and(query_param("state", "pending"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "p-7",
                    "status": "uploading",
                    "file_name": "DSC_0007.jpg",
                    "created_at": "2025-06-01T10:00:00Z"
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let records = client.list_pending_photos("ev-1").await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "p-7");
    assert_eq!(records[0].status, PhotoStatus::Uploading);
    assert_eq!(records[0].file_name.as_deref(), Some("DSC_0007.jpg"));
}

#[tokio::test]
async fn missing_data_payload_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/uploads/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .poll_uploads(&["u-1".to_string()])
        .await
        .expect_err("expected missing data error");

    assert!(matches!(err, FotodropError::MissingData));
}
