use super::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub(super) fn fast_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 5,
        upload_poll_interval: Duration::from_millis(25),
        photo_poll_interval: Duration::from_millis(25),
        removal_delay: Duration::from_millis(200),
    }
}

pub(super) fn make_engine(server: &MockServer, config: EngineConfig) -> UploadEngine {
    let api = FotodropClient::with_base_url(&server.uri(), "test-token").unwrap();
    UploadEngine::new(api, TransferClient::new(), "ev-1", config)
}

pub(super) fn write_photos(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"jpegdata").unwrap();
            path
        })
        .collect()
}

/// Issues one ticket per presign call; the upload id and put path are
/// derived from the file name so tests can address them.
pub(super) struct PresignResponder {
    base: String,
}

impl PresignResponder {
    pub(super) fn new(server: &MockServer) -> Self {
        Self { base: server.uri() }
    }
}

impl Respond for PresignResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let file_name = body["file_name"].as_str().unwrap_or("file");
        ResponseTemplate::new(201).set_body_json(json!({
            "data": {
                "upload_id": format!("u-{file_name}"),
                "put_url": format!("{}/store/{file_name}", self.base),
                "required_headers": { "content-type": body["content_type"] }
            }
        }))
    }
}

pub(super) async fn mount_presign(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/events/ev-1/uploads"))
        .respond_with(PresignResponder::new(server))
        .mount(server)
        .await;
}

/// Storage mock: file names starting with `fail-` are rejected, everything
/// else is accepted after the given delay.
pub(super) async fn mount_store(server: &MockServer, accept_delay: Option<Duration>) {
    Mock::given(method("PUT"))
        .and(path_regex("^/store/fail-.*"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(server)
        .await;

    let mut template = ResponseTemplate::new(200);
    if let Some(delay) = accept_delay {
        template = template.set_delay(delay);
    }
    Mock::given(method("PUT"))
        .and(path_regex("^/store/.*"))
        .respond_with(template)
        .mount(server)
        .await;
}

pub(super) async fn wait_until(
    engine: &UploadEngine,
    deadline: Duration,
    predicate: impl Fn(&DashboardSnapshot) -> bool,
) {
    let started = std::time::Instant::now();
    loop {
        if predicate(&engine.snapshot()) {
            return;
        }
        if started.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
