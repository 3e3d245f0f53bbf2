use std::collections::HashMap;
use std::{io, path::Path};

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid required header: {0}")]
    Header(String),
}

/// Performs the direct storage write of the two-step transfer. Concurrency
/// is gated by the engine's token pool, not here.
#[derive(Clone, Default)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_http(http: Client) -> Self {
        Self { http }
    }

    /// Streams `source` to the presigned `put_url` with the headers the
    /// presign response demands. Success is any 2xx status.
    pub async fn put_file(
        &self,
        put_url: &str,
        required_headers: &HashMap<String, String>,
        source: &Path,
    ) -> Result<(), TransferError> {
        let url = Url::parse(put_url)?;
        let headers = build_headers(required_headers)?;
        let file = tokio::fs::File::open(source).await?;
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        self.http
            .put(url)
            .headers(headers)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn build_headers(required: &HashMap<String, String>) -> Result<HeaderMap, TransferError> {
    let mut headers = HeaderMap::with_capacity(required.len());
    for (name, value) in required {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransferError::Header(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| TransferError::Header(value.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn put_file_streams_contents_with_required_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/store/u-1"))
            .and(header("content-type", "image/jpeg"))
            .and(header("x-amz-meta-event", "ev-1"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.jpg");
        std::fs::write(&source, b"payload").unwrap();

        let mut required = HashMap::new();
        required.insert("content-type".to_string(), "image/jpeg".to_string());
        required.insert("x-amz-meta-event".to_string(), "ev-1".to_string());

        let client = TransferClient::new();
        client
            .put_file(&format!("{}/store/u-1", server.uri()), &required, &source)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_write_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/store/u-1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.jpg");
        std::fs::write(&source, b"payload").unwrap();

        let client = TransferClient::new();
        let err = client
            .put_file(
                &format!("{}/store/u-1", server.uri()),
                &HashMap::new(),
                &source,
            )
            .await
            .expect_err("expected status error");
        assert!(matches!(err, TransferError::Request(_)));
    }

    #[test]
    fn invalid_header_name_is_reported() {
        let mut required = HashMap::new();
        required.insert("bad header".to_string(), "v".to_string());
        let err = build_headers(&required).expect_err("expected header error");
        assert!(matches!(err, TransferError::Header(name) if name == "bad header"));
    }
}
