use std::collections::HashMap;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.fotodrop.io";

#[derive(Debug, Error)]
pub enum FotodropError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api response missing data payload")]
    MissingData,
}

#[derive(Clone)]
pub struct FotodropClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl FotodropClient {
    pub fn new(token: impl Into<String>) -> Result<Self, FotodropError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, FotodropError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Requests transfer credentials for one file. The returned ticket is
    /// valid for a single direct PUT to `put_url` with `required_headers`.
    pub async fn presign(
        &self,
        event_id: &str,
        file_name: &str,
        content_type: &str,
        content_length: u64,
    ) -> Result<PresignTicket, FotodropError> {
        let url = self.endpoint(&format!("/v1/events/{event_id}/uploads"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&PresignRequest {
                file_name,
                content_type,
                content_length,
            })
            .send()
            .await?;
        let payload: DataEnvelope<PresignTicket> = Self::handle_response(response).await?;
        payload.data.ok_or(FotodropError::MissingData)
    }

    /// Batched status lookup for uploads that have not yet become photos.
    pub async fn poll_uploads(&self, ids: &[String]) -> Result<Vec<UploadRecord>, FotodropError> {
        let url = self.endpoint("/v1/uploads/status")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&StatusRequest { ids })
            .send()
            .await?;
        let payload: DataEnvelope<Vec<UploadRecord>> = Self::handle_response(response).await?;
        payload.data.ok_or(FotodropError::MissingData)
    }

    /// Batched status lookup for photos being indexed.
    pub async fn poll_photos(&self, ids: &[String]) -> Result<Vec<PhotoRecord>, FotodropError> {
        let url = self.endpoint("/v1/photos/status")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&StatusRequest { ids })
            .send()
            .await?;
        let payload: DataEnvelope<Vec<PhotoRecord>> = Self::handle_response(response).await?;
        payload.data.ok_or(FotodropError::MissingData)
    }

    /// Lists photos for the event that have not reached a terminal state,
    /// used to seed the client view on session start.
    pub async fn list_pending_photos(
        &self,
        event_id: &str,
    ) -> Result<Vec<PhotoRecord>, FotodropError> {
        let mut url = self.endpoint(&format!("/v1/events/{event_id}/photos"))?;
        url.query_pairs_mut().append_pair("state", "pending");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: DataEnvelope<Vec<PhotoRecord>> = Self::handle_response(response).await?;
        payload.data.ok_or(FotodropError::MissingData)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FotodropError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, FotodropError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FotodropError::Api { status, body })
        }
    }
}

#[derive(Debug, Serialize)]
struct PresignRequest<'a> {
    file_name: &'a str,
    content_type: &'a str,
    content_length: u64,
}

#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PresignTicket {
    pub upload_id: String,
    pub put_url: Url,
    #[serde(default)]
    pub required_headers: HashMap<String, String>,
    #[serde(default)]
    pub object_key: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Server record of a transferred file awaiting processing.
#[derive(Debug, Deserialize, Serialize)]
pub struct UploadRecord {
    pub upload_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub status: UploadState,
    #[serde(default)]
    pub photo_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Completed,
    Failed,
    Expired,
    // Statuses added server-side must not break a whole poll batch.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PhotoRecord {
    pub id: String,
    pub status: PhotoStatus,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub face_count: Option<u32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Uploading,
    Indexing,
    Indexed,
    Failed,
    #[serde(other)]
    Unknown,
}
