use crate::config::QueueConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{StatusReport, UploadDestination};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use std::time::Duration;
use url::Url;

pub const QUOTA_EXCEEDED_MESSAGE: &str = "Upload quota exceeded";

/// The remote API that grants upload destinations and reports processing status.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn request_destination(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> ApiResult<UploadDestination>;

    /// `Ok(None)` means the file is not visible yet.
    async fn fetch_status(&self, remote_id: &str) -> ApiResult<Option<StatusReport>>;
}

#[derive(Serialize)]
struct DestinationRequest<'a> {
    file_name: &'a str,
    content_type: &'a str,
}

pub struct HttpUploadApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpUploadApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> ApiResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &QueueConfig) -> ApiResult<Self> {
        Self::new(
            &config.api_url,
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Decode(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Picks the human-readable reason out of an error body.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "error", "message"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

async fn error_for(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_detail(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unexpected response")
            .to_string()
    });
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn request_destination(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> ApiResult<UploadDestination> {
        let url = self.endpoint(&["uploads"])?;
        let response = self
            .authorize(self.client.post(url))
            .header(header::ACCEPT, "application/json")
            .json(&DestinationRequest {
                file_name,
                content_type,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let body = response.text().await.unwrap_or_default();
                let detail =
                    extract_detail(&body).unwrap_or_else(|| QUOTA_EXCEEDED_MESSAGE.to_string());
                tracing::warn!("Upload destination refused for {}: {}", file_name, detail);
                Err(ApiError::RateLimited { detail })
            }
            s if s.is_success() => decode(response).await,
            _ => Err(error_for(response).await),
        }
    }

    async fn fetch_status(&self, remote_id: &str) -> ApiResult<Option<StatusReport>> {
        let url = self.endpoint(&["files", remote_id, "status"])?;
        let response = self.authorize(self.client.get(url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => decode(response).await.map(Some),
            _ => Err(error_for(response).await),
        }
    }
}
