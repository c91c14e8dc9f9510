use crate::error::{ApiError, ApiResult};
use crate::models::{CandidateFile, UploadDestination};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Body, Client, header};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const CHUNK_SIZE: usize = 64 * 1024;

/// Called with `(bytes_sent, total_bytes)` as the body is consumed.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Everything the object store needs for one PUT.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub content_type: String,
    pub content_disposition: String,
    pub data: Bytes,
}

impl TransferRequest {
    /// Uses the headers the API asked for, falling back to values derived
    /// from the file itself.
    pub fn for_destination(destination: &UploadDestination, file: &CandidateFile) -> Self {
        let content_type = destination
            .header("content-type")
            .map(str::to_string)
            .unwrap_or_else(|| file.content_type.clone());
        let content_disposition = destination
            .header("content-disposition")
            .map(str::to_string)
            .unwrap_or_else(|| inline_disposition(&file.file_name));

        Self {
            url: destination.upload_url.clone(),
            content_type,
            content_disposition,
            data: file.data.clone(),
        }
    }
}

fn inline_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        utf8_percent_encode(file_name, NON_ALPHANUMERIC)
    )
}

/// Moves the bytes of one file to its granted destination.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn put(&self, request: TransferRequest, progress: ProgressFn) -> ApiResult<()>;
}

/// Plain PUT to the object store. The client carries no default headers so
/// API credentials never reach the store.
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> ApiResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

fn chunked(
    data: Bytes,
    progress: ProgressFn,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    let sent = Arc::new(AtomicU64::new(0));
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();

    futures::stream::iter(chunks.into_iter().map(move |chunk| {
        let done = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
        progress(done, total);
        Ok(chunk)
    }))
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn put(&self, request: TransferRequest, progress: ProgressFn) -> ApiResult<()> {
        let total = request.data.len() as u64;
        let body = Body::wrap_stream(chunked(request.data, progress));

        let response = self
            .client
            .put(&request.url)
            .header(header::CONTENT_TYPE, request.content_type)
            .header(header::CONTENT_DISPOSITION, request.content_disposition)
            .header(header::CONTENT_LENGTH, total)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("Upload failed").to_string()
                } else {
                    message
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn destination(headers: &[(&str, &str)]) -> UploadDestination {
        UploadDestination {
            upload_url: "http://store.local/bucket/key".to_string(),
            file_id: "f1".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            quota: None,
        }
    }

    #[test]
    fn test_required_headers_take_precedence() {
        let file = CandidateFile::from_bytes("photo.png", vec![1, 2, 3]);
        let dest = destination(&[
            ("Content-Type", "image/png"),
            ("Content-Disposition", "attachment; filename=\"x.png\""),
        ]);
        let req = TransferRequest::for_destination(&dest, &file);
        assert_eq!(req.content_type, "image/png");
        assert_eq!(req.content_disposition, "attachment; filename=\"x.png\"");
        assert_eq!(req.url, "http://store.local/bucket/key");
    }

    #[test]
    fn test_fallback_disposition_encodes_name() {
        let file = CandidateFile::from_bytes("résumé \"v2\".txt", b"hello".to_vec());
        let req = TransferRequest::for_destination(&destination(&[]), &file);
        assert_eq!(req.content_type, "text/plain");
        assert!(req.content_disposition.starts_with("inline; filename=\"r_sum_ _v2_.txt\""));
        assert!(req.content_disposition.contains("filename*=UTF-8''r%C3%A9sum%C3%A9"));
    }

    #[tokio::test]
    async fn test_chunked_stream_reports_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |sent: u64, total: u64| {
            sink.lock().unwrap().push((sent, total));
        });

        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 10]);
        let chunks: Vec<_> = chunked(data, progress).collect().await;
        assert_eq!(chunks.len(), 3);

        let seen = seen.lock().unwrap();
        let total = (CHUNK_SIZE * 2 + 10) as u64;
        assert_eq!(seen.last(), Some(&(total, total)));
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
