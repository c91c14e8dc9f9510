use crate::error::CandidateError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type RecordId = Uuid;

/// Pipeline stage of a single upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Queued,
    Preparing,
    Uploading,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl UploadStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStage::Completed | UploadStage::Failed | UploadStage::Rejected
        )
    }

    /// Stages whose live network operation cannot survive a restart.
    pub fn is_interruptible(self) -> bool {
        matches!(
            self,
            UploadStage::Queued | UploadStage::Preparing | UploadStage::Uploading
        )
    }

    /// Stages during which the record holds a concurrency slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, UploadStage::Preparing | UploadStage::Uploading)
    }

    fn rank(self) -> u8 {
        match self {
            UploadStage::Queued => 0,
            UploadStage::Preparing => 1,
            UploadStage::Uploading => 2,
            UploadStage::Processing => 3,
            UploadStage::Completed | UploadStage::Failed | UploadStage::Rejected => 4,
        }
    }

    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_advance_to(self, next: UploadStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            UploadStage::Failed | UploadStage::Rejected => true,
            _ => next.rank() >= self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStage::Queued => "queued",
            UploadStage::Preparing => "preparing",
            UploadStage::Uploading => "uploading",
            UploadStage::Processing => "processing",
            UploadStage::Completed => "completed",
            UploadStage::Failed => "failed",
            UploadStage::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state for one submitted file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: RecordId,
    pub file_name: String,
    pub stage: UploadStage,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub quota_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
}

impl UploadRecord {
    pub fn new(file_name: impl Into<String>, stage: UploadStage) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            stage,
            progress: 0,
            error: None,
            quota_exceeded: false,
            remote_id: None,
            completed_at: None,
            size_bytes: 0,
            content_type: None,
            started_at: None,
            classification: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Moves to `failed` with the given reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.stage = UploadStage::Failed;
        self.error = Some(reason.into());
    }

    /// Raises progress while uploading; never decreases and never reports 100
    /// before the transfer has been confirmed.
    pub fn bump_progress(&mut self, percent: u8) {
        if self.stage == UploadStage::Uploading {
            self.progress = self.progress.max(percent.min(99));
        }
    }
}

/// Quota usage reported alongside a granted destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub modality: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub limit: u64,
}

/// Where and how to send the bytes of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadDestination {
    pub upload_url: String,
    #[serde(alias = "remote_id")]
    pub file_id: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub quota: Option<QuotaSnapshot>,
}

impl UploadDestination {
    /// Case-insensitive lookup of a required transfer header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Processing status as reported by the collaborator API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl RemoteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteStatus::Completed | RemoteStatus::Failed | RemoteStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RemoteStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: RemoteStatus::Processing,
            completed_at: None,
            classification: None,
            message: None,
        }
    }
}

/// The single blob kept in session storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub records: Vec<UploadRecord>,
    #[serde(default)]
    pub index_sync_pending: bool,
}

/// A local file offered to the queue.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: Option<PathBuf>,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl CandidateFile {
    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let data = data.into();
        let content_type = detect_content_type(&data, &file_name).to_string();
        Self {
            path: None,
            file_name,
            content_type,
            data,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CandidateError> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(CandidateError::NotAFile(path.display().to_string()));
        }
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mut candidate = Self::from_bytes(file_name, data);
        candidate.path = Some(path.to_path_buf());
        Ok(candidate)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.content_type.starts_with("audio/")
    }
}

/// Detects a MIME type from magic bytes, falling back to the extension.
pub fn detect_content_type(bytes: &[u8], file_name: &str) -> &'static str {
    let detected = infer::get(bytes).map(|k| k.mime_type());
    match detected {
        Some(m) if m != "application/octet-stream" => m,
        _ => {
            let extension = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
            match extension.as_str() {
                "mp4" | "m4v" => "video/mp4",
                "webm" => "video/webm",
                "mkv" => "video/x-matroska",
                "avi" => "video/x-msvideo",
                "mov" => "video/quicktime",
                "mp3" => "audio/mpeg",
                "wav" => "audio/wav",
                "flac" => "audio/flac",
                "ogg" => "audio/ogg",
                "m4a" => "audio/mp4",
                "jpg" | "jpeg" => "image/jpeg",
                "png" => "image/png",
                "gif" => "image/gif",
                "webp" => "image/webp",
                "tif" | "tiff" => "image/tiff",
                "bmp" => "image/bmp",
                "pdf" => "application/pdf",
                "txt" | "md" => "text/plain",
                "json" => "application/json",
                _ => "application/octet-stream",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serializes_lowercase() {
        let json = serde_json::to_string(&UploadStage::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let stage: UploadStage = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(stage, UploadStage::Rejected);
    }

    #[test]
    fn test_stage_transitions() {
        assert!(UploadStage::Queued.can_advance_to(UploadStage::Preparing));
        assert!(UploadStage::Uploading.can_advance_to(UploadStage::Processing));
        assert!(UploadStage::Preparing.can_advance_to(UploadStage::Failed));
        assert!(!UploadStage::Uploading.can_advance_to(UploadStage::Queued));
        assert!(!UploadStage::Completed.can_advance_to(UploadStage::Failed));
        assert!(!UploadStage::Rejected.can_advance_to(UploadStage::Queued));
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let mut record = UploadRecord::new("a.png", UploadStage::Uploading);
        record.bump_progress(40);
        record.bump_progress(20);
        assert_eq!(record.progress, 40);
        record.bump_progress(100);
        assert_eq!(record.progress, 99);
    }

    #[test]
    fn test_detect_content_type_fallback() {
        assert_eq!(detect_content_type(b"hello", "notes.txt"), "text/plain");
        assert_eq!(detect_content_type(b"\x89PNG\r\n\x1a\n", "x.bin"), "image/png");
        assert_eq!(detect_content_type(&[0u8; 4], "blob"), "application/octet-stream");
    }

    #[test]
    fn test_status_report_accepts_error_alias() {
        let report: StatusReport =
            serde_json::from_str(r#"{"status":"failed","error":"Corrupt file"}"#).unwrap();
        assert_eq!(report.status, RemoteStatus::Failed);
        assert_eq!(report.message.as_deref(), Some("Corrupt file"));
    }
}
