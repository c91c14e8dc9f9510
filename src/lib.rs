pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::{AdmissionLimits, QueueConfig};
pub use crate::error::{ApiError, ApiResult};
pub use crate::models::{CandidateFile, RecordId, UploadRecord, UploadStage};
pub use crate::services::orchestrator::{RestoreSummary, UploadOrchestrator};
