use crate::config::AdmissionLimits;
use crate::models::CandidateFile;
use crate::services::metadata::MetadataService;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

fn megabytes(bytes: u64) -> u64 {
    bytes / 1024 / 1024
}

fn minutes(duration: Duration) -> u64 {
    duration.as_secs() / 60
}

/// Validates file size against the ceiling for its type
pub fn validate_file_size(
    candidate: &CandidateFile,
    limits: &AdmissionLimits,
) -> Result<(), ValidationError> {
    let size = candidate.size();
    if size == 0 {
        return Err(ValidationError {
            code: "EMPTY_FILE",
            message: format!("{} is empty", candidate.file_name),
        });
    }

    if candidate.is_image() {
        if size > limits.max_image_size {
            return Err(ValidationError {
                code: "IMAGE_TOO_LARGE",
                message: format!(
                    "Image exceeds the maximum size of {} MB",
                    megabytes(limits.max_image_size)
                ),
            });
        }
    } else if size > limits.max_file_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File exceeds the maximum size of {} MB",
                megabytes(limits.max_file_size)
            ),
        });
    }
    Ok(())
}

/// Validates a known media duration against the ceiling for its type
pub fn validate_duration(
    candidate: &CandidateFile,
    duration: Duration,
    limits: &AdmissionLimits,
) -> Result<(), ValidationError> {
    if candidate.is_video() && duration > limits.max_video_duration {
        return Err(ValidationError {
            code: "VIDEO_TOO_LONG",
            message: format!(
                "Video exceeds the maximum length of {} minutes",
                minutes(limits.max_video_duration)
            ),
        });
    }
    if candidate.is_audio() && duration > limits.max_audio_duration {
        return Err(ValidationError {
            code: "AUDIO_TOO_LONG",
            message: format!(
                "Audio exceeds the maximum length of {} minutes",
                minutes(limits.max_audio_duration)
            ),
        });
    }
    Ok(())
}

/// Decides whether a candidate may enter the queue.
///
/// Media whose metadata cannot be read within `metadata_timeout` is accepted
/// on size alone.
pub async fn admission_check(
    candidate: &CandidateFile,
    limits: &AdmissionLimits,
) -> Result<(), ValidationError> {
    validate_file_size(candidate, limits)?;

    if candidate.is_video() || candidate.is_audio() {
        match MetadataService::probe_duration(candidate.data.clone(), limits.metadata_timeout).await
        {
            Some(duration) => validate_duration(candidate, duration, limits)?,
            None => tracing::debug!(
                "Duration of {} unknown, accepting on size alone",
                candidate.file_name
            ),
        }
    }
    Ok(())
}
