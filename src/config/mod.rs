use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Size and duration ceilings applied by the admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionLimits {
    /// Maximum image size in bytes (default: 20 MB)
    pub max_image_size: u64,

    /// Maximum size for every other file type in bytes (default: 500 MB)
    pub max_file_size: u64,

    /// Maximum video duration (default: 20 minutes)
    pub max_video_duration: Duration,

    /// Maximum audio duration (default: 60 minutes)
    pub max_audio_duration: Duration,

    /// How long media metadata decoding may take before the file is
    /// accepted on size alone (default: 5 seconds)
    pub metadata_timeout: Duration,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_image_size: 20 * 1024 * 1024,
            max_file_size: 500 * 1024 * 1024,
            max_video_duration: Duration::from_secs(20 * 60),
            max_audio_duration: Duration::from_secs(60 * 60),
            metadata_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the upload queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Base URL of the upload API (default: "http://127.0.0.1:3000")
    pub api_url: String,

    /// Bearer token sent to the upload API, never to the object store
    pub api_token: Option<String>,

    /// Maximum number of uploads holding network resources at once (default: 5)
    pub max_concurrent_uploads: usize,

    /// Quiet window after the last completion before the search index is
    /// considered synced (default: 120 seconds)
    pub index_grace_period: Duration,

    /// Where the session-scoped queue state is persisted
    pub state_path: PathBuf,

    /// Timeout for a single request to the upload API (default: 30 seconds)
    pub request_timeout: Duration,

    pub limits: AdmissionLimits,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".to_string(),
            api_token: None,
            max_concurrent_uploads: 5,
            index_grace_period: Duration::from_secs(120),
            state_path: default_state_path(),
            request_timeout: Duration::from_secs(30),
            limits: AdmissionLimits::default(),
        }
    }
}

fn default_state_path() -> PathBuf {
    env::temp_dir()
        .join("upload-orchestrator")
        .join("upload-queue.json")
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl QueueConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();
        let limits = default.limits.clone();

        Self {
            api_url: env::var("UPLOAD_API_URL").unwrap_or(default.api_url),

            api_token: env::var("UPLOAD_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            max_concurrent_uploads: parse_env::<usize>("MAX_CONCURRENT_UPLOADS")
                .filter(|n| *n > 0)
                .unwrap_or(default.max_concurrent_uploads),

            index_grace_period: parse_env::<u64>("INDEX_GRACE_PERIOD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.index_grace_period),

            state_path: env::var("UPLOAD_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.state_path),

            request_timeout: parse_env::<u64>("UPLOAD_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),

            limits: AdmissionLimits {
                max_image_size: parse_env("MAX_IMAGE_SIZE").unwrap_or(limits.max_image_size),
                max_file_size: parse_env("MAX_FILE_SIZE").unwrap_or(limits.max_file_size),
                max_video_duration: parse_env::<u64>("MAX_VIDEO_DURATION_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(limits.max_video_duration),
                max_audio_duration: parse_env::<u64>("MAX_AUDIO_DURATION_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(limits.max_audio_duration),
                metadata_timeout: parse_env::<u64>("METADATA_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(limits.metadata_timeout),
            },
        }
    }

    /// Create config for development (local API, short grace window)
    pub fn development() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".to_string(),
            api_token: None,
            max_concurrent_uploads: 5,
            index_grace_period: Duration::from_secs(10),
            state_path: default_state_path(),
            request_timeout: Duration::from_secs(10),
            limits: AdmissionLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_uploads, 5);
        assert_eq!(config.index_grace_period, Duration::from_secs(120));
        assert_eq!(config.limits.max_image_size, 20 * 1024 * 1024);
        assert!(config.limits.max_file_size > config.limits.max_image_size);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = QueueConfig::development();
        assert_eq!(config.index_grace_period, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_uploads, 5);
    }

    #[test]
    fn test_from_env_overrides_and_fallbacks() {
        unsafe {
            env::set_var("MAX_CONCURRENT_UPLOADS", "3");
            env::set_var("MAX_IMAGE_SIZE", "1024");
            env::set_var("INDEX_GRACE_PERIOD_SECS", "not-a-number");
            env::set_var("UPLOAD_API_TOKEN", "  ");
        }
        let config = QueueConfig::from_env();
        unsafe {
            env::remove_var("MAX_CONCURRENT_UPLOADS");
            env::remove_var("MAX_IMAGE_SIZE");
            env::remove_var("INDEX_GRACE_PERIOD_SECS");
            env::remove_var("UPLOAD_API_TOKEN");
        }
        assert_eq!(config.max_concurrent_uploads, 3);
        assert_eq!(config.limits.max_image_size, 1024);
        assert_eq!(config.index_grace_period, Duration::from_secs(120));
        assert!(config.api_token.is_none());
    }
}
