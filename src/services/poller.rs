use crate::models::StatusReport;
use crate::services::api_client::UploadApi;
use std::time::Duration;
use tokio::time::Instant;

pub const PROCESSING_TIMEOUT_MESSAGE: &str = "Processing is taking longer than expected";

const FAST_PHASE: Duration = Duration::from_secs(30);
const MEDIUM_PHASE: Duration = Duration::from_secs(5 * 60);
const SLOW_PHASE: Duration = Duration::from_secs(15 * 60);

/// Delay before the next status check, or `None` once polling should give up.
pub fn poll_interval(elapsed: Duration) -> Option<Duration> {
    if elapsed <= FAST_PHASE {
        Some(Duration::from_secs(2))
    } else if elapsed <= MEDIUM_PHASE {
        Some(Duration::from_secs(5))
    } else if elapsed <= SLOW_PHASE {
        Some(Duration::from_secs(15))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Finished(StatusReport),
    TimedOut,
}

/// Polls until the remote side reports a terminal status or the schedule runs
/// out. `already_elapsed` is how long ago the upload started, so a resumed
/// poller continues the schedule instead of restarting it.
pub async fn poll_until_terminal(
    api: &dyn UploadApi,
    remote_id: &str,
    already_elapsed: Duration,
) -> PollOutcome {
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        let Some(interval) = poll_interval(already_elapsed + started.elapsed()) else {
            tracing::warn!(
                "Giving up on {} after {} status checks",
                remote_id,
                attempts
            );
            return PollOutcome::TimedOut;
        };

        attempts += 1;
        match api.fetch_status(remote_id).await {
            Ok(Some(report)) if report.status.is_terminal() => {
                tracing::debug!("{} reached {:?}", remote_id, report.status);
                return PollOutcome::Finished(report);
            }
            Ok(Some(_)) => {}
            Ok(None) => tracing::trace!("{} not visible yet", remote_id),
            Err(e) => tracing::warn!("Status check for {} failed: {}", remote_id, e),
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ApiResult};
    use crate::models::{RemoteStatus, UploadDestination};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[test]
    fn test_interval_schedule_boundaries() {
        let ms = Duration::from_millis;
        assert_eq!(poll_interval(ms(0)), Some(ms(2000)));
        assert_eq!(poll_interval(ms(30_000)), Some(ms(2000)));
        assert_eq!(poll_interval(ms(30_001)), Some(ms(5000)));
        assert_eq!(poll_interval(ms(300_000)), Some(ms(5000)));
        assert_eq!(poll_interval(ms(300_001)), Some(ms(15_000)));
        assert_eq!(poll_interval(ms(900_000)), Some(ms(15_000)));
        assert_eq!(poll_interval(ms(900_001)), None);
    }

    struct Scripted {
        replies: Mutex<VecDeque<ApiResult<Option<StatusReport>>>>,
    }

    #[async_trait]
    impl UploadApi for Scripted {
        async fn request_destination(&self, _: &str, _: &str) -> ApiResult<UploadDestination> {
            Err(ApiError::Cancelled)
        }

        async fn fetch_status(&self, _: &str) -> ApiResult<Option<StatusReport>> {
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Some(StatusReport::pending())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_and_errors_are_not_terminal() {
        let api = Scripted {
            replies: Mutex::new(VecDeque::from(vec![
                Ok(None),
                Err(ApiError::Status {
                    status: 502,
                    message: "Bad Gateway".to_string(),
                }),
                Ok(Some(StatusReport {
                    status: RemoteStatus::Completed,
                    completed_at: None,
                    classification: Some("document".to_string()),
                    message: None,
                })),
            ])),
        };

        let start = Instant::now();
        let outcome = poll_until_terminal(&api, "r1", Duration::ZERO).await;
        match outcome {
            PollOutcome::Finished(report) => assert_eq!(report.status, RemoteStatus::Completed),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_fifteen_minutes() {
        let api = Scripted {
            replies: Mutex::new(VecDeque::new()),
        };
        let start = Instant::now();
        let outcome = poll_until_terminal(&api, "slow", Duration::ZERO).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(start.elapsed() > SLOW_PHASE);
        assert!(start.elapsed() <= SLOW_PHASE + Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_schedule_continues_from_upload_start() {
        let api = Scripted {
            replies: Mutex::new(VecDeque::new()),
        };
        let outcome = poll_until_terminal(&api, "old", Duration::from_secs(16 * 60)).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(api.replies.lock().is_empty());
    }
}
