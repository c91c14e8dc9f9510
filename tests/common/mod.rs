#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use upload_orchestrator::error::{ApiError, ApiResult};
use upload_orchestrator::models::{
    QuotaSnapshot, RemoteStatus, StatusReport, UploadDestination, UploadRecord,
};
use upload_orchestrator::services::notifier::FileListNotifier;
use upload_orchestrator::services::state_storage::StateStorage;
use upload_orchestrator::services::transfer::{ProgressFn, Transfer, TransferRequest};
use upload_orchestrator::{QueueConfig, UploadOrchestrator};

pub fn report(status: RemoteStatus) -> StatusReport {
    StatusReport {
        status,
        completed_at: None,
        classification: None,
        message: None,
    }
}

/// Scripted upload API. Remote ids are handed out as `remote-1`, `remote-2`, ...
pub struct MockApi {
    quota_detail: Mutex<Option<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Option<StatusReport>>>>,
    fallback: Mutex<Option<StatusReport>>,
    pub destination_requests: AtomicUsize,
    pub status_checks: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            quota_detail: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Some(report(RemoteStatus::Completed))),
            destination_requests: AtomicUsize::new(0),
            status_checks: AtomicUsize::new(0),
        })
    }

    pub fn refuse_with_quota(&self, detail: &str) {
        *self.quota_detail.lock() = Some(detail.to_string());
    }

    /// Replies for `remote_id`, consumed in order before the fallback applies.
    pub fn script(&self, remote_id: &str, replies: Vec<Option<StatusReport>>) {
        self.scripts
            .lock()
            .insert(remote_id.to_string(), replies.into());
    }

    pub fn set_fallback(&self, reply: Option<StatusReport>) {
        *self.fallback.lock() = reply;
    }

    pub fn destinations(&self) -> usize {
        self.destination_requests.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl upload_orchestrator::services::api_client::UploadApi for MockApi {
    async fn request_destination(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> ApiResult<UploadDestination> {
        let n = self.destination_requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(detail) = self.quota_detail.lock().clone() {
            return Err(ApiError::RateLimited { detail });
        }
        Ok(UploadDestination {
            upload_url: format!("http://store.test/bucket/{}/{}", n, file_name),
            file_id: format!("remote-{}", n),
            headers: HashMap::from([("Content-Type".to_string(), content_type.to_string())]),
            quota: Some(QuotaSnapshot {
                used: n as u64,
                tier: "free".to_string(),
                modality: "image".to_string(),
                count: n as u64,
                limit: 100,
            }),
        })
    }

    async fn fetch_status(&self, remote_id: &str) -> ApiResult<Option<StatusReport>> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripts
            .lock()
            .get_mut(remote_id)
            .and_then(|replies| replies.pop_front());
        match scripted {
            Some(reply) => Ok(reply),
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

/// Object store stand-in. When gated, each transfer needs one permit to finish.
pub struct MockTransfer {
    gate: Option<Arc<Semaphore>>,
    fail_status: Option<u16>,
    pub requests: Mutex<Vec<TransferRequest>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransfer {
    pub fn instant() -> Arc<Self> {
        Arc::new(Self::build(None, None))
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(Some(gate), None))
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self::build(None, Some(status)))
    }

    fn build(gate: Option<Arc<Semaphore>>, fail_status: Option<u16>) -> Self {
        Self {
            gate,
            fail_status,
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for MockTransfer {
    async fn put(&self, request: TransferRequest, progress: ProgressFn) -> ApiResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        let total = request.data.len() as u64;
        self.requests.lock().push(request);
        progress(total / 2, total);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| ApiError::Cancelled)?
                .forget();
        }

        if let Some(status) = self.fail_status {
            return Err(ApiError::Status {
                status,
                message: "Internal Server Error".to_string(),
            });
        }
        progress(total, total);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub refreshes: AtomicUsize,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileListNotifier for CountingNotifier {
    async fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config(max_concurrent_uploads: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent_uploads,
        ..QueueConfig::default()
    }
}

pub fn orchestrator(
    config: QueueConfig,
    api: Arc<MockApi>,
    transfer: Arc<MockTransfer>,
    storage: Arc<dyn StateStorage>,
) -> (UploadOrchestrator, Arc<CountingNotifier>) {
    let notifier = Arc::new(CountingNotifier::default());
    let orchestrator = UploadOrchestrator::new(config, api, transfer, storage, notifier.clone());
    (orchestrator, notifier)
}

/// Waits until `done` holds for a published snapshot of the queue.
pub async fn wait_for<F>(orchestrator: &UploadOrchestrator, mut done: F) -> Vec<UploadRecord>
where
    F: FnMut(&[UploadRecord]) -> bool,
{
    let mut changes = orchestrator.subscribe();
    let wait = async {
        loop {
            let snapshot = changes.borrow_and_update().clone();
            if done(&snapshot) {
                return snapshot;
            }
            changes.changed().await.expect("store dropped");
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), wait)
        .await
        .expect("condition never reached")
}

pub async fn settle(orchestrator: &UploadOrchestrator) {
    tokio::time::timeout(Duration::from_secs(3600), orchestrator.wait_until_settled())
        .await
        .expect("queue never settled");
}
