use crate::config::QueueConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    CandidateFile, QuotaSnapshot, RecordId, RemoteStatus, UploadRecord, UploadStage,
};
use crate::services::api_client::{HttpUploadApi, UploadApi};
use crate::services::grace_timer::GraceTimer;
use crate::services::normalizer::{self, CONVERSION_FAILED_MESSAGE};
use crate::services::notifier::{FileListNotifier, NoOpNotifier};
use crate::services::poller::{self, PROCESSING_TIMEOUT_MESSAGE, PollOutcome};
use crate::services::state_storage::{FileStateStorage, StateStorage};
use crate::services::store::{Resumable, UploadStore};
use crate::services::transfer::{HttpTransfer, ProgressFn, Transfer, TransferRequest};
use crate::utils::slot_pool::{SlotPool, SlotRequest};
use crate::utils::validation::admission_check;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PROCESSING_FAILED_MESSAGE: &str = "Processing failed";
const PROCESSING_REJECTED_MESSAGE: &str = "File was rejected during processing";

/// What [`UploadOrchestrator::restore`] found in storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub resumed: usize,
}

struct OrchestratorInner {
    config: QueueConfig,
    api: Arc<dyn UploadApi>,
    transfer: Arc<dyn Transfer>,
    notifier: Arc<dyn FileListNotifier>,
    store: UploadStore,
    pool: SlotPool,
    grace: GraceTimer,
    shutdown: Mutex<CancellationToken>,
    transfers: DashMap<RecordId, CancellationToken>,
    pollers: DashMap<RecordId, AbortHandle>,
    resumed: Mutex<HashSet<RecordId>>,
    loaded: AtomicBool,
    restorable: Mutex<Vec<Resumable>>,
    latest_quota: Mutex<Option<QuotaSnapshot>>,
}

/// Drives every submitted file through admission, upload and processing.
///
/// Cheap to clone; all clones share the same queue, slot pool and registries.
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl UploadOrchestrator {
    pub fn new(
        config: QueueConfig,
        api: Arc<dyn UploadApi>,
        transfer: Arc<dyn Transfer>,
        storage: Arc<dyn StateStorage>,
        notifier: Arc<dyn FileListNotifier>,
    ) -> Self {
        let store = UploadStore::new(storage);
        let pool = SlotPool::new(config.max_concurrent_uploads);
        let grace = GraceTimer::new(config.index_grace_period, store.clone());

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                api,
                transfer,
                notifier,
                store,
                pool,
                grace,
                shutdown: Mutex::new(CancellationToken::new()),
                transfers: DashMap::new(),
                pollers: DashMap::new(),
                resumed: Mutex::new(HashSet::new()),
                loaded: AtomicBool::new(false),
                restorable: Mutex::new(Vec::new()),
                latest_quota: Mutex::new(None),
            }),
        }
    }

    /// Wires the HTTP collaborators and file-backed state from configuration.
    pub fn from_config(config: QueueConfig) -> ApiResult<Self> {
        let api = Arc::new(HttpUploadApi::from_config(&config)?);
        let transfer = Arc::new(HttpTransfer::new()?);
        let storage = Arc::new(FileStateStorage::new(config.state_path.clone()));
        Ok(Self::new(
            config,
            api,
            transfer,
            storage,
            Arc::new(NoOpNotifier),
        ))
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.lock().clone()
    }

    /// Admits files in the order given and starts their pipelines.
    ///
    /// Individual failures end up on the records; the returned ids cover
    /// every file that got a record.
    pub async fn enqueue(&self, files: Vec<CandidateFile>) -> Vec<RecordId> {
        let shutdown = self.shutdown_token();
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            if shutdown.is_cancelled() {
                break;
            }
            if let Some(id) = self.admit(file, &shutdown).await {
                ids.push(id);
            }
        }
        ids
    }

    async fn admit(&self, file: CandidateFile, shutdown: &CancellationToken) -> Option<RecordId> {
        let store = &self.inner.store;
        let verdict = admission_check(&file, &self.inner.config.limits).await;
        if shutdown.is_cancelled() {
            return None;
        }

        let mut record = UploadRecord::new(file.file_name.clone(), UploadStage::Queued);
        record.size_bytes = file.size();
        record.content_type = Some(file.content_type.clone());
        let id = record.id;

        if let Err(e) = verdict {
            tracing::info!("Rejected {}: {}", file.file_name, e);
            record.stage = UploadStage::Rejected;
            record.error = Some(e.message);
            store.insert(record);
            return Some(id);
        }
        store.insert(record);

        let file = if normalizer::needs_conversion(&file) {
            match normalizer::normalize(file).await {
                Ok(converted) => {
                    store.update(id, |r| {
                        r.file_name = converted.file_name.clone();
                        r.content_type = Some(converted.content_type.clone());
                        r.size_bytes = converted.size();
                    });
                    converted
                }
                Err(e) => {
                    tracing::warn!("Image conversion failed for {}: {}", id, e);
                    store.update(id, |r| r.fail(CONVERSION_FAILED_MESSAGE));
                    return Some(id);
                }
            }
        } else {
            file
        };

        if shutdown.is_cancelled() {
            return Some(id);
        }

        // Join the slot queue now so files are admitted in drop order.
        let slot = self.inner.pool.acquire();
        let this = self.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            this.run_pipeline(id, file, slot, shutdown).await;
        });
        Some(id)
    }

    async fn run_pipeline(
        &self,
        id: RecordId,
        file: CandidateFile,
        slot: SlotRequest,
        shutdown: CancellationToken,
    ) {
        let store = &self.inner.store;

        let permit = tokio::select! {
            _ = shutdown.cancelled() => return,
            granted = slot => match granted {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let origin = Instant::now();
        let started_at = Utc::now();
        let preparing = store.update(id, |r| {
            r.stage = UploadStage::Preparing;
            r.started_at = Some(started_at);
        });
        if preparing.is_none() {
            return;
        }

        let requested = self
            .inner
            .api
            .request_destination(&file.file_name, &file.content_type);
        let destination = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = requested => result,
        };
        let destination = match destination {
            Ok(destination) => destination,
            Err(e) => {
                let quota_exceeded = e.is_quota();
                tracing::warn!("❌ Destination request failed for {}: {}", file.file_name, e);
                store.update(id, |r| {
                    r.fail(e.to_string());
                    r.quota_exceeded = quota_exceeded;
                });
                return;
            }
        };
        if let Some(quota) = &destination.quota {
            *self.inner.latest_quota.lock() = Some(quota.clone());
        }
        let remote_id = destination.file_id.clone();

        if store
            .update(id, |r| {
                r.stage = UploadStage::Uploading;
                r.progress = 0;
            })
            .is_none()
        {
            return;
        }

        let cancel = shutdown.child_token();
        self.inner.transfers.insert(id, cancel.clone());
        let progress_store = store.clone();
        let progress: ProgressFn = Arc::new(move |sent: u64, total: u64| {
            let percent = if total == 0 {
                99
            } else {
                (sent.saturating_mul(100) / total).min(100) as u8
            };
            progress_store.update(id, |r| r.bump_progress(percent));
        });

        let request = TransferRequest::for_destination(&destination, &file);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = self.inner.transfer.put(request, progress) => result,
        };
        self.inner.transfers.remove(&id);

        if let Err(e) = result {
            tracing::warn!("❌ Transfer failed for {}: {}", file.file_name, e);
            store.update(id, |r| {
                r.fail(e.to_string());
                r.remote_id = Some(remote_id.clone());
            });
            return;
        }

        let processing = store.update(id, |r| {
            r.stage = UploadStage::Processing;
            r.progress = 100;
            r.remote_id = Some(remote_id.clone());
        });
        // The slot covers preparing and uploading only.
        drop(permit);
        if processing.is_none() || shutdown.is_cancelled() {
            return;
        }

        tracing::info!("✅ Uploaded {} as {}", file.file_name, remote_id);
        self.spawn_poller(id, remote_id, origin.elapsed(), shutdown);
    }

    fn spawn_poller(
        &self,
        id: RecordId,
        remote_id: String,
        already_elapsed: Duration,
        shutdown: CancellationToken,
    ) {
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let this = self.clone();
        let task = tokio::spawn(async move {
            if start_rx.await.is_err() {
                return;
            }
            let api = this.inner.api.clone();
            let polling = poller::poll_until_terminal(api.as_ref(), &remote_id, already_elapsed);
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return,
                outcome = polling => outcome,
            };
            // Stays registered until the outcome is applied.
            this.finish_processing(id, outcome, &shutdown).await;
            this.inner.pollers.remove(&id);
        });

        // Registered before the task may run, so teardown always sees it.
        self.inner.pollers.insert(id, task.abort_handle());
        let _ = start_tx.send(());
    }

    async fn finish_processing(
        &self,
        id: RecordId,
        outcome: PollOutcome,
        shutdown: &CancellationToken,
    ) {
        let store = &self.inner.store;
        let report = match outcome {
            PollOutcome::TimedOut => {
                store.update(id, |r| r.fail(PROCESSING_TIMEOUT_MESSAGE));
                return;
            }
            PollOutcome::Finished(report) => report,
        };

        match report.status {
            RemoteStatus::Completed => {
                let completed_at = report.completed_at.unwrap_or_else(Utc::now);
                let completed = store.update(id, |r| {
                    r.stage = UploadStage::Completed;
                    r.progress = 100;
                    r.error = None;
                    r.completed_at = Some(completed_at);
                    r.classification = report.classification.clone();
                });
                if completed.is_some() {
                    tracing::info!("✅ Processing completed for {}", id);
                    if self.inner.grace.arm_unless_cancelled(shutdown) {
                        self.inner.notifier.refresh().await;
                    }
                }
            }
            RemoteStatus::Failed => {
                let message = report
                    .message
                    .unwrap_or_else(|| PROCESSING_FAILED_MESSAGE.to_string());
                tracing::warn!("Processing failed for {}: {}", id, message);
                store.update(id, |r| r.fail(message));
            }
            RemoteStatus::Rejected => {
                let message = report
                    .message
                    .unwrap_or_else(|| PROCESSING_REJECTED_MESSAGE.to_string());
                tracing::warn!("🚨 Processing rejected {}: {}", id, message);
                store.update(id, |r| {
                    r.stage = UploadStage::Rejected;
                    r.error = Some(message);
                });
            }
            RemoteStatus::Pending | RemoteStatus::Processing => {}
        }
    }

    /// Starts a poller for a record found in `processing` on load. Each record
    /// is resumed at most once for the lifetime of this orchestrator.
    pub fn resume_polling(&self, resumable: Resumable) -> bool {
        if !self.inner.resumed.lock().insert(resumable.id) {
            return false;
        }

        let already_elapsed = resumable
            .started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .unwrap_or_default();
        tracing::info!(
            "🔄 Resuming status checks for {} ({}s since upload)",
            resumable.remote_id,
            already_elapsed.as_secs()
        );
        self.spawn_poller(
            resumable.id,
            resumable.remote_id,
            already_elapsed,
            self.shutdown_token(),
        );
        true
    }

    /// Loads persisted state, fails what cannot have survived the restart,
    /// and resumes polling for the rest.
    ///
    /// Only the first call after construction or [`teardown`](Self::teardown)
    /// touches storage. Later calls just retry resuming what that load found,
    /// so records driven by live pipelines are never repaired.
    pub fn restore(&self) -> RestoreSummary {
        let store = &self.inner.store;
        let mut restored = 0;
        if !self.inner.loaded.swap(true, Ordering::SeqCst) {
            restored = store.load();
            *self.inner.restorable.lock() = store.repair_after_load();
            if store.index_sync_pending() {
                self.inner.grace.arm();
            }
        }

        let restorable = self.inner.restorable.lock().clone();
        let resumed = restorable
            .into_iter()
            .filter(|r| self.resume_polling(r.clone()))
            .count();

        if restored > 0 || resumed > 0 {
            tracing::info!(
                "📂 Restored {} uploads, resumed {} status checks",
                restored,
                resumed
            );
        }
        RestoreSummary { restored, resumed }
    }

    /// Reads the persisted queue without adopting, repairing or resuming it.
    pub fn persisted_records(&self) -> Vec<UploadRecord> {
        self.inner.store.read_persisted().records
    }

    /// Cancels everything in flight and forgets every record.
    pub fn teardown(&self) {
        let fresh = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.inner.shutdown.lock(), fresh);
        previous.cancel();

        for entry in self.inner.transfers.iter() {
            entry.value().cancel();
        }
        self.inner.transfers.clear();

        for entry in self.inner.pollers.iter() {
            entry.value().abort();
        }
        self.inner.pollers.clear();

        self.inner.grace.cancel();
        self.inner.pool.reset();
        self.inner.resumed.lock().clear();
        self.inner.restorable.lock().clear();
        self.inner.loaded.store(false, Ordering::SeqCst);
        *self.inner.latest_quota.lock() = None;
        self.inner.store.clear();

        tracing::info!("🧹 Upload queue cleared");
    }

    /// Resolves once every record is terminal.
    pub async fn wait_until_settled(&self) {
        let mut changes = self.inner.store.subscribe();
        loop {
            if changes.borrow_and_update().iter().all(UploadRecord::is_terminal) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn records(&self) -> Vec<UploadRecord> {
        self.inner.store.snapshot()
    }

    pub fn record(&self, id: RecordId) -> Option<UploadRecord> {
        self.inner.store.get(id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<UploadRecord>> {
        self.inner.store.subscribe()
    }

    pub fn is_index_sync_pending(&self) -> bool {
        self.inner.grace.is_pending()
    }

    pub fn latest_quota(&self) -> Option<QuotaSnapshot> {
        self.inner.latest_quota.lock().clone()
    }

    pub fn slots_in_use(&self) -> usize {
        self.inner.pool.active()
    }

    pub fn slots_waiting(&self) -> usize {
        self.inner.pool.waiting()
    }

    pub fn active_pollers(&self) -> usize {
        self.inner.pollers.len()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}
