use crate::models::{PersistedState, RecordId, UploadRecord, UploadStage};
use crate::services::state_storage::StateStorage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

pub const INTERRUPTED_MESSAGE: &str = "Upload was interrupted. Please try again.";

/// A record found in `processing` on load that can be polled again.
#[derive(Debug, Clone, PartialEq)]
pub struct Resumable {
    pub id: RecordId,
    pub remote_id: String,
    pub started_at: Option<DateTime<Utc>>,
}

struct StoreInner {
    state: Mutex<PersistedState>,
    storage: Arc<dyn StateStorage>,
    changes: watch::Sender<Vec<UploadRecord>>,
}

/// The authoritative, persisted collection of upload records.
///
/// Every mutation is written through to the backing [`StateStorage`] and
/// published to subscribers.
#[derive(Clone)]
pub struct UploadStore {
    inner: Arc<StoreInner>,
}

impl UploadStore {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(PersistedState::default()),
                storage,
                changes,
            }),
        }
    }

    fn commit(&self, state: &PersistedState) {
        match serde_json::to_string(state) {
            Ok(blob) => {
                if let Err(e) = self.inner.storage.save(&blob) {
                    tracing::warn!("Failed to persist upload queue: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize upload queue: {}", e),
        }
        self.inner.changes.send_replace(state.records.clone());
    }

    /// Reads the storage without touching the in-memory state.
    ///
    /// An unreadable blob is logged and treated as an empty queue.
    pub fn read_persisted(&self) -> PersistedState {
        match self.inner.storage.load() {
            Ok(Some(blob)) => match serde_json::from_str::<PersistedState>(&blob) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("Discarding unreadable upload queue state: {}", e);
                    PersistedState::default()
                }
            },
            Ok(None) => PersistedState::default(),
            Err(e) => {
                tracing::warn!("Failed to read upload queue state: {}", e);
                PersistedState::default()
            }
        }
    }

    /// Replaces the in-memory state with whatever the storage holds.
    pub fn load(&self) -> usize {
        let loaded = self.read_persisted();
        let count = loaded.records.len();
        let mut state = self.inner.state.lock();
        *state = loaded;
        self.inner.changes.send_replace(state.records.clone());
        count
    }

    /// Fails every record whose driving pipeline cannot have survived a
    /// restart and returns the records that can resume polling.
    pub fn repair_after_load(&self) -> Vec<Resumable> {
        let mut state = self.inner.state.lock();
        let mut resumable = Vec::new();
        let mut repaired = 0;

        for record in state.records.iter_mut() {
            if record.stage.is_interruptible() {
                record.fail(INTERRUPTED_MESSAGE);
                repaired += 1;
                continue;
            }
            if record.stage != UploadStage::Processing {
                continue;
            }
            match record.remote_id.clone() {
                Some(remote_id) => resumable.push(Resumable {
                    id: record.id,
                    remote_id,
                    started_at: record.started_at,
                }),
                // Nothing to poll without a remote id.
                None => {
                    record.fail(INTERRUPTED_MESSAGE);
                    repaired += 1;
                }
            }
        }

        if repaired > 0 {
            tracing::info!("Marked {} interrupted uploads as failed", repaired);
            self.commit(&state);
        }
        resumable
    }

    pub fn insert(&self, record: UploadRecord) {
        let mut state = self.inner.state.lock();
        state.records.push(record);
        self.commit(&state);
    }

    /// Applies `f` to a live record.
    ///
    /// Unknown ids and terminal records are left untouched, as are mutations
    /// that would move the stage backwards. Returns the updated record.
    pub fn update<F>(&self, id: RecordId, f: F) -> Option<UploadRecord>
    where
        F: FnOnce(&mut UploadRecord),
    {
        let mut state = self.inner.state.lock();
        let slot = state.records.iter_mut().find(|r| r.id == id)?;
        if slot.is_terminal() {
            return None;
        }

        let mut next = slot.clone();
        f(&mut next);
        if next.stage != slot.stage && !slot.stage.can_advance_to(next.stage) {
            tracing::warn!(
                "Ignoring invalid transition {} -> {} for {}",
                slot.stage,
                next.stage,
                id
            );
            return None;
        }
        if next.stage == UploadStage::Completed && slot.completed_at.is_some() {
            next.completed_at = slot.completed_at;
        }
        if next == *slot {
            return Some(next);
        }

        *slot = next.clone();
        self.commit(&state);
        Some(next)
    }

    pub fn get(&self, id: RecordId) -> Option<UploadRecord> {
        self.inner
            .state
            .lock()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<UploadRecord> {
        self.inner.state.lock().records.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<UploadRecord>> {
        self.inner.changes.subscribe()
    }

    pub fn index_sync_pending(&self) -> bool {
        self.inner.state.lock().index_sync_pending
    }

    pub fn set_index_sync_pending(&self, pending: bool) {
        let mut state = self.inner.state.lock();
        if state.index_sync_pending != pending {
            state.index_sync_pending = pending;
            self.commit(&state);
        }
    }

    /// Drops every record and the persisted blob.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        *state = PersistedState::default();
        if let Err(e) = self.inner.storage.clear() {
            tracing::warn!("Failed to clear persisted upload queue: {}", e);
        }
        self.inner.changes.send_replace(Vec::new());
    }
}
