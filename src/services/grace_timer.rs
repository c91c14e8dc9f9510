use crate::services::store::UploadStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TimerState {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Debounced "index sync pending" flag.
///
/// Every completion sets the flag and restarts the window; the flag clears
/// only after a full window without completions.
#[derive(Clone)]
pub struct GraceTimer {
    window: Duration,
    store: UploadStore,
    state: Arc<Mutex<TimerState>>,
}

impl GraceTimer {
    pub fn new(window: Duration, store: UploadStore) -> Self {
        Self {
            window,
            store,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    pub fn arm(&self) {
        let mut state = self.state.lock();
        self.start(&mut state);
    }

    /// Arms the timer unless `shutdown` has fired. The check and the arm
    /// happen under the same lock [`cancel`](Self::cancel) takes, so a
    /// teardown that cancels first and then calls `cancel` never leaves a
    /// timer running.
    pub fn arm_unless_cancelled(&self, shutdown: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if shutdown.is_cancelled() {
            return false;
        }
        self.start(&mut state);
        true
    }

    fn start(&self, state: &mut TimerState) {
        self.store.set_index_sync_pending(true);

        state.generation += 1;
        if let Some(previous) = state.handle.take() {
            previous.abort();
        }

        let generation = state.generation;
        let window = self.window;
        let store = self.store.clone();
        let timer_state = self.state.clone();
        state.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut state = timer_state.lock();
            // A newer arm() may have raced with this wake-up.
            if state.generation == generation {
                state.handle = None;
                store.set_index_sync_pending(false);
                tracing::debug!("Index grace period elapsed");
            }
        }));
    }

    /// Stops the pending timer without touching the flag.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.store.index_sync_pending()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().handle.is_some()
    }
}
