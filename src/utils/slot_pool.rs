use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};

/// Resolves with a slot once every earlier request has been served. Errors if
/// the pool is reset first.
pub type SlotRequest = oneshot::Receiver<OwnedSemaphorePermit>;

type Grant = oneshot::Sender<OwnedSemaphorePermit>;

struct Generation {
    semaphore: Arc<Semaphore>,
    queue: Option<mpsc::UnboundedSender<Grant>>,
    waiting: Arc<AtomicUsize>,
}

impl Generation {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            queue: None,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn queue(&mut self) -> &mpsc::UnboundedSender<Grant> {
        let semaphore = self.semaphore.clone();
        let waiting = self.waiting.clone();
        self.queue
            .get_or_insert_with(|| spawn_dispatcher(semaphore, waiting))
    }
}

/// Hands requests their permits strictly in the order they were queued.
fn spawn_dispatcher(
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
) -> mpsc::UnboundedSender<Grant> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Grant>();
    tokio::spawn(async move {
        while let Some(grant) = rx.recv().await {
            if grant.is_closed() {
                waiting.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                // Closed by reset; pending requests fail when `rx` drops.
                return;
            };
            waiting.fetch_sub(1, Ordering::SeqCst);
            // A requester that gave up in the meantime hands the slot back.
            let _ = grant.send(permit);
        }
    });
    tx
}

/// Bounded upload slots handed out in request order.
///
/// Requests are queued synchronously and a single dispatcher task awaits the
/// semaphore for each one in turn.
pub struct SlotPool {
    limit: usize,
    current: Mutex<Generation>,
}

impl SlotPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            current: Mutex::new(Generation::new(limit)),
        }
    }

    /// Joins the back of the queue. Must be called from within a runtime.
    pub fn acquire(&self) -> SlotRequest {
        let (tx, rx) = oneshot::channel();
        let mut current = self.current.lock();
        current.waiting.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(tx)) = current.queue().send(tx) {
            // The dispatcher is gone, e.g. its runtime shut down. Start over.
            current.queue = None;
            if current.queue().send(tx).is_err() {
                current.waiting.fetch_sub(1, Ordering::SeqCst);
            }
        }
        rx
    }

    /// Fails every queued request and starts a fresh semaphore. Permits from
    /// before the reset go back to the closed one and free nothing.
    pub fn reset(&self) {
        let mut current = self.current.lock();
        current.semaphore.close();
        *current = Generation::new(self.limit);
    }

    pub fn active(&self) -> usize {
        let current = self.current.lock();
        self.limit
            .saturating_sub(current.semaphore.available_permits())
    }

    pub fn waiting(&self) -> usize {
        self.current.lock().waiting.load(Ordering::SeqCst)
    }
}
