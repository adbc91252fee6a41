//! Bounded worker pool for inbound updates.
//!
//! Channel endpoints hand jobs to `WorkerPool::spawn` and return immediately. At most
//! `max_workers` jobs run at once. A panicking job is logged and reported through its
//! `on_panic` callback instead of tearing down the dispatcher.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::error;

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let capacity = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a worker slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn spawn<F, P, PF>(&self, label: &str, job: F, on_panic: P) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
        P: FnOnce() -> PF + Send + 'static,
        PF: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let active = self.active.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let _guard = ActiveGuard::enter(active);
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!("Worker job '{label}' panicked");
                on_panic().await;
            }
        })
    }
}

struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
