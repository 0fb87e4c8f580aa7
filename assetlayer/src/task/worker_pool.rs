//! Threads that consume a [`WorkQueue`] by blocking dequeue.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::WorkQueue;

/// A fixed set of OS threads draining one queue.
///
/// Shutdown delivers exactly one wake sentinel per worker, so it is safe to
/// also poll the same queue from another thread.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers (at least one) on `queue`.
    pub fn start(queue: Arc<WorkQueue>, count: usize, name: &str) -> std::io::Result<Self> {
        let count = count.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let q = Arc::clone(&queue);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while q.dequeue_blocking() {}
                })?;
            workers.push(handle);
        }
        debug!(workers = count, pool = name, "worker pool started");
        Ok(Self { queue, workers })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wakes every worker and waits for it to exit.
    ///
    /// Items queued before the call run first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            self.queue.wake();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
