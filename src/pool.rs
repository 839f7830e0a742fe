//! The worker pool (C6): a fixed number of OS threads that run fired jobs.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    busy: AtomicUsize,
    capacity: usize,
}

/// A fixed-size pool of OS threads that execute submitted closures.
///
/// Threads are never spawned or killed after construction; `submit` blocks
/// the caller's channel send if every thread is busy, so callers should
/// check [`WorkerPool::available`] or call [`WorkerPool::block_for_available`]
/// first, matching the scheduler loop's own "don't overcommit" discipline.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawns `size` worker threads. `size` must be at least 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = bounded(0);
        let shared = Arc::new(Shared {
            busy: AtomicUsize::new(0),
            capacity: size,
        });

        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            handles.push(
                thread::Builder::new()
                    .name(format!("quartzite-worker-{index}"))
                    .spawn(move || worker_loop(index, receiver, shared))
                    .expect("failed to spawn worker thread"),
            );
        }

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            shared,
        }
    }

    /// The pool's fixed thread count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// How many threads are idle right now.
    pub fn available(&self) -> usize {
        self.shared
            .capacity
            .saturating_sub(self.shared.busy.load(Ordering::Acquire))
    }

    /// Blocks the calling thread until at least one worker is idle, returning
    /// the number available. Polls briefly rather than using a condvar,
    /// since a worker finishing its task is a short, frequent event.
    pub fn block_for_available(&self) -> usize {
        loop {
            let available = self.available();
            if available > 0 {
                return available;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    /// Submits a task to run on the next idle thread. Returns `false` if the
    /// pool has been shut down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(|poison| poison.into_inner());
        match sender.as_ref() {
            Some(sender) => sender.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Stops accepting new work. If `wait_for_jobs_to_complete` is true,
    /// blocks until every in-flight task finishes; otherwise returns once
    /// the channel is closed, leaving running tasks to finish on their own.
    pub fn shutdown(&self, wait_for_jobs_to_complete: bool) {
        self.sender
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if wait_for_jobs_to_complete {
            self.join();
        }
    }

    fn join(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|poison| poison.into_inner());
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown join");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        self.join();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Task>, shared: Arc<Shared>) {
    while let Ok(task) = receiver.recv() {
        shared.busy.fetch_add(1, Ordering::AcqRel);
        let result = panic::catch_unwind(AssertUnwindSafe(task));
        shared.busy.fetch_sub(1, Ordering::AcqRel);
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(worker = index, %message, "job panicked; worker thread continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_task() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::channel();
        assert!(pool.submit(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        assert!(pool.submit(|| panic!("boom")));
        // Give the panicking task time to be caught, then confirm the
        // worker is still alive and able to run a second task.
        thread::sleep(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        assert!(pool.submit(move || {
            tx.send(()).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn capacity_reports_configured_size() {
        let pool = WorkerPool::new(3);
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn block_for_available_returns_once_idle() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.block_for_available(), 1);
    }
}
