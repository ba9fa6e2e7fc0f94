use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::Error;
use crate::pending::Completer;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads fed through a channel.
///
/// Submitting never blocks the caller. Dropping the dispatcher closes the
/// queue, lets already-queued jobs run, and joins the workers.
pub struct Dispatcher {
    queue: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Starts `workers` threads, at least one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = Arc::clone(&rx);
            let spawned = thread::Builder::new()
                .name(format!("truerng-worker-{}", id))
                .spawn(move || worker_loop(id, rx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("failed to spawn worker {}: {}", id, e),
            }
        }

        // Without workers nothing would ever drain the queue; leave it closed
        // so submissions are abandoned instead of hanging.
        let queue = if handles.is_empty() { None } else { Some(tx) };
        log::debug!("dispatcher started with {} worker(s)", handles.len());

        Self {
            queue: Mutex::new(queue),
            workers: Mutex::new(handles),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queues `work` and returns immediately. `completer` receives the
    /// outcome exactly once, on a worker thread.
    pub fn submit<T, F>(&self, work: F, completer: Completer<T>)
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        // The completer fires after the unwind, so a panicking callback is
        // caught by the worker instead of aborting mid-unwind.
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
                log::warn!("request panicked, abandoning it");
                Err(Error::Abandoned)
            });
            completer.complete(result);
        });
        let rejected = {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            match queue.as_ref() {
                Some(tx) => tx.send(job).err().map(|mpsc::SendError(job)| job),
                None => Some(job),
            }
        };
        // Dropped outside the lock: the abandonment callback may submit again.
        if let Some(job) = rejected {
            log::warn!("dispatcher is closed, abandoning request");
            drop(job);
        }
    }

    /// Closes the queue and waits for queued jobs to finish.
    pub fn shutdown(&self) {
        drop(self.queue.lock().unwrap_or_else(PoisonError::into_inner).take());

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in handles {
            // A completion callback may drop the last owner from inside a worker.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("worker thread exited with a panic");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::warn!("request panicked on worker {}", id);
                }
            }
            Err(_) => break,
        }
    }
    log::trace!("worker {} exiting", id);
}
