//! Fixed-size pool of OS worker threads.
//!
//! Test executors may block on hardware I/O for seconds, so they run here
//! rather than on the tokio runtime or the dispatcher thread. Cancellation is
//! cooperative: the pool never preempts a running job, it only flips tokens.
//!
//! Jobs travel over a bounded `crossbeam_channel`; each worker owns a clone
//! of the receiver. Shutdown drops the pool's only sender, so every worker
//! leaves its `recv` loop once the channel is empty.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::token::{CancellationToken, TokenSet};
use crate::error::{Result, StationError};

/// Maximum jobs waiting for a free worker.
pub const DEFAULT_JOB_CAPACITY: usize = 1024;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool with a live-token registry for broadcast cancellation.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    // kept to count and discard jobs no worker has taken yet
    pending: Receiver<Job>,
    live: Arc<TokenSet>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    job_capacity: usize,
}

impl WorkerPool {
    /// Spawn `size` worker threads (at least one).
    ///
    /// # Errors
    ///
    /// Returns `Io` if a thread cannot be spawned. Threads already spawned
    /// are shut down before returning.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_job_capacity(size, DEFAULT_JOB_CAPACITY)
    }

    /// Spawn workers with a custom pending-job bound.
    pub fn with_job_capacity(size: usize, job_capacity: usize) -> Result<Self> {
        let size = size.max(1);
        let job_capacity = job_capacity.max(1);
        let (sender, receiver) = bounded::<Job>(job_capacity);

        let pool = Self {
            sender: Mutex::new(Some(sender)),
            pending: receiver,
            live: Arc::new(TokenSet::new()),
            workers: Mutex::new(Vec::with_capacity(size)),
            size,
            job_capacity,
        };

        for index in 0..size {
            let jobs = pool.pending.clone();
            let handle = thread::Builder::new()
                .name(format!("teststand-worker-{}", index))
                .spawn(move || worker_loop(index, jobs))?;
            pool.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        tracing::debug!("Worker pool started with {} threads", size);
        Ok(pool)
    }

    /// Number of worker threads.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting for a free worker.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Tokens of submitted cancellable work that has not finished.
    pub fn live_tokens(&self) -> usize {
        self.live.len()
    }

    /// Queue a job that ignores cancellation.
    ///
    /// # Errors
    ///
    /// - `PoolShutdown` after [`shutdown`](Self::shutdown)
    /// - `QueueFull` if the pending-job bound is reached
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(StationError::PoolShutdown);
        };

        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(StationError::QueueFull {
                capacity: self.job_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(StationError::PoolShutdown),
        }
    }

    /// Queue a job that receives a fresh token, and return that token.
    pub fn submit_cancellable<F>(&self, work: F) -> Result<CancellationToken>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        self.submit_with_token(token.clone(), work)?;
        Ok(token)
    }

    /// Queue a job under a caller-supplied token, typically a child of a
    /// generation token.
    ///
    /// The token stays in the live registry until the job returns or is
    /// discarded unrun.
    pub fn submit_with_token<F>(&self, token: CancellationToken, work: F) -> Result<()>
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let guard = self.live.insert(token.clone());
        self.submit(move || {
            let _guard = guard;
            work(&token);
        })
    }

    /// Cancel every live token. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.live.cancel_all()
    }

    /// Stop accepting work, cancel live tokens, drop queued jobs and join
    /// the workers. Idempotent.
    ///
    /// Running jobs are waited for; they are expected to notice their token.
    pub fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let cancelled = self.live.cancel_all();
        let discarded = self.pending.try_iter().count();

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if handles.is_empty() {
            return;
        }

        tracing::debug!(
            "Worker pool shutting down ({} tokens cancelled, {} jobs discarded)",
            cancelled,
            discarded
        );

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // a job shutting down its own pool cannot join itself
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread exited by panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("pending", &self.pending.len())
            .field("live_tokens", &self.live.len())
            .finish()
    }
}

fn worker_loop(index: usize, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("Job panicked on worker {}", index);
        }
    }
    tracing::trace!("Worker {} exiting", index);
}
