//! Cancellable worker pool.
//!
//! - [`WorkerPool`]: fixed set of OS threads executing submitted jobs
//! - [`CancellationToken`]: cooperative one-way cancel flag, optionally nested
//! - [`TokenSet`] / [`TokenGuard`]: live-token registry with RAII removal

mod token;
mod worker;

pub use token::{CancellationToken, TokenGuard, TokenSet};
pub use worker::{WorkerPool, DEFAULT_JOB_CAPACITY};
