//! Worker pool and cancellable jobs.

pub mod job;
pub mod pool;

pub use job::{AbortToken, Job, JobHandle};
pub use pool::{WorkerPool, DEFAULT_WORKERS};
