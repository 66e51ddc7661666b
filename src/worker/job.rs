//! Cancellable unit of work executed by the worker pool.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cooperative cancellation flag handed to every executing job.
///
/// Long-running jobs poll this at each loop iteration instead of reading
/// ambient thread state, so cancellation is always explicit.
#[derive(Clone, Default)]
pub struct AbortToken {
    flag: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A unit of cancellable work.
///
/// `fence` runs exactly once per job: after `execute` returns (normally
/// or after observing abort), or instead of `execute` when the pool
/// shuts down before a worker claims the job. Release shared resources
/// there, never in `execute`.
pub trait Job: Send + Sync {
    fn execute(&self, token: &AbortToken);

    /// Called asynchronously to interrupt a job blocked inside
    /// `execute`, e.g. by stopping the byte source it reads from. The
    /// abort token is already set when this runs.
    fn abort(&self) {}

    fn fence(&self) {}
}

/// Pool-internal per-job bookkeeping; shared between the queue, the
/// executing worker and the submitter's [`JobHandle`].
pub(crate) struct JobState {
    pub(crate) job: Arc<dyn Job>,
    pub(crate) token: AbortToken,
    fenced: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl JobState {
    pub(crate) fn new(job: Arc<dyn Job>) -> Arc<Self> {
        Arc::new(Self {
            job,
            token: AbortToken::new(),
            fenced: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
        })
    }

    /// Run the fence exactly once and mark the job finished.
    pub(crate) fn fence_once(&self) {
        if self.fenced.swap(true, Ordering::AcqRel) {
            warn!("job fence requested twice; ignoring");
            return;
        }
        self.job.fence();
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_cv.notify_all();
    }

    fn wait_finished(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cv.wait(&mut finished);
        }
    }
}

/// Handle returned by [`WorkerPool::submit`](crate::worker::WorkerPool::submit).
///
/// Lets the submitter request abort and wait until the job has been
/// fenced, after which the job no longer touches any shared state.
#[derive(Clone)]
pub struct JobHandle {
    pub(crate) state: Arc<JobState>,
}

impl JobHandle {
    /// Request cancellation: sets the abort token and notifies the job.
    pub fn abort(&self) {
        self.state.token.abort();
        self.state.job.abort();
    }

    /// Block until the job has finished and been fenced.
    pub fn wait_finished(&self) {
        self.state.wait_finished();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.token.is_aborted()
    }
}
