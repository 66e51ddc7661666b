//! Fixed-size thread pool running [`Job`]s with an exactly-once fence.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

use super::job::{Job, JobHandle, JobState};

pub const DEFAULT_WORKERS: usize = 4;

struct Shared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
    /// One slot per worker holding the job it is currently executing,
    /// so shutdown can abort in-flight jobs. Claimed under the queue
    /// lock; there is no window where a job is neither queued nor in a
    /// slot.
    running: Vec<Mutex<Option<Arc<JobState>>>>,
}

struct PoolQueue {
    pending: VecDeque<Arc<JobState>>,
    stopping: bool,
}

/// Pool of worker threads executing submitted jobs in FIFO order.
///
/// Every submitted job is fenced exactly once, whether it ran to
/// completion, was aborted mid-execution, or was still queued when the
/// pool shut down.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> io::Result<Self> {
        assert!(workers > 0);
        let shared = Arc::new(Shared {
            queue: Mutex::new(PoolQueue {
                pending: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
            running: (0..workers).map(|_| Mutex::new(None)).collect(),
        });
        let threads = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("strix-worker-{i}"))
                    .spawn(move || worker_loop(shared, i))
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Queue a job for execution. Returns a handle for abort and for
    /// waiting on the fence.
    pub fn submit(&self, job: Arc<dyn Job>) -> JobHandle {
        let state = JobState::new(job);
        let handle = JobHandle {
            state: Arc::clone(&state),
        };
        let mut queue = self.shared.queue.lock();
        if queue.stopping {
            // The pool no longer runs jobs; fence immediately so the
            // submitter's wait cannot hang.
            drop(queue);
            state.fence_once();
            return handle;
        }
        queue.pending.push_back(state);
        drop(queue);
        self.shared.available.notify_one();
        handle
    }

    /// Stop accepting work, fence every job that never ran, abort every
    /// job currently executing, and join the worker threads.
    pub fn shutdown(&self) {
        let unclaimed: Vec<Arc<JobState>> = {
            let mut queue = self.shared.queue.lock();
            queue.stopping = true;
            queue.pending.drain(..).collect()
        };
        self.shared.available.notify_all();
        for state in unclaimed {
            debug!("fencing job that never ran");
            state.fence_once();
        }
        for slot in &self.shared.running {
            let state = slot.lock().clone();
            if let Some(state) = state {
                debug!("aborting job still running at shutdown");
                state.token.abort();
                state.job.abort();
            }
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    loop {
        let state = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(state) = queue.pending.pop_front() {
                    // Claimed under the queue lock so shutdown always
                    // sees the job either pending or in the slot.
                    *shared.running[index].lock() = Some(Arc::clone(&state));
                    break state;
                }
                if queue.stopping {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            state.job.execute(&state.token);
        }));
        if result.is_err() {
            error!("job panicked during execution");
        }
        state.fence_once();
        shared.running[index].lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::AbortToken;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingJob {
        executed: AtomicUsize,
        fenced: AtomicUsize,
    }

    impl CountingJob {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executed: AtomicUsize::new(0),
                fenced: AtomicUsize::new(0),
            })
        }
    }

    impl Job for CountingJob {
        fn execute(&self, _token: &AbortToken) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }

        fn fence(&self) {
            self.fenced.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SpinJob;

    impl Job for SpinJob {
        fn execute(&self, token: &AbortToken) {
            while !token.is_aborted() {
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    struct PanicJob;

    impl Job for PanicJob {
        fn execute(&self, _token: &AbortToken) {
            panic!("boom");
        }
    }

    #[test]
    fn test_job_runs_and_fences_once() {
        let pool = WorkerPool::new(2).unwrap();
        let job = CountingJob::new();
        let handle = pool.submit(job.clone());
        handle.wait_finished();
        assert_eq!(job.executed.load(Ordering::SeqCst), 1);
        assert_eq!(job.fenced.load(Ordering::SeqCst), 1);
        pool.shutdown();
        assert_eq!(job.fenced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unclaimed_jobs_fenced_on_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        // Occupy the single worker so the remaining jobs stay queued.
        let blocker = pool.submit(Arc::new(SpinJob));
        thread::sleep(Duration::from_millis(20));
        let jobs: Vec<_> = (0..4).map(|_| CountingJob::new()).collect();
        let handles: Vec<_> = jobs
            .iter()
            .map(|j| pool.submit(j.clone() as Arc<dyn Job>))
            .collect();

        pool.shutdown();
        for (job, handle) in jobs.iter().zip(&handles) {
            handle.wait_finished();
            assert_eq!(job.executed.load(Ordering::SeqCst), 0);
            assert_eq!(job.fenced.load(Ordering::SeqCst), 1);
        }
        blocker.wait_finished();
    }

    #[test]
    fn test_shutdown_aborts_running_jobs() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(Arc::new(SpinJob));
        thread::sleep(Duration::from_millis(20));
        // The job spins until its token is set; shutdown must set it
        // rather than wait on the worker forever.
        pool.shutdown();
        handle.wait_finished();
        assert!(handle.is_aborted());
    }

    #[test]
    fn test_abort_unblocks_running_job() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(Arc::new(SpinJob));
        thread::sleep(Duration::from_millis(20));
        handle.abort();
        handle.wait_finished();
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_still_fenced() {
        let pool = WorkerPool::new(1).unwrap();
        let panicker = pool.submit(Arc::new(PanicJob));
        panicker.wait_finished();

        // The worker survives and keeps running later jobs.
        let job = CountingJob::new();
        pool.submit(job.clone()).wait_finished();
        assert_eq!(job.executed.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fences_immediately() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        let job = CountingJob::new();
        let handle = pool.submit(job.clone());
        handle.wait_finished();
        assert_eq!(job.executed.load(Ordering::SeqCst), 0);
        assert_eq!(job.fenced.load(Ordering::SeqCst), 1);
    }
}
