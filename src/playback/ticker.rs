//! Periodic tick thread. Sleeps on a condition variable between ticks
//! so `stop` takes effect immediately instead of after the interval.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Control {
    stop: bool,
    interval: Duration,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

pub struct Ticker {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    /// Spawn the tick thread; `tick` runs once immediately and then at
    /// every interval.
    pub fn start(interval: Duration, mut tick: impl FnMut() + Send + 'static) -> Self {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                stop: false,
                interval,
            }),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("strix-tick".into())
                .spawn(move || loop {
                    tick();
                    let mut control = shared.control.lock();
                    if control.stop {
                        break;
                    }
                    let interval = control.interval;
                    shared.wake.wait_for(&mut control, interval);
                    if control.stop {
                        break;
                    }
                })
                .ok()
        };
        Self { shared, worker }
    }

    /// Change the cadence; takes effect from the next tick on.
    pub fn set_interval(&self, interval: Duration) {
        self.shared.control.lock().interval = interval;
    }

    /// Stop ticking and join the tick thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut control = self.shared.control.lock();
            control.stop = true;
        }
        self.wake_now();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn wake_now(&self) {
        self.shared.wake.notify_all();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_ticks_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let count = Arc::clone(&count);
            Ticker::start(Duration::from_millis(5), move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(60));
        ticker.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_stop_is_prompt() {
        let ticker = Ticker::start(Duration::from_secs(60), || {});
        thread::sleep(Duration::from_millis(20));
        let begin = Instant::now();
        ticker.stop();
        assert!(begin.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interval_change_applies() {
        let count = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let count = Arc::clone(&count);
            Ticker::start(Duration::from_secs(60), move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        // Only the immediate first tick has happened so far.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        ticker.set_interval(Duration::from_millis(5));
        ticker.wake_now();
        thread::sleep(Duration::from_millis(60));
        ticker.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
