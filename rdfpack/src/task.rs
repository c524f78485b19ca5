//! Stage work runs on bounded worker pools. The worker count is the stage's
//! permit count, so queued tasks wait for a free worker instead of a thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// A fixed pool of worker threads whose task results are collected together.
///
/// Tasks queue up once every worker is busy, so the thread count never grows
/// with the number of tasks. [`TaskSet::drain`] always waits for every task,
/// including ones spawned while draining, and only then reports the first
/// failure.
pub struct TaskSet {
    pool: rayon::ThreadPool,
    state: Arc<(Mutex<Outcomes>, Condvar)>,
}

#[derive(Default)]
struct Outcomes {
    pending: usize,
    first: Option<Error>,
}

impl TaskSet {
    /// Start `workers` threads named `<name>-<i>`.
    pub fn new(name: &str, workers: usize) -> Result<Self> {
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| Error::invariant(format!("cannot start {} workers: {}", name, e)))?;
        Ok(TaskSet {
            pool,
            state: Arc::default(),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.state.0.lock().pending += 1;
        let state = Arc::clone(&self.state);
        self.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|_| Err(Error::invariant("background task panicked")));
            let (outcomes, finished) = &*state;
            let mut outcomes = outcomes.lock();
            if let Err(e) = outcome {
                match &outcomes.first {
                    None => outcomes.first = Some(e),
                    Some(_) => warn!("additional task failure: {}", e),
                }
            }
            outcomes.pending -= 1;
            if outcomes.pending == 0 {
                finished.notify_all();
            }
        });
    }

    /// Tasks queued or running.
    pub fn len(&self) -> usize {
        self.state.0.lock().pending
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Result<()> {
        let (outcomes, finished) = &*self.state;
        let mut outcomes = outcomes.lock();
        while outcomes.pending > 0 {
            finished.wait(&mut outcomes);
        }
        match outcomes.first.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn workers_bound_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = TaskSet::new("t", 2).unwrap();
        for _ in 0..8 {
            let (running, peak) = (running.clone(), peak.clone());
            tasks.spawn(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tasks.drain().unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drain_waits_for_all_and_returns_first_error() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = TaskSet::new("t", 2).unwrap();
        tasks.spawn(|| Err(Error::invariant("boom")));
        tasks.spawn(|| panic!("worker panic"));
        for _ in 0..4 {
            let done = done.clone();
            tasks.spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert!(matches!(tasks.drain(), Err(Error::Invariant(_))));
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert!(tasks.is_empty());
        tasks.drain().unwrap();
    }

    #[test]
    fn many_tasks_share_a_fixed_set_of_threads() {
        let tasks = TaskSet::new("pool", 3).unwrap();
        assert_eq!(tasks.workers(), 3);
        let threads = Arc::new(Mutex::new(HashSet::new()));
        for _ in 0..500 {
            let threads = threads.clone();
            tasks.spawn(move || {
                threads.lock().insert(std::thread::current().id());
                Ok(())
            });
        }
        tasks.drain().unwrap();
        let used = threads.lock().len();
        assert!((1..=3).contains(&used), "{} threads", used);
    }
}
