//! The shared job queue and the producer handle onto it.
//!
//! The queue is the only mutable state shared between the host, the
//! execution contexts and producers on other threads. It sits behind a
//! reentrant lock so a job running inside a context can push more work from
//! the same call chain. The lock only ever covers queue mutation; jobs are
//! moved out of the critical section before they run or are dropped.

use crate::config::QueueOrder;
use crate::job::Job;
use crate::metrics::PoolStats;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

struct QueueState {
    jobs: VecDeque<Job>,
    open: bool,
}

/// Pending jobs plus the open/closed flag, guarded by one reentrant lock.
pub struct JobQueue {
    state: ReentrantMutex<RefCell<QueueState>>,
    order: QueueOrder,
    stats: Arc<PoolStats>,
}

impl JobQueue {
    /// Creates a closed, empty queue.
    pub(crate) fn new(order: QueueOrder, stats: Arc<PoolStats>) -> Self {
        JobQueue {
            state: ReentrantMutex::new(RefCell::new(QueueState {
                jobs: VecDeque::new(),
                open: false,
            })),
            order,
            stats,
        }
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }

    /// Appends a job. Returns false and drops the job if the queue is closed.
    pub fn push(&self, job: Job) -> bool {
        let rejected = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if state.open {
                state.jobs.push_back(job);
                None
            } else {
                Some(job)
            }
        };

        match rejected {
            None => {
                PoolStats::bump(&self.stats.jobs_pushed, 1);
                true
            }
            Some(job) => {
                debug!("job pushed to a closed pool, discarding");
                PoolStats::bump(&self.stats.jobs_discarded, 1);
                drop(job);
                false
            }
        }
    }

    /// Removes the next job according to the configured order.
    pub(crate) fn pop(&self) -> Option<Job> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        match self.order {
            QueueOrder::Lifo => state.jobs.pop_back(),
            QueueOrder::Fifo => state.jobs.pop_front(),
        }
    }

    pub(crate) fn record_run(&self) {
        PoolStats::bump(&self.stats.jobs_run, 1);
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().jobs.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        let guard = self.state.lock();
        let open = guard.borrow().open;
        open
    }

    pub(crate) fn open(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().open = true;
    }

    /// Closes the queue and drops every pending job unrun.
    ///
    /// Returns the number of discarded jobs.
    pub(crate) fn close_and_drain(&self) -> usize {
        let drained = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.open = false;
            std::mem::take(&mut state.jobs)
        };

        // Captured state may itself push on drop; the borrow is released by now.
        let count = drained.len();
        drop(drained);
        PoolStats::bump(&self.stats.jobs_discarded, count as u64);
        count
    }
}

/// Cloneable handle for submitting jobs to a pool.
///
/// Unlike the pool itself this handle is `Send + Sync`, so it can be handed
/// to command call sites, timers and other threads.
#[derive(Clone)]
pub struct Submitter {
    queue: Arc<JobQueue>,
}

impl Submitter {
    pub(crate) fn new(queue: Arc<JobQueue>) -> Self {
        Submitter { queue }
    }

    /// Schedules `work` for a later tick. Nothing runs synchronously.
    ///
    /// Returns false if the pool was not accepting work and the job was dropped.
    pub fn push<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Job::new(work))
    }

    /// Schedules an already built job.
    pub fn push_job(&self, job: Job) -> bool {
        self.queue.push(job)
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether the pool is currently accepting work.
    pub fn is_accepting(&self) -> bool {
        self.queue.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn open_queue(order: QueueOrder) -> JobQueue {
        let queue = JobQueue::new(order, Arc::new(PoolStats::new()));
        queue.open();
        queue
    }

    fn tagged(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> Job {
        let log = log.clone();
        Job::new(move || log.lock().unwrap().push(tag))
    }

    #[test]
    fn test_lifo_pop_order() {
        let queue = open_queue(QueueOrder::Lifo);
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=3 {
            assert!(queue.push(tagged(&log, tag)));
        }

        while let Some(job) = queue.pop() {
            job.execute();
        }
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_fifo_pop_order() {
        let queue = open_queue(QueueOrder::Fifo);
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=3 {
            queue.push(tagged(&log, tag));
        }

        while let Some(job) = queue.pop() {
            job.execute();
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let stats = Arc::new(PoolStats::new());
        let queue = JobQueue::new(QueueOrder::Lifo, stats.clone());
        assert!(!queue.push(Job::new(|| {})));
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().jobs_discarded, 1);
    }

    #[test]
    fn test_drain_discards_without_running() {
        let queue = open_queue(QueueOrder::Lifo);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.push(tagged(&log, 1));
        queue.push(tagged(&log, 2));

        assert_eq!(queue.close_and_drain(), 2);
        assert!(queue.is_empty());
        assert!(!queue.is_open());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reentrant_push_while_locked() {
        let queue = Arc::new(open_queue(QueueOrder::Lifo));
        let guard = queue.state.lock();
        // Same thread re-acquires the lock instead of deadlocking.
        assert!(queue.push(Job::new(|| {})));
        drop(guard);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_submitter_from_other_threads() {
        let queue = Arc::new(open_queue(QueueOrder::Fifo));
        let submitter = Submitter::new(queue.clone());

        std::thread::scope(|s| {
            for _ in 0..4 {
                let submitter = submitter.clone();
                s.spawn(move || {
                    for _ in 0..25 {
                        submitter.push(|| {});
                    }
                });
            }
        });

        assert_eq!(submitter.pending(), 100);
    }
}
