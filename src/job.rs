//! Job definitions.
//!
//! Jobs are the units of work submitted to the fiber pool. A job captures
//! whatever state it needs and is consumed when it runs.

use std::fmt;

/// A unit of deferred work: no arguments, no result.
///
/// Ownership moves from the producer into the pool's queue on push. The job is
/// dropped after it runs, or dropped unrun if the pool is destroyed first.
pub struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Creates a new job with the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
        }
    }

    /// Runs the job, consuming it.
    pub fn execute(self) {
        (self.work)();
    }
}

impl<F> From<F> for Job
where
    F: FnOnce() + Send + 'static,
{
    fn from(work: F) -> Self {
        Job::new(work)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
