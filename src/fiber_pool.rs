//! The fiber pool: a fixed set of execution contexts draining one shared
//! job queue, one job per host tick.
//!
//! The host owns the pool and calls [`FiberPool::tick`] once per frame. Work
//! is submitted with [`FiberPool::push`] or through a [`Submitter`] handed to
//! producers. Nothing runs until a tick switches into a context.

use crate::config::PoolConfig;
use crate::context::{ContextState, ContextYield, ExecutionContext, create_context};
use crate::job::Job;
use crate::metrics::{PoolStats, StatsSnapshot};
use crate::profile;
use crate::queue::{JobQueue, Submitter};
use std::any::Any;
use std::panic::resume_unwind;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Result of a single [`FiberPool::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A context ran exactly one job.
    Ran,
    /// A context was switched into and found the queue empty.
    Idle,
    /// The pool has no live contexts, so nothing can run.
    NoContext,
    /// The pool has been destroyed.
    Inactive,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("job panicked in context {context}: {message}")]
    JobPanicked { context: usize, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Uninit,
    Running,
    Destroyed,
}

struct Panicked {
    context: usize,
    payload: Box<dyn Any + Send>,
}

/// Cooperative job scheduler driven by the host loop.
///
/// The pool is not `Send`: its contexts are bound to the thread that created
/// them. Use [`FiberPool::submitter`] to push work from elsewhere.
pub struct FiberPool {
    config: PoolConfig,
    queue: Arc<JobQueue>,
    stats: Arc<PoolStats>,
    contexts: Vec<Box<dyn ExecutionContext>>,
    next: usize,
    lifecycle: Lifecycle,
}

impl FiberPool {
    /// Creates an uninitialized pool. Call [`init`](Self::init) before use.
    pub fn new(config: PoolConfig) -> Self {
        let stats = Arc::new(PoolStats::new());
        let queue = Arc::new(JobQueue::new(config.order, stats.clone()));
        FiberPool {
            config,
            queue,
            stats,
            contexts: Vec::new(),
            next: 0,
            lifecycle: Lifecycle::Uninit,
        }
    }

    /// Creates a pool and initializes it with `config.context_count` contexts.
    pub fn with_config(config: PoolConfig) -> Self {
        let count = config.context_count;
        let mut pool = FiberPool::new(config);
        pool.init(count);
        pool
    }

    /// Creates `count` execution contexts and opens the queue.
    ///
    /// Contexts that fail to be created are skipped; the returned value is
    /// the number actually created.
    ///
    /// # Panics
    ///
    /// If the pool is already initialized or the queue is not empty.
    pub fn init(&mut self, count: usize) -> usize {
        let backend = self.config.backend;
        let stack_size = self.config.stack_size;
        let queue = self.queue.clone();
        self.init_with(count, move |id| {
            create_context(id, backend, stack_size, queue.clone())
        })
    }

    fn init_with<F>(&mut self, count: usize, mut factory: F) -> usize
    where
        F: FnMut(usize) -> std::io::Result<Box<dyn ExecutionContext>>,
    {
        assert!(
            self.lifecycle != Lifecycle::Running,
            "FiberPool already initialized"
        );
        assert!(self.queue.is_empty(), "FiberPool queue not empty at init");

        self.contexts.reserve(count);
        for id in 0..count {
            match factory(id) {
                Ok(context) => self.contexts.push(context),
                Err(err) => {
                    PoolStats::bump(&self.stats.contexts_failed, 1);
                    warn!(context = id, error = %err, "failed to create execution context, skipping");
                }
            }
        }

        let created = self.contexts.len();
        PoolStats::bump(&self.stats.contexts_created, created as u64);
        if created < count {
            warn!(requested = count, created, "fiber pool running degraded");
        }

        self.next = 0;
        self.queue.open();
        self.lifecycle = Lifecycle::Running;
        debug!(created, order = ?self.config.order, backend = ?self.config.backend, "fiber pool initialized");
        created
    }

    /// Discards all pending jobs unrun and releases every context.
    ///
    /// Safe to call repeatedly, and before `init`.
    pub fn destroy(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }

        let discarded = self.queue.close_and_drain();
        let released = self.contexts.len();
        // Parked fibers are unwound and their stacks freed on drop.
        self.contexts.clear();
        self.lifecycle = Lifecycle::Destroyed;
        debug!(discarded, released, "fiber pool destroyed");
    }

    /// Schedules `work` for a later tick.
    ///
    /// # Panics
    ///
    /// If the pool was never initialized.
    pub fn push<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_job(Job::new(work));
    }

    /// Schedules an already built job.
    pub fn push_job(&self, job: Job) {
        assert!(
            self.lifecycle != Lifecycle::Uninit,
            "FiberPool::push called before init"
        );
        self.queue.push(job);
    }

    /// Switches into one context, letting it run at most one job.
    ///
    /// A panic raised by the job is caught inside its context, counted, and
    /// then re-raised out of this call. The context stays in the pool.
    ///
    /// # Panics
    ///
    /// If the pool was never initialized, or if the job panics.
    pub fn tick(&mut self) -> TickOutcome {
        match self.dispatch() {
            Ok(outcome) => outcome,
            Err(panicked) => resume_unwind(panicked.payload),
        }
    }

    /// Like [`tick`](Self::tick), but returns a job panic as an error.
    pub fn try_tick(&mut self) -> Result<TickOutcome, PoolError> {
        self.dispatch().map_err(|panicked| PoolError::JobPanicked {
            context: panicked.context,
            message: panic_message(panicked.payload.as_ref()),
        })
    }

    fn dispatch(&mut self) -> Result<TickOutcome, Panicked> {
        assert!(
            self.lifecycle != Lifecycle::Uninit,
            "FiberPool::tick called before init"
        );
        if self.lifecycle == Lifecycle::Destroyed {
            return Ok(TickOutcome::Inactive);
        }
        if self.contexts.is_empty() {
            return Ok(TickOutcome::NoContext);
        }

        let index = self.next % self.contexts.len();
        self.next = index.wrapping_add(1);
        let context = &mut self.contexts[index];
        let id = context.id();

        let result = {
            let _trace = profile::is_enabled().then(|| profile::TraceGuard::new("tick", id));
            context.resume()
        };

        match result {
            Ok(ContextYield::Ran) => Ok(TickOutcome::Ran),
            Ok(ContextYield::Empty) => {
                PoolStats::bump(&self.stats.idle_ticks, 1);
                Ok(TickOutcome::Idle)
            }
            Err(payload) => {
                PoolStats::bump(&self.stats.jobs_panicked, 1);
                error!(context = id, message = %panic_message(payload.as_ref()), "job panicked");
                Err(Panicked {
                    context: id,
                    payload,
                })
            }
        }
    }

    /// Returns a handle producers can use to push jobs.
    pub fn submitter(&self) -> Submitter {
        Submitter::new(self.queue.clone())
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of live execution contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Current state of each live context, in dispatch order.
    pub fn context_states(&self) -> Vec<ContextState> {
        self.contexts.iter().map(|c| c.state()).collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for FiberPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
