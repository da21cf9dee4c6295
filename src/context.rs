//! Execution contexts and the entry loop they run.
//!
//! An execution context is a cooperative control-flow unit: the host switches
//! into it, it services at most one job from the shared queue, and it switches
//! back. Contexts are created once by the pool and parked between ticks.

use crate::config::ContextBackend;
use crate::job::Job;
use crate::queue::JobQueue;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

/// Lifecycle of a single context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// Parked, waiting to be resumed.
    Idle,
    /// Switched into, looking at the queue.
    Selected,
    /// Running a job body.
    Executing,
}

/// What a context reports when it hands control back to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextYield {
    /// One job ran to completion.
    Ran,
    /// The queue was empty; nothing ran.
    Empty,
}

/// A suspend/resume execution context.
///
/// `resume` is the switch-into operation; the context runs until its entry
/// loop yields and then returns. Destruction is `Drop`.
pub trait ExecutionContext {
    fn id(&self) -> usize;

    fn state(&self) -> ContextState;

    /// Switches into the context and returns once it yields.
    ///
    /// A panicking job is caught inside the context and handed back as
    /// `Err` with its payload. The context stays parked and usable.
    fn resume(&mut self) -> thread::Result<ContextYield>;
}

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Id of the pool context currently executing a job on this thread, if any.
pub fn current_context() -> Option<usize> {
    CURRENT_CONTEXT.get()
}

/// Marks a context as executing for the lifetime of the scope, including
/// when the job unwinds.
struct ExecutingScope<'a> {
    state: &'a Cell<ContextState>,
    previous: Option<usize>,
}

impl<'a> ExecutingScope<'a> {
    fn enter(id: usize, state: &'a Cell<ContextState>) -> Self {
        state.set(ContextState::Executing);
        let previous = CURRENT_CONTEXT.replace(Some(id));
        ExecutingScope { state, previous }
    }
}

impl Drop for ExecutingScope<'_> {
    fn drop(&mut self) {
        CURRENT_CONTEXT.set(self.previous);
        self.state.set(ContextState::Idle);
    }
}

/// One pass of the entry loop: take a job if there is one and run it.
///
/// The queue lock is released inside `pop`, before the job runs.
fn service_one(id: usize, queue: &JobQueue, state: &Cell<ContextState>) -> ContextYield {
    state.set(ContextState::Selected);
    let job: Option<Job> = queue.pop();

    match job {
        Some(job) => {
            let _scope = ExecutingScope::enter(id, state);
            job.execute();
            queue.record_run();
            ContextYield::Ran
        }
        None => {
            state.set(ContextState::Idle);
            ContextYield::Empty
        }
    }
}

/// Runs one pass of the entry loop, catching a job panic so the loop itself
/// never unwinds.
fn service_one_caught(
    id: usize,
    queue: &JobQueue,
    state: &Cell<ContextState>,
) -> thread::Result<ContextYield> {
    catch_unwind(AssertUnwindSafe(|| service_one(id, queue, state)))
}

/// Stackful context backed by a `corosensei` coroutine.
///
/// The coroutine body loops forever: service one job, suspend. It is only
/// left when the context is dropped, which unwinds the parked stack.
pub struct FiberContext {
    id: usize,
    state: Rc<Cell<ContextState>>,
    coroutine: Coroutine<(), thread::Result<ContextYield>, (), DefaultStack>,
}

impl FiberContext {
    pub fn new(id: usize, stack_size: usize, queue: Arc<JobQueue>) -> std::io::Result<Self> {
        let stack = DefaultStack::new(stack_size)?;
        let state = Rc::new(Cell::new(ContextState::Idle));
        let loop_state = state.clone();

        let coroutine: Coroutine<(), thread::Result<ContextYield>, (), DefaultStack> =
            Coroutine::with_stack(
                stack,
                move |yielder: &Yielder<(), thread::Result<ContextYield>>, _input: ()| loop {
                    let outcome = service_one_caught(id, &queue, &loop_state);
                    yielder.suspend(outcome);
                },
            );

        Ok(FiberContext {
            id,
            state,
            coroutine,
        })
    }
}

impl ExecutionContext for FiberContext {
    fn id(&self) -> usize {
        self.id
    }

    fn state(&self) -> ContextState {
        self.state.get()
    }

    fn resume(&mut self) -> thread::Result<ContextYield> {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(outcome) => outcome,
            // The entry loop never returns.
            CoroutineResult::Return(()) => Ok(ContextYield::Empty),
        }
    }
}

/// Trampoline context: runs one pass of the entry loop directly on the
/// caller's stack each time it is resumed.
pub struct InlineContext {
    id: usize,
    state: Cell<ContextState>,
    queue: Arc<JobQueue>,
}

impl InlineContext {
    pub fn new(id: usize, queue: Arc<JobQueue>) -> Self {
        InlineContext {
            id,
            state: Cell::new(ContextState::Idle),
            queue,
        }
    }
}

impl ExecutionContext for InlineContext {
    fn id(&self) -> usize {
        self.id
    }

    fn state(&self) -> ContextState {
        self.state.get()
    }

    fn resume(&mut self) -> thread::Result<ContextYield> {
        service_one_caught(self.id, &self.queue, &self.state)
    }
}

/// Builds a context of the requested kind.
pub fn create_context(
    id: usize,
    backend: ContextBackend,
    stack_size: usize,
    queue: Arc<JobQueue>,
) -> std::io::Result<Box<dyn ExecutionContext>> {
    match backend {
        ContextBackend::Fiber => Ok(Box::new(FiberContext::new(id, stack_size, queue)?)),
        ContextBackend::Inline => Ok(Box::new(InlineContext::new(id, queue))),
    }
}
