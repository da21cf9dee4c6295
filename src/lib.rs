//! # tickfiber - Cooperative Fiber Pool Driven by a Host Tick
//!
//! A small job scheduler for code that lives inside someone else's main loop
//! (an overlay injected into a game, a plugin inside a renderer). Work is
//! pushed as jobs; the host calls [`FiberPool::tick`] once per frame and
//! exactly one queued job runs inside a pooled execution context before
//! control comes back.
//!
//! ## Architecture
//!
//! - **Jobs**: zero-argument closures, owned by the queue once pushed
//! - **Job Queue**: one shared container behind a reentrant lock, so a running
//!   job can push more work
//! - **Execution Contexts**: stackful coroutines (or an inline trampoline) that
//!   each run a loop of "take one job, run it, yield"
//! - **Fiber Pool**: owns the contexts and the queue; `init`, `push`, `tick`,
//!   `destroy`
//!
//! Around the core sit the overlay's collaborators: persisted component
//! state ([`settings`]), app-data files and a rotating log ([`storage`]), and
//! commands invoked through the pool ([`command`]).
//!
//! ## Example
//!
//! ```
//! use tickfiber::{FiberPool, PoolConfig, TickOutcome};
//!
//! let mut pool = FiberPool::new(PoolConfig::default());
//! pool.init(2);
//!
//! pool.push(|| println!("first"));
//! pool.push(|| println!("second"));
//!
//! // Most recently pushed job runs first.
//! assert_eq!(pool.tick(), TickOutcome::Ran); // "second"
//! assert_eq!(pool.tick(), TickOutcome::Ran); // "first"
//! assert_eq!(pool.tick(), TickOutcome::Idle);
//!
//! pool.destroy();
//! ```

pub mod c_api;
pub mod command;
pub mod config;
pub mod context;
pub mod fiber_pool;
pub mod job;
pub mod metrics;
pub mod profile;
pub mod queue;
pub mod settings;
pub mod storage;

pub use command::{Command, CommandRegistry, ListCommand};
pub use config::{ContextBackend, PoolConfig, QueueOrder};
pub use context::{ContextState, ExecutionContext, current_context};
pub use fiber_pool::{FiberPool, PoolError, TickOutcome};
pub use job::Job;
pub use metrics::{PoolStats, StatsSnapshot};
pub use queue::Submitter;
