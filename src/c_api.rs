//! C ABI for hosts that drive the pool from non-Rust code.
//!
//! The pool handle is an owned `Box<FiberPool>`; every `FiberPool_*` call
//! must be made on the thread that created it. Other threads push work
//! through a `FiberSubmitter_*` handle.

use crate::config::PoolConfig;
use crate::fiber_pool::{FiberPool, TickOutcome};
use crate::queue::Submitter;
use std::ffi::c_void;

/// Callback invoked by a pool context. Receives the `data` pointer it was
/// pushed with.
pub type JobCallback = unsafe extern "C" fn(data: *mut c_void);

struct SendPtr(*mut c_void);

// The host guarantees the pointed-to data may be used from the pool thread.
unsafe impl Send for SendPtr {}

/// Creates and initializes a pool with `num_contexts` contexts.
#[unsafe(no_mangle)]
pub extern "C" fn FiberPool_Create(num_contexts: usize) -> *mut FiberPool {
    let config = PoolConfig {
        context_count: num_contexts,
        ..PoolConfig::default()
    };
    Box::into_raw(Box::new(FiberPool::with_config(config)))
}

fn job_for(callback: JobCallback, data: *mut c_void) -> impl FnOnce() + Send + 'static {
    let data = SendPtr(data);
    move || {
        let data = data;
        // SAFETY: upheld by whoever pushed the callback.
        unsafe { callback(data.0) }
    }
}

/// Queues `callback(data)` for a later tick.
///
/// # Safety
/// `handle` must be null or a pointer returned by `FiberPool_Create` that has
/// not been destroyed, used on the thread that created it. To push from
/// another thread use `FiberPool_CreateSubmitter`. `data` must stay valid
/// until the callback runs or the pool is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberPool_Push(
    handle: *mut FiberPool,
    callback: JobCallback,
    data: *mut c_void,
) {
    let Some(pool) = (unsafe { handle.as_ref() }) else {
        return;
    };
    pool.push(job_for(callback, data));
}

/// Runs at most one queued job. Returns 1 if a job ran, 0 otherwise, and -1
/// for a null handle.
///
/// # Safety
/// `handle` must be null or a live pointer returned by `FiberPool_Create`,
/// used on the thread that created it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberPool_Tick(handle: *mut FiberPool) -> i32 {
    let Some(pool) = (unsafe { handle.as_mut() }) else {
        return -1;
    };
    match pool.tick() {
        TickOutcome::Ran => 1,
        _ => 0,
    }
}

/// Destroys the pool, discarding pending jobs.
///
/// # Safety
/// `handle` must be null or a pointer returned by `FiberPool_Create`. It must
/// not be used after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberPool_Destroy(handle: *mut FiberPool) {
    if handle.is_null() {
        return;
    }
    unsafe { drop(Box::from_raw(handle)) };
}

/// Returns a producer handle that may be moved to and used from any thread.
/// Returns null for a null pool handle.
///
/// # Safety
/// `handle` must be null or a live pointer returned by `FiberPool_Create`,
/// used on the thread that created it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberPool_CreateSubmitter(handle: *mut FiberPool) -> *mut Submitter {
    match unsafe { handle.as_ref() } {
        Some(pool) => Box::into_raw(Box::new(pool.submitter())),
        None => std::ptr::null_mut(),
    }
}

/// Queues `callback(data)` from any thread. Returns 1 if the job was
/// accepted, 0 if the pool has been destroyed, and -1 for a null handle.
///
/// # Safety
/// `submitter` must be null or a live pointer returned by
/// `FiberPool_CreateSubmitter`. `data` must stay valid until the callback
/// runs or the pool is destroyed, and must be usable from the pool thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberSubmitter_Push(
    submitter: *const Submitter,
    callback: JobCallback,
    data: *mut c_void,
) -> i32 {
    let Some(submitter) = (unsafe { submitter.as_ref() }) else {
        return -1;
    };
    i32::from(submitter.push(job_for(callback, data)))
}

/// Releases a submitter handle. It may outlive the pool.
///
/// # Safety
/// `submitter` must be null or a pointer returned by
/// `FiberPool_CreateSubmitter`. It must not be used after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn FiberSubmitter_Destroy(submitter: *mut Submitter) {
    if submitter.is_null() {
        return;
    }
    unsafe { drop(Box::from_raw(submitter)) };
}
