use std::sync::{Arc, Mutex};
use tickfiber::{ContextBackend, FiberPool, PoolConfig, QueueOrder, TickOutcome};

#[test]
fn test_pool_config_from_json_drives_init() {
    let config = PoolConfig::from_json_str(r#"{"context_count": 3, "order": "fifo"}"#).unwrap();
    let pool = FiberPool::with_config(config);

    assert_eq!(pool.context_count(), 3);
    assert_eq!(pool.config().order, QueueOrder::Fifo);
    assert!(pool.is_initialized());
}

#[test]
fn test_concrete_scenario() {
    let mut pool = FiberPool::new(PoolConfig::default());
    assert_eq!(pool.init(2), 2);

    let log = Arc::new(Mutex::new(Vec::new()));
    let a = log.clone();
    pool.push(move || a.lock().unwrap().push("A"));
    let b = log.clone();
    pool.push(move || b.lock().unwrap().push("B"));

    assert_eq!(pool.tick(), TickOutcome::Ran);
    assert_eq!(pool.tick(), TickOutcome::Ran);
    assert_eq!(pool.tick(), TickOutcome::Idle);
    assert_eq!(*log.lock().unwrap(), vec!["B", "A"]);

    pool.destroy();
    assert_eq!(pool.context_count(), 0);
    assert_eq!(pool.stats().contexts_created, 2);
    assert_eq!(pool.tick(), TickOutcome::Inactive);
}

#[test]
fn test_init_zero_never_runs() {
    let mut pool = FiberPool::new(PoolConfig::default());
    assert_eq!(pool.init(0), 0);

    let ran = Arc::new(Mutex::new(false));
    let ran_clone = ran.clone();
    pool.push(move || *ran_clone.lock().unwrap() = true);

    for _ in 0..10 {
        assert_eq!(pool.tick(), TickOutcome::NoContext);
    }
    assert!(!*ran.lock().unwrap());
    assert_eq!(pool.pending(), 1);

    pool.destroy();
    assert_eq!(pool.pending(), 0);
}

#[test]
fn test_context_states_idle_between_ticks() {
    for backend in [ContextBackend::Fiber, ContextBackend::Inline] {
        let mut pool = FiberPool::new(PoolConfig::default().with_backend(backend));
        pool.init(2);
        pool.push(|| {});
        pool.tick();

        assert!(
            pool.context_states()
                .iter()
                .all(|s| *s == tickfiber::ContextState::Idle)
        );
    }
}

#[test]
fn test_job_runs_inside_a_pool_context() {
    let mut pool = FiberPool::new(PoolConfig::default());
    pool.init(3);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let seen = seen.clone();
        pool.push(move || seen.lock().unwrap().push(tickfiber::current_context()));
    }
    for _ in 0..3 {
        pool.tick();
    }

    // Round-robin over the three contexts.
    assert_eq!(*seen.lock().unwrap(), vec![Some(0), Some(1), Some(2)]);
    assert_eq!(tickfiber::current_context(), None);
}

#[test]
fn test_large_stack_use_inside_fiber() {
    let config = PoolConfig {
        stack_size: 1024 * 1024,
        ..PoolConfig::default()
    };
    let mut pool = FiberPool::new(config);
    pool.init(1);

    let result = Arc::new(Mutex::new(0u64));
    let result_clone = result.clone();
    pool.push(move || {
        let buf = [1u8; 256 * 1024];
        let sum: u64 = std::hint::black_box(&buf).iter().map(|b| *b as u64).sum();
        *result_clone.lock().unwrap() = sum;
    });
    pool.tick();

    assert_eq!(*result.lock().unwrap(), 256 * 1024);
}

#[test]
fn test_drop_without_destroy_discards() {
    let runs = Arc::new(Mutex::new(0));
    {
        let mut pool = FiberPool::new(PoolConfig::default());
        pool.init(2);
        let runs = runs.clone();
        pool.push(move || *runs.lock().unwrap() += 1);
    }
    assert_eq!(*runs.lock().unwrap(), 0);
    assert_eq!(Arc::strong_count(&runs), 1);
}
