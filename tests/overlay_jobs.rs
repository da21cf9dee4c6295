//! Overlay collaborators driven through the pool the way a host would use them.

use parking_lot::Mutex;
use std::sync::Arc;
use tickfiber::settings::ConfigStore;
use tickfiber::storage::{AppData, LogLevel};
use tickfiber::{CommandRegistry, FiberPool, ListCommand, PoolConfig, TickOutcome};

fn modes() -> Vec<(i32, String)> {
    vec![(0, "Off".to_string()), (1, "On".to_string())]
}

#[test]
fn test_save_config_as_a_job() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(
        ConfigStore::initialize(tmp.path().join("Configurations")).unwrap(),
    ));
    store.lock().add_component("menu");

    let mut pool = FiberPool::with_config(PoolConfig::default());
    let job_store = store.clone();
    pool.push(move || {
        job_store.lock().save("session.json").expect("save config");
    });

    assert!(!tmp.path().join("Configurations/session.json").exists());
    assert_eq!(pool.tick(), TickOutcome::Ran);
    assert!(tmp.path().join("Configurations/session.json").exists());
    assert_eq!(store.lock().current(), Some("session.json"));
}

#[test]
fn test_command_states_round_trip_through_config_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let app = AppData::new(tmp.path(), "overlay", 1 << 20);
    app.initialize().unwrap();

    let mut pool = FiberPool::with_config(PoolConfig::default());
    let mut registry = CommandRegistry::new(pool.submitter());
    let toggle = registry
        .register(ListCommand::new("god_mode", "God Mode", "", modes(), 0))
        .unwrap();

    registry.invoke("god_mode").unwrap();
    pool.tick();
    assert_eq!(toggle.lock().save_state(), serde_json::json!(1));

    let saved = registry.save_states().to_string();
    app.create_file("commands.json", &saved).unwrap();

    toggle.lock().load_state(&serde_json::json!(0));
    let restored: serde_json::Value =
        serde_json::from_str(&app.read_file("commands.json").unwrap()).unwrap();
    registry.load_states(&restored);
    assert_eq!(toggle.lock().save_state(), serde_json::json!(1));
}

#[test]
fn test_log_from_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let app = Arc::new(AppData::new(tmp.path(), "overlay", 1 << 20));
    app.initialize().unwrap();

    let mut pool = FiberPool::with_config(PoolConfig::default());
    for i in 0..3 {
        let app = app.clone();
        pool.push(move || {
            app.log(LogLevel::Info, &format!("job {i}")).expect("log");
        });
    }
    while pool.tick() == TickOutcome::Ran {}

    let text = std::fs::read_to_string(app.log_path()).unwrap();
    let messages: Vec<String> = text
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["message"].to_string())
        .collect();
    assert_eq!(messages, vec!["\"job 2\"", "\"job 1\"", "\"job 0\""]);
}

#[test]
fn test_upkeep_runs_as_a_job() {
    let tmp = tempfile::tempdir().unwrap();
    let app = Arc::new(AppData::new(tmp.path(), "overlay", 1 << 20));
    app.initialize().unwrap();
    std::fs::write(app.data_dir().join("log_20200101.txt"), "old").unwrap();
    app.create_file("notes.txt", "abc").unwrap();

    let mut pool = FiberPool::with_config(PoolConfig::default());
    let archived = Arc::new(Mutex::new(None));
    let (job_app, job_archived) = (app.clone(), archived.clone());
    pool.push(move || {
        job_app.scan_changes().expect("scan");
        job_app.backup_files().expect("backup");
        *job_archived.lock() = Some(job_app.compress_old_logs().expect("compress"));
    });

    assert!(archived.lock().is_none());
    assert_eq!(pool.tick(), TickOutcome::Ran);
    assert_eq!(*archived.lock(), Some(1));
    assert!(app.data_dir().join("log_20200101.zip").exists());
    assert!(app.backup_dir().join("notes.txt").exists());

    let report = app.export_monitoring_data("monitor.json").unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(report["monitoring_statistics"]["files_created"], 1);
}
