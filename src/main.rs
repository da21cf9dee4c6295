use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tickfiber::storage::{AppData, LogLevel};
use tickfiber::{
    CommandRegistry, FiberPool, ListCommand, PoolConfig, QueueOrder, TickOutcome, profile,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Simulates a host render loop driving a fiber pool.
#[derive(Parser, Debug)]
#[command(name = "tickfiber", version)]
struct Args {
    /// Number of execution contexts.
    #[arg(long, default_value_t = 4)]
    contexts: usize,

    /// Number of simulated frames.
    #[arg(long, default_value_t = 120)]
    frames: usize,

    /// Service jobs in submission order instead of most-recent-first.
    #[arg(long)]
    fifo: bool,

    /// Pool configuration file (JSON). Command-line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a Chrome trace of every tick to this path.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Keep app data (log, backups, monitoring report) under this directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::default(),
    };
    config.context_count = args.contexts;
    if args.fifo {
        config.order = QueueOrder::Fifo;
    }
    if args.trace.is_some() {
        profile::enable();
    }

    let pool = FiberPool::with_config(config);
    info!(contexts = pool.context_count(), order = ?pool.config().order, "fiber pool ready");
    let app = match &args.data_dir {
        Some(root) => {
            let app = AppData::new(root, "tickfiber", 1 << 20);
            app.initialize()?;
            Some(Arc::new(app))
        }
        None => None,
    };
    run_frames(pool, args.frames, app.clone())?;

    if let Some(app) = &app {
        let report = app.export_monitoring_data("monitoring.json")?;
        info!(path = %report.display(), "monitoring data written");
    }

    if let Some(path) = &args.trace {
        profile::export_to_file(path)?;
        info!(path = %path.display(), events = profile::collected_events(), "trace written");
    }
    Ok(())
}

/// Periodic app-data maintenance, run as a pool job.
fn upkeep(app: &AppData) {
    match app.scan_changes() {
        Ok(changed) => {
            for path in changed {
                info!(path = %path.display(), "data file changed");
            }
        }
        Err(err) => warn!(error = %err, "change scan failed"),
    }
    if let Err(err) = app.backup_files() {
        warn!(error = %err, "backup failed");
    }
    if let Err(err) = app.compress_old_logs() {
        warn!(error = %err, "log compression failed");
    }
}

fn run_frames(
    mut pool: FiberPool,
    frames: usize,
    app: Option<Arc<AppData>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = CommandRegistry::new(pool.submitter());
    let speed = registry.register(
        ListCommand::new(
            "speed",
            "Speed",
            "Cycles the movement speed preset",
            vec![
                (0, "Off".to_string()),
                (1, "Slow".to_string()),
                (2, "Fast".to_string()),
            ],
            0,
        )
        .on_change(|value| info!(value, "speed changed")),
    )?;

    let completed = Arc::new(AtomicUsize::new(0));
    let frame_budget = Duration::from_millis(16);
    let start = Instant::now();

    for frame in 0..frames {
        let frame_start = Instant::now();

        // Producers: a script job every few frames, a command every 30.
        if frame % 5 == 0 {
            let completed = completed.clone();
            pool.push(move || {
                let sum: u64 = (0..10_000u64).sum();
                std::hint::black_box(sum);
                completed.fetch_add(1, Ordering::Relaxed);
            });
        }
        if frame % 30 == 0 {
            registry.invoke("speed")?;
        }
        if let Some(app) = app.as_ref().filter(|_| frame % 60 == 0) {
            let app = app.clone();
            pool.push(move || {
                if let Err(err) = app.log(LogLevel::Info, &format!("frame {frame}")) {
                    warn!(error = %err, "app log write failed");
                }
                upkeep(&app);
            });
        }

        if let Err(err) = pool.try_tick() {
            tracing::error!(frame, error = %err, "tick failed");
        }

        // Idle out the rest of the frame like a vsync'd renderer would.
        if let Some(rest) = frame_budget.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest.min(Duration::from_millis(1)));
        }
    }

    // Drain whatever is still queued.
    while pool.pending() > 0 {
        if pool.try_tick()? == TickOutcome::NoContext {
            break;
        }
    }

    let stats = pool.stats();
    info!(
        frames,
        jobs_run = stats.jobs_run,
        idle_ticks = stats.idle_ticks,
        script_jobs = completed.load(Ordering::Relaxed),
        speed = speed.lock().save_state().as_i64().unwrap_or_default(),
        elapsed = ?start.elapsed(),
        "frame loop finished"
    );

    pool.destroy();
    Ok(())
}
