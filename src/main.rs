use clap::Parser;
use mirrorsync::config::{Args, Settings};
use mirrorsync::engine::SyncEngine;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut settings = Settings::resolve(args)?;
    let _guard = init_logging(&settings.log_file, settings.log_level)?;
    settings.load_ignore_patterns();

    if !settings.source.exists() {
        error!("source folder {:?} does not exist", settings.source);
        anyhow::bail!("source folder {:?} does not exist", settings.source);
    }

    info!("starting mirrorsync");
    info!("source: {:?}", settings.source);
    info!("replica: {:?}", settings.replica);
    info!("interval: {}s", settings.interval_secs);
    info!("log file: {:?}", settings.log_file);
    info!(
        "comparison: {}",
        if settings.use_content_hash {
            "content hash"
        } else {
            "size and mtime"
        }
    );
    info!(
        "hash cache: {}",
        if settings.use_hash_cache { "enabled" } else { "disabled" }
    );
    if settings.dry_run {
        info!("dry-run: no changes will be made");
    }
    if !settings.ignore_patterns.is_empty() {
        info!("ignore patterns: {}", settings.ignore_patterns.join(", "));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        })?;
    }

    let interval = Duration::from_secs(settings.interval_secs);
    let once = settings.once;
    let engine = SyncEngine::new(settings);

    while !cancel.load(Ordering::Relaxed) {
        match engine.run_once(&cancel) {
            Ok(report) => {
                if once {
                    if !report.failures.is_empty() {
                        anyhow::bail!(
                            "pass completed with {} failed operations",
                            report.failures.len()
                        );
                    }
                    return Ok(());
                }
            }
            Err(e) => {
                // a failed pass is retried at the next interval
                error!("pass failed: {}", e);
                if once {
                    anyhow::bail!("pass failed: {e}");
                }
            }
        }
        if sleep_interruptible(interval, &cancel) {
            break;
        }
    }

    info!("stop requested, exiting");
    Ok(())
}

/// Sleeps for `total`, waking every 200 ms to check the cancel flag.
/// Returns true when cancellation was requested.
fn sleep_interruptible(total: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(200)));
    }
}

/// Dual-sink logging: a console layer on stderr and an ANSI-free file layer
/// through a non-blocking appender. The file is rolled daily so a process
/// left running indefinitely never grows a single unbounded log. The
/// returned guard must stay alive so buffered log lines are flushed on exit.
fn init_logging(
    log_file: &Path,
    level: tracing::Level,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory)?;
    let file_name = log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "mirrorsync.log".into());

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}
