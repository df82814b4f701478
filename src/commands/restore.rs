//! Run the restore pipeline against a repository

use std::sync::Arc;

use berthd::offline::{LocalImageService, LoggingOps, OfflineNetwork, OfflineRuntime, ReadOnlyStore};
use berthd::persist::{FileStore, Store};
use berthd::{Daemon, DaemonConfig, RestoreReport, Services};

pub async fn restore(
    config: DaemonConfig,
    dry_run: bool,
    shutdown: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let files = FileStore::new(config.repository());
    let store: Arc<dyn Store> = if dry_run {
        Arc::new(ReadOnlyStore::new(files))
    } else {
        Arc::new(files)
    };

    let services = Services::new(
        store,
        Arc::new(OfflineRuntime),
        Arc::new(LocalImageService::new(&config)),
        Arc::new(OfflineNetwork),
        Arc::new(LoggingOps),
    );
    let daemon = Daemon::new(config, services);

    let report = daemon.restore().await?;

    print!("{}", render_report(&report, dry_run));

    if shutdown {
        match daemon.shutdown_timeout().await {
            Some(t) => println!("\nShutting down (timeout {}s)", t.as_secs()),
            None => println!("\nShutting down (no timeout)"),
        }
        daemon.shutdown().await;
    }

    Ok(())
}

/// Offline operations only log, so the sets are what a real daemon would act on
fn render_report(report: &RestoreReport, dry_run: bool) -> String {
    let mut out = format!("Registered {} containers\n", report.registered.len());
    if dry_run {
        out.push_str("Dry run, no checkpoints written\n");
    }
    out.push_str("\nWould restart:\n");
    for id in &report.restarted {
        out.push_str(&format!("  {}\n", id));
    }
    out.push_str("\nWould remove:\n");
    for id in &report.removed {
        out.push_str(&format!("  {}\n", id));
    }
    out
}
