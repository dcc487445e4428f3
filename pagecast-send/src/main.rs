//! pagecast-send - Background daemon for scheduled publishing
//!
//! Arms a publish trigger for every scheduled post, drains fired triggers
//! into the orchestrator, and runs periodic maintenance (token refresh,
//! retention cleanup).

use clap::Parser;
use libpagecast::api::GraphClient;
use libpagecast::blob::DiskBlobStore;
use libpagecast::crypto::TokenCipher;
use libpagecast::trigger::TokioTriggerScheduler;
use libpagecast::{Config, CredentialManager, Database, Result, Scheduler};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pagecast-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
pagecast-send - Background daemon for scheduled publishing

DESCRIPTION:
    pagecast-send is a long-running daemon that publishes scheduled posts at
    the right time. On startup it re-arms a trigger for every post still in
    the queue, then waits for triggers to fire and hands each one to the
    publish pipeline (duplicate fires and early fires are safe no-ops).

    Posts handed to the remote service's native scheduler are left alone;
    everything else is published through the local trigger path with
    exponential-backoff retries on failure.

USAGE:
    # Run in foreground (logs to stderr)
    pagecast-send

    # Enable verbose logging
    pagecast-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current post)

CONFIGURATION:
    Configuration file: ~/.config/pagecast/config.toml
    Database location:  ~/.local/share/pagecast/pagecast.db

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Credential error
    3 - Invalid input
")]
struct Cli {
    /// Seconds between maintenance sweeps (token refresh, retention cleanup)
    #[arg(long, value_name = "SECONDS", default_value_t = 3600)]
    maintenance_interval: u64,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Process due posts once and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("pagecast-send failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let tz = config.tz()?;

    let db = Database::new(&config.database.path).await?;

    // The cipher loads eagerly so a missing key is minted exactly once at
    // startup, never lazily mid-request.
    let key_path = PathBuf::from(shell_expand(&config.credentials.key_path));
    let cipher = Arc::new(TokenCipher::load_or_generate(&key_path)?);

    let api = Arc::new(GraphClient::new(&config.remote)?);
    let credentials = Arc::new(CredentialManager::new(
        db.clone(),
        cipher,
        api.clone(),
        tz,
        config.scheduling.owner_user,
    ));
    let blobs = Arc::new(DiskBlobStore::new(
        shell_expand(&config.media.dir),
        &config.media.base_url,
    ));

    let (triggers, mut fired) = TokioTriggerScheduler::new();
    let triggers = Arc::new(triggers);

    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        credentials.clone(),
        api,
        triggers,
        blobs,
        tz,
        config.scheduling.use_remote_scheduling,
    ));

    info!("pagecast-send daemon starting");

    if cli.once {
        // Fire the publish pipeline once for everything still queued; posts
        // that are not due yet are no-ops.
        let pending = db.locally_scheduled_posts().await?;
        info!("Processing {} queued post(s) once", pending.len());
        for (post_id, _) in pending {
            let outcome = scheduler.publish(post_id).await;
            info!(post_id, ?outcome, "Processed post");
        }
        info!("pagecast-send: processed posts once, exiting");
        return Ok(());
    }

    let restored = scheduler.restore_triggers().await?;
    info!("Re-armed {} publish trigger(s)", restored);

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let mut maintenance = interval(Duration::from_secs(cli.maintenance_interval.max(60)));
    // The first tick completes immediately; skip it so maintenance runs on
    // the interval, not at boot.
    maintenance.tick().await;
    let mut shutdown_poll = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            fired_id = fired.recv() => {
                match fired_id {
                    Some(post_id) => {
                        let outcome = scheduler.publish(post_id).await;
                        info!(post_id, ?outcome, "Trigger processed");
                    }
                    None => break,
                }
            }
            _ = maintenance.tick() => {
                run_maintenance(&scheduler, &credentials, &config).await;
            }
            _ = shutdown_poll.tick() => {
                if shutdown.load(Ordering::Relaxed) {
                    info!("Shutdown requested, stopping daemon loop");
                    break;
                }
            }
        }
    }

    info!("pagecast-send daemon stopped");
    Ok(())
}

async fn run_maintenance(
    scheduler: &Scheduler,
    credentials: &CredentialManager,
    config: &Config,
) {
    match credentials.refresh_all_tokens().await {
        Ok(count) if count > 0 => info!("Refreshed {} page token(s)", count),
        Ok(_) => {}
        Err(e) => warn!("Token refresh sweep failed: {}", e),
    }

    match scheduler
        .cleanup_old_posts(config.scheduling.retention_days)
        .await
    {
        Ok(count) if count > 0 => info!("Retention cleanup removed {} post(s)", count),
        Ok(_) => {}
        Err(e) => warn!("Retention cleanup failed: {}", e),
    }
}

fn shell_expand(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libpagecast::PagecastError::Validation(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
