use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use sitespy_daemon::buffer::MessageBuffer;
use sitespy_daemon::dispatcher::{DispatchMode, NotificationDispatcher};
use sitespy_daemon::paths::AppPaths;
use sitespy_daemon::state::TokioScheduler;
use sitespy_daemon::synchronizer::ConfigSynchronizer;
use sitespy_daemon::telegram::TelegramBot;
use sitespy_daemon::{logging, settings};

#[tokio::main]
async fn main() {
    // ── App data directory ────────────────────────────────────────────────────
    let paths = AppPaths::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to resolve application directory: {e}");
        std::process::exit(1);
    });
    if let Err(e) = paths.create_dirs() {
        eprintln!("Failed to create app data directory {}: {e}", paths.app_dir.display());
        std::process::exit(1);
    }

    // ── Settings + logging ────────────────────────────────────────────────────
    let settings_result = settings::load_or_default(&paths.settings_file);
    let daemon_settings = settings_result.as_ref().cloned().unwrap_or_default();
    logging::init(&daemon_settings.log_filter);
    if let Err(e) = &settings_result {
        warn!("Using default settings: {e:#}");
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let synchronizer =
        match ConfigSynchronizer::init(&paths.config_file, Arc::new(TokioScheduler::current())).await {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot load configuration: {e}");
                eprintln!("Failed to load config file {}: {e}", paths.config_file.display());
                std::process::exit(1);
            }
        };
    let state = Arc::clone(synchronizer.state());

    // ── Notification pipeline ─────────────────────────────────────────────────
    let bot = match TelegramBot::from_settings(&daemon_settings) {
        Ok(bot) => Arc::new(bot),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };
    let buffer = Arc::new(MessageBuffer::new(daemon_settings.effective_buffer_capacity()));
    let mode = if daemon_settings.background_dispatch {
        DispatchMode::Background
    } else {
        DispatchMode::AwaitCompletion
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(
        NotificationDispatcher::new(Arc::clone(&buffer), Arc::clone(&state), bot)
            .with_mode(mode)
            .run(stop_rx),
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        app_dir = %paths.app_dir.display(),
        "sitespy-daemon started"
    );

    // ── Run until Ctrl+C ──────────────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");

    let _ = stop_tx.send(true);
    if let Err(e) = dispatcher.await {
        error!("Dispatcher task failed: {e}");
    }
    if !buffer.is_empty() {
        warn!(pending = buffer.len(), "Discarding undelivered messages");
    }

    if let Err(e) = synchronizer.shutdown().await {
        error!("Failed to write config on shutdown: {e}");
        std::process::exit(1);
    }
}
