//! Cronwatch host
//!
//! Run with: CRONWATCH_COMMAND="backup.sh" cargo run
//!
//! See `cronwatch::config` for the full list of environment variables.
//! RUST_LOG sets the log level (default: info).

use cronwatch::{CommandJob, Scheduler, WatchConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchConfig::load()?;
    let command = config
        .command
        .clone()
        .ok_or("no job configured, set CRONWATCH_COMMAND")?;

    tracing::info!("Cronwatch configuration:");
    tracing::info!("  Command: {}", command);
    if config.schedule.is_run_once() {
        tracing::info!("  Interval: run once");
    } else {
        tracing::info!("  Interval: {:?}", config.schedule.interval);
    }
    if let Some(lifetime) = config.schedule.lifetime {
        tracing::info!("  Lifetime: {:?}", lifetime);
    }
    if let Some(timeout) = config.schedule.job_timeout {
        tracing::info!("  Job timeout: {:?}", timeout);
    }
    match &config.sink.path {
        Some(path) => tracing::info!("  Alert file: {}", path.display()),
        None => tracing::info!("  Alert file: temporary"),
    }
    if let Some(mail) = &config.mail {
        tracing::info!("  Mail: {} via {}", mail.to.join(", "), mail.smtp);
    }
    if let Some(browser) = &config.browser {
        tracing::info!("  Browser notifications on {}", browser.addr);
    }

    let scheduler = Scheduler::new(
        config.schedule.clone(),
        CommandJob::new(command),
        config.coordinator(),
    );
    let sink = scheduler.sink();

    if let Err(e) = scheduler.run().await {
        tracing::error!(error = %e, "Stopping: failures can no longer be recorded");
        return Err(e.into());
    }

    if let Some(path) = sink.path() {
        tracing::info!("Alerts recorded in {}", path.display());
    }
    Ok(())
}
