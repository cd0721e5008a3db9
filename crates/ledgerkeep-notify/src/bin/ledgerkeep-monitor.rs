//! Attaches to the machine's notification region and logs every commit
//! notification until interrupted.

use std::error::Error;

use ledgerkeep_notify::config::NotificationConfig;
use ledgerkeep_notify::listener::{Notification, NotificationListener};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = NotificationConfig::from_env()?;
    tracing::info!(
        region_path = %config.region_path.display(),
        poll_interval = ?config.poll_interval,
        "Starting ledgerkeep notification monitor"
    );

    let listener = NotificationListener::start(config)?;
    let mut notifications = listener.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = notifications.recv() => match received {
                Ok(Notification::EventCommitted { sequence_number }) => {
                    tracing::info!(sequence_number, "event committed");
                }
                Ok(Notification::BatchPrepared { batch_id }) => {
                    tracing::debug!(batch_id, "batch prepared");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "monitor fell behind, notifications skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down ledgerkeep notification monitor");
    tokio::task::spawn_blocking(move || listener.shutdown()).await?;
    Ok(())
}
