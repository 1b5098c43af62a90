//! Background sweep of idle sessions
//!
//! Lazy timeout on read stays mandatory; the sweeper only makes sure that a
//! user who never comes back still gets their session archived.

use crate::session::SessionManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Default sweep interval (5 minutes)
pub const SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Starts the sweeper.
///
/// Returns a JoinHandle for graceful shutdown coordination and a shutdown sender
pub fn start_sweeper_task(
    manager: Arc<SessionManager>,
    interval_secs: u64,
) -> (JoinHandle<()>, mpsc::Sender<()>) {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match manager.sweep_idle().await {
                        Ok(0) => debug!("Idle sweep found nothing to close"),
                        Ok(closed) => info!(closed, "Idle sweep closed sessions"),
                        Err(e) => error!(error = %e, "Idle sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Sweeper task received shutdown signal, completing...");
                    break;
                }
            }
        }
    });

    (handle, shutdown_tx)
}
