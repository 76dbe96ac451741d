use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::reservation_service::ReservationService;

/// Periodically cancels reservations whose pickup deadline has passed.
///
/// Runs until `shutdown` flips to `true` or its sender is dropped.
pub async fn run_expiry_worker(
    service: Arc<ReservationService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Starting reservation expiry worker");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.expire_reservations(Utc::now()).await {
                    Ok(summary) if summary.expired > 0 || summary.failed > 0 => {
                        info!(
                            expired = summary.expired,
                            skipped = summary.skipped,
                            failed = summary.failed,
                            "Expiry sweep finished"
                        );
                    }
                    Ok(_) => debug!("Expiry sweep found nothing to release"),
                    Err(e) => error!("Expiry sweep failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Reservation expiry worker stopped");
}
