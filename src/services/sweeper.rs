// services/sweeper.rs
use std::sync::Arc;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::SweepConfig;
use crate::services::payment_service::PaymentService;

/// Spawns the background reconciliation loop. Callbacks settle most
/// payments; the sweep catches the ones whose callback never arrived.
pub fn spawn(payments: Arc<PaymentService>, config: SweepConfig) {
    if config.interval_secs == 0 {
        info!("Reconciliation sweeper disabled (SWEEP_INTERVAL_SECS=0)");
        return;
    }

    info!(
        "Reconciliation sweeper running every {}s (pending after {}s, give up after {}s)",
        config.interval_secs, config.pending_after_secs, config.give_up_after_secs
    );

    tokio::spawn(async move {
        let mut ticker = interval(config.interval());
        // the first tick fires immediately; skip it so the initial sweep
        // runs a full interval after boot
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match payments
                .sweep_stale_pending(config.pending_after(), config.give_up_after())
                .await
            {
                Ok(summary) if summary.swept() == 0 => {
                    debug!("Reconciliation sweep found nothing stale");
                }
                Ok(summary) => info!(
                    "Reconciliation sweep: {} completed, {} failed, {} flagged, {} still pending",
                    summary.completed, summary.failed, summary.flagged, summary.still_pending
                ),
                Err(e) => error!("Reconciliation sweep failed: {}", e),
            }
        }
    });
}
