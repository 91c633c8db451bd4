use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::service::{ForecastService, ForecastSink, PriceSource};

/// Run a forecast pass on every tick until `shutdown` flips to true or its
/// sender is dropped. The first pass runs immediately. Returns the number of
/// passes completed.
pub async fn run_scheduler<S, K>(
    service: &mut ForecastService<S, K>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    S: PriceSource,
    K: ForecastSink,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut passes = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = ticker.tick() => {
                service.run_pass(Utc::now());
                passes += 1;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(passes, "Forecast scheduler stopped");
    passes
}
