//! Background jobs: the expiry sweep and the database health check.

use std::sync::Arc;
use std::time::Duration;

use domain::{Notifier, SweepReport, Sweeper};
use store::Store;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};

/// When the jobs run.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub sweep_interval: Duration,
    pub sweep_delay: Duration,
    pub health_interval: Duration,
    pub health_delay: Duration,
}

impl Schedule {
    /// Periods from configuration with the usual start-up delays.
    pub fn new(sweep_interval: Duration, health_interval: Duration) -> Self {
        Self {
            sweep_interval,
            sweep_delay: Duration::from_secs(10),
            health_interval,
            health_delay: Duration::from_secs(6),
        }
    }
}

/// Runs one expiry sweep, logging instead of failing.
pub async fn sweep_once<S: Store, N: Notifier>(sweeper: &Sweeper<S, N>) -> Option<SweepReport> {
    match sweeper.expire_stale(chrono::Utc::now()).await {
        Ok(report) => {
            metrics::gauge!("last_sweep_expired").set(report.expired as f64);
            Some(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Expiry sweep failed");
            None
        }
    }
}

/// Runs one health check and records the outcome.
pub async fn check_once<S: Store, N: Notifier>(sweeper: &Sweeper<S, N>) -> bool {
    let available = sweeper.health_check().await;
    metrics::gauge!("database_available").set(if available { 1.0 } else { 0.0 });
    available
}

/// Spawns both jobs. Abort the handles to stop them.
pub fn spawn<S, N>(sweeper: Arc<Sweeper<S, N>>, schedule: Schedule) -> Vec<JoinHandle<()>>
where
    S: Store + 'static,
    N: Notifier + 'static,
{
    tracing::info!(
        sweep_every = ?schedule.sweep_interval,
        health_every = ?schedule.health_interval,
        max_age_minutes = sweeper.max_age().num_minutes(),
        "Starting background jobs"
    );

    let sweep = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + schedule.sweep_delay;
            let mut ticker = interval_at(start, schedule.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_once(&sweeper).await;
            }
        })
    };

    let health = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + schedule.health_delay;
        let mut ticker = interval_at(start, schedule.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            check_once(&sweeper).await;
        }
    });

    vec![sweep, health]
}
