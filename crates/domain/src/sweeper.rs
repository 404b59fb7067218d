//! Periodic maintenance: expiring stale orders and checking the database.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use store::{OrderStatus, Store};

use crate::actor::Actor;
use crate::error::DomainError;
use crate::notify::{ChatId, Notifier};
use crate::order::StatusAuthority;
use crate::render;

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders older than the threshold still unfulfilled.
    pub candidates: usize,
    /// Orders moved to `expired`.
    pub expired: usize,
    /// Orders that changed status before they could be expired.
    pub skipped: usize,
}

/// Runs the scheduled jobs against the store through the status authority.
pub struct Sweeper<S, N> {
    authority: Arc<StatusAuthority<S, N>>,
    max_age: Duration,
    monitor_chat: Option<ChatId>,
}

impl<S: Store, N: Notifier> Sweeper<S, N> {
    pub fn new(authority: Arc<StatusAuthority<S, N>>, max_age: Duration) -> Self {
        Self {
            authority,
            max_age,
            monitor_chat: None,
        }
    }

    /// Sends health reports to this chat.
    pub fn with_monitor_chat(mut self, chat: Option<ChatId>) -> Self {
        self.monitor_chat = chat;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Expires every active `created` or `paid` order older than the
    /// configured age.
    ///
    /// Orders that move on between the query and the update are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<SweepReport, DomainError> {
        let cutoff = now - self.max_age;
        let stale = self
            .authority
            .store()
            .stale_orders(&[OrderStatus::Created, OrderStatus::Paid], cutoff)
            .await?;

        let mut report = SweepReport {
            candidates: stale.len(),
            ..SweepReport::default()
        };
        for record in stale {
            match self.authority.expire(Actor::scheduler(), record.id).await {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(DomainError::NotFound { .. }) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(order_id = %record.id, error = %e, "Could not expire order");
                    report.skipped += 1;
                }
            }
        }

        if report.candidates > 0 {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Pings the database and reports the result to the monitor chat.
    ///
    /// Returns whether the database answered.
    #[tracing::instrument(skip(self))]
    pub async fn health_check(&self) -> bool {
        let available = match self.authority.store().ping().await {
            Ok(()) => {
                tracing::info!("Database is available");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Database is unavailable");
                false
            }
        };

        if let Some(chat) = self.monitor_chat {
            if let Err(e) = self
                .authority
                .notifier()
                .send(chat, render::health_report(available))
                .await
            {
                tracing::error!(%chat, error = %e, "Could not deliver health report");
                metrics::counter!("notification_failures_total", "kind" => "health").increment(1);
            }
        }
        available
    }
}
