//! Structured start/end/error events at component boundaries.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use crate::actor::Actor;

/// Tracks one externally triggered action from start to outcome.
///
/// Emits `action started` on creation and exactly one of `action completed`
/// or `action failed` when finished, each tagged with the actor and action.
#[derive(Debug)]
pub struct ActionSpan {
    action: &'static str,
    actor: Actor,
    started: Instant,
}

impl ActionSpan {
    pub fn start(action: &'static str, actor: Actor) -> Self {
        tracing::info!(
            action,
            actor_id = %actor.id,
            role = %actor.role,
            "action started"
        );
        metrics::counter!("order_actions_total", "action" => action).increment(1);

        Self {
            action,
            actor,
            started: Instant::now(),
        }
    }

    pub fn complete(self) {
        let elapsed = self.started.elapsed();
        tracing::info!(
            action = self.action,
            actor_id = %self.actor.id,
            role = %self.actor.role,
            duration_ms = elapsed.as_millis() as u64,
            "action completed"
        );
        metrics::histogram!("order_action_duration_seconds", "action" => self.action)
            .record(elapsed.as_secs_f64());
    }

    pub fn fail(self, error: &dyn Display) {
        let elapsed = self.started.elapsed();
        tracing::warn!(
            action = self.action,
            actor_id = %self.actor.id,
            role = %self.actor.role,
            duration_ms = elapsed.as_millis() as u64,
            error = %error,
            "action failed"
        );
        metrics::counter!("order_action_failures_total", "action" => self.action).increment(1);
        metrics::histogram!("order_action_duration_seconds", "action" => self.action)
            .record(elapsed.as_secs_f64());
    }

    pub fn finish<T, E: Display>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.complete(),
            Err(e) => self.fail(e),
        }
    }
}

/// Runs `work` inside an [`ActionSpan`].
pub async fn observe<T, E, F>(action: &'static str, actor: Actor, work: F) -> Result<T, E>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    let span = ActionSpan::start(action, actor);
    let result = work.await;
    span.finish(&result);
    result
}
