//! Status transitions: who may move an order where, and who hears about it.

use store::{ManagerGuard, OrderId, OrderStatus, Role, StatusChange, Store, User};

use crate::action::WaitEstimate;
use crate::actor::{Actor, ActorRole};
use crate::error::DomainError;
use crate::notify::{ChatId, MessageRef, Notifier, RenderRequest};
use crate::render;
use crate::telemetry::observe;

use super::{Order, OrderError, load_order};

/// Longest decline reason kept, in characters.
pub const MAX_REASON_CHARS: usize = 255;

/// Reason stored when the decliner gives none.
const NO_REASON: &str = "Причина не указана";

/// Prepares a free-text decline reason for storage.
///
/// Control characters are dropped and the result is cut to
/// [`MAX_REASON_CHARS`] characters. Blank input yields a placeholder. The
/// reason is stored as typed; HTML escaping happens when it is rendered.
pub fn sanitize_reason(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return NO_REASON.to_string();
    }
    cleaned.chars().take(MAX_REASON_CHARS).collect()
}

/// Session event names stored with message pointers.
mod events {
    pub const MANAGER_CARD: &str = "manager_order_card";
    pub const MANAGER_PROCESSING: &str = "manager_order_processing";
    pub const MANAGER_READY: &str = "manager_order_ready";
}

/// Decides and applies status transitions.
///
/// Every transition is checked against the order's current status and the
/// actor, then written as one conditional update on the expected status. Of
/// two concurrent attempts at most one succeeds; the other gets
/// [`DomainError::Conflict`]. Notifications go out after the write and their
/// failures are only logged.
pub struct StatusAuthority<S, N> {
    store: S,
    notifier: N,
    manager_chat: ChatId,
}

impl<S: Store, N: Notifier> StatusAuthority<S, N> {
    pub fn new(store: S, notifier: N, manager_chat: ChatId) -> Self {
        Self {
            store,
            notifier,
            manager_chat,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn manager_chat(&self) -> ChatId {
        self.manager_chat
    }

    /// Loads an active order.
    pub async fn order(&self, order_id: OrderId) -> Result<Order, DomainError> {
        load_order(&self.store, order_id).await
    }

    /// Moves a draft to `created` once the customer asks to pay.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, actor: Actor, order_id: OrderId) -> Result<Order, DomainError> {
        observe("checkout", actor, async {
            let order = self.order(order_id).await?;
            order.ensure_owned_by(&actor)?;
            require(order.status().can_check_out(), &order, "check out")?;
            order.ensure_priced()?;

            self.apply(&order, StatusChange::new(OrderStatus::Draft, OrderStatus::Created))
                .await
        })
        .await
    }

    /// Records a confirmed payment and puts the order in front of managers.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        actor: Actor,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        observe("confirm_payment", actor, async {
            match actor.role {
                ActorRole::Payment => {}
                ActorRole::Manager => {
                    self.require_manager(&actor, "confirm payment").await?;
                }
                _ => {
                    return Err(OrderError::Unauthorized {
                        action: "confirm payment",
                    }
                    .into());
                }
            }
            let order = self.order(order_id).await?;
            require(order.status().can_confirm_payment(), &order, "confirm payment")?;

            let order = self
                .apply(&order, StatusChange::new(OrderStatus::Created, OrderStatus::Paid))
                .await?;

            let customer = self.customer(&order).await;
            let card = render::manager_order_card(&order, customer.as_ref());
            if let Some(sent) = self.deliver(self.manager_chat, card).await {
                self.remember(&order, sent, events::MANAGER_CARD).await;
            }
            Ok(order)
        })
        .await
    }

    /// A manager takes a paid order and promises a wait time.
    #[tracing::instrument(skip(self))]
    pub async fn claim(
        &self,
        actor: Actor,
        order_id: OrderId,
        wait: WaitEstimate,
    ) -> Result<Order, DomainError> {
        observe("claim", actor, async {
            let manager = self.require_manager(&actor, "take an order").await?;
            let order = self.order(order_id).await?;
            require(order.status().can_claim(), &order, "take")?;
            if order.manager_id().is_some() {
                return Err(OrderError::AlreadyClaimed { order_id }.into());
            }

            let comment = wait.comment();
            let change = StatusChange::new(OrderStatus::Paid, OrderStatus::Processing)
                .guard(ManagerGuard::Unclaimed)
                .assign_manager(actor.id)
                .manager_comment(comment.clone());
            let order = self.apply(&order, change).await?;

            self.deliver(
                ChatId::from(order.customer_id()),
                RenderRequest::text(format!("⏳ {comment}")),
            )
            .await;

            let customer = self.customer(&order).await;
            let card = render::processing_card(&order, customer.as_ref(), &manager);
            self.replace_manager_card(&order, card, events::MANAGER_PROCESSING)
                .await;
            Ok(order)
        })
        .await
    }

    /// The claiming manager marks the order ready for pickup.
    #[tracing::instrument(skip(self))]
    pub async fn mark_ready(&self, actor: Actor, order_id: OrderId) -> Result<Order, DomainError> {
        observe("mark_ready", actor, async {
            self.require_manager(&actor, "mark an order ready").await?;
            let order = self.order(order_id).await?;
            require(order.status().can_mark_ready(), &order, "mark ready")?;
            if order.manager_id() != Some(actor.id) {
                return Err(OrderError::NotClaimedBy { order_id }.into());
            }

            let change = StatusChange::new(OrderStatus::Processing, OrderStatus::Ready)
                .guard(ManagerGuard::ClaimedBy(actor.id));
            let order = self.apply(&order, change).await?;

            self.deliver(
                ChatId::from(order.customer_id()),
                render::ready_notice(&order),
            )
            .await;
            self.replace_manager_card(&order, render::ready_card(&order), events::MANAGER_READY)
                .await;
            Ok(order)
        })
        .await
    }

    /// The customer confirms pickup.
    ///
    /// `origin` is the customer's message carrying the pickup control; it is
    /// edited to drop the control.
    #[tracing::instrument(skip(self))]
    pub async fn mark_received(
        &self,
        actor: Actor,
        order_id: OrderId,
        origin: Option<MessageRef>,
    ) -> Result<Order, DomainError> {
        observe("mark_received", actor, async {
            let order = self.order(order_id).await?;
            order.ensure_owned_by(&actor)?;
            require(order.status().can_mark_received(), &order, "mark received")?;

            let order = self
                .apply(&order, StatusChange::new(OrderStatus::Ready, OrderStatus::Received))
                .await?;

            if let Some(origin) = origin {
                self.edit(origin, RenderRequest::text("🙏 Спасибо! Заказ получен."))
                    .await;
            }
            if let Some(card) = self.manager_card(&order).await {
                self.edit(card, render::received_card(&order)).await;
            }
            Ok(order)
        })
        .await
    }

    /// Declines an order on behalf of its customer or a manager.
    ///
    /// `expected` is the status the decliner saw; the order must still be in
    /// it. The counter-party is told the reason.
    #[tracing::instrument(skip(self, reason))]
    pub async fn decline(
        &self,
        actor: Actor,
        order_id: OrderId,
        expected: OrderStatus,
        reason: &str,
    ) -> Result<Order, DomainError> {
        observe("decline", actor, async {
            let order = self.order(order_id).await?;
            match actor.role {
                ActorRole::Customer => order.ensure_owned_by(&actor)?,
                ActorRole::Manager => {
                    self.require_manager(&actor, "decline an order").await?;
                }
                _ => {
                    return Err(OrderError::Unauthorized {
                        action: "decline an order",
                    }
                    .into());
                }
            }
            require(order.status().can_decline(), &order, "decline")?;
            if order.status() != expected {
                return Err(DomainError::Conflict { order_id });
            }

            let reason = sanitize_reason(reason);
            let change =
                StatusChange::new(expected, OrderStatus::Declined).decline_reason(reason.clone());
            let order = self.apply(&order, change).await?;

            let (chat, notice) = match actor.role {
                ActorRole::Customer => (
                    self.manager_chat,
                    render::declined_by_customer(&order, &reason),
                ),
                _ => (
                    ChatId::from(order.customer_id()),
                    render::declined_by_manager(&order, &reason),
                ),
            };
            self.deliver(chat, notice).await;
            Ok(order)
        })
        .await
    }

    /// Expires a stale unconfirmed order.
    ///
    /// Returns false if the order moved on in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, actor: Actor, order_id: OrderId) -> Result<bool, DomainError> {
        if !actor.is(ActorRole::Scheduler) {
            return Err(OrderError::Unauthorized {
                action: "expire an order",
            }
            .into());
        }
        let order = self.order(order_id).await?;
        if !order.status().can_expire() {
            return Ok(false);
        }

        let change = StatusChange::new(order.status(), OrderStatus::Expired);
        let from = order.status();
        if self.store.try_transition(order_id, change).await? {
            record_transition(order_id, from, OrderStatus::Expired);
            metrics::counter!("orders_expired_total").increment(1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Advances an order one step from `status`, as a generic confirm control.
    ///
    /// Covers the steps that need no further input: payment, ready and
    /// pickup. Taking an order needs a wait estimate and goes through
    /// [`claim`](Self::claim).
    pub async fn confirm(
        &self,
        actor: Actor,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, DomainError> {
        match status {
            OrderStatus::Created => self.confirm_payment(actor, order_id).await,
            OrderStatus::Processing => self.mark_ready(actor, order_id).await,
            OrderStatus::Ready => self.mark_received(actor, order_id, None).await,
            current => Err(OrderError::InvalidStateTransition {
                current,
                action: "confirm",
            }
            .into()),
        }
    }

    async fn require_manager(
        &self,
        actor: &Actor,
        action: &'static str,
    ) -> Result<User, DomainError> {
        if !actor.is(ActorRole::Manager) {
            return Err(OrderError::Unauthorized { action }.into());
        }
        let user = self
            .store
            .get_user(actor.id)
            .await?
            .ok_or_else(|| DomainError::not_found("manager", actor.id))?;
        if user.role != Role::Manager {
            return Err(OrderError::Unauthorized { action }.into());
        }
        Ok(user)
    }

    /// The order's customer, for display only. Lookup failures are logged.
    async fn customer(&self, order: &Order) -> Option<User> {
        match self.store.get_user(order.customer_id()).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(order_id = %order.id(), error = %e, "Could not load customer");
                None
            }
        }
    }

    /// Writes the transition and reloads the order.
    async fn apply(&self, order: &Order, change: StatusChange) -> Result<Order, DomainError> {
        let (from, to) = (change.from, change.to);
        if !self.store.try_transition(order.id(), change).await? {
            tracing::info!(
                order_id = %order.id(),
                %from,
                %to,
                "Transition lost to a concurrent change"
            );
            return Err(DomainError::Conflict {
                order_id: order.id(),
            });
        }
        record_transition(order.id(), from, to);
        self.order(order.id()).await
    }

    /// Sends a message, logging failures.
    async fn deliver(&self, chat: ChatId, message: RenderRequest) -> Option<MessageRef> {
        match self.notifier.send(chat, message).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                tracing::warn!(%chat, error = %e, "Notification failed");
                metrics::counter!("notification_failures_total", "kind" => "send").increment(1);
                None
            }
        }
    }

    /// Edits a message, logging failures.
    async fn edit(&self, target: MessageRef, message: RenderRequest) -> bool {
        match self.notifier.edit(target, message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    chat = %target.chat,
                    message_id = target.message_id,
                    error = %e,
                    "Message edit failed"
                );
                metrics::counter!("notification_failures_total", "kind" => "edit").increment(1);
                false
            }
        }
    }

    /// The manager-facing message last recorded for the order's session.
    async fn manager_card(&self, order: &Order) -> Option<MessageRef> {
        let session_id = order.session_id()?;
        match self.store.get_session(session_id).await {
            Ok(session) => session
                .and_then(|s| s.last_action)
                .filter(|a| a.chat_id == self.manager_chat.0)
                .map(|a| MessageRef::from(&a)),
            Err(e) => {
                tracing::warn!(order_id = %order.id(), error = %e, "Could not read session");
                None
            }
        }
    }

    /// Edits the manager card in place, or sends a new one if there is none.
    async fn replace_manager_card(&self, order: &Order, card: RenderRequest, event: &str) {
        let mut target = None;
        if let Some(existing) = self.manager_card(order).await {
            if self.edit(existing, card.clone()).await {
                target = Some(existing);
            }
        }
        if target.is_none() {
            target = self.deliver(self.manager_chat, card).await;
        }
        if let Some(message) = target {
            self.remember(order, message, event).await;
        }
    }

    async fn remember(&self, order: &Order, message: MessageRef, event: &str) {
        let Some(session_id) = order.session_id() else {
            return;
        };
        if let Err(e) = self
            .store
            .record_last_action(session_id, message.to_last_action(event))
            .await
        {
            tracing::warn!(order_id = %order.id(), error = %e, "Could not record message pointer");
        }
    }
}

fn require(allowed: bool, order: &Order, action: &'static str) -> Result<(), OrderError> {
    if allowed {
        Ok(())
    } else {
        Err(OrderError::InvalidStateTransition {
            current: order.status(),
            action,
        })
    }
}

fn record_transition(order_id: OrderId, from: OrderStatus, to: OrderStatus) {
    tracing::info!(%order_id, %from, %to, "Order status changed");
    metrics::counter!("order_transitions_total", "from" => from.as_str(), "to" => to.as_str())
        .increment(1);
}
