//! Line-item editing for open orders.

use std::sync::Arc;

use store::{
    AddOn, AddOnId, DrinkId, DrinkSizeId, Money, OrderId, SessionId, Store, StoreError,
};

use crate::action::QuantityDelta;
use crate::actor::{Actor, ActorRole};
use crate::error::DomainError;
use crate::notify::{MessageRef, RenderRequest};
use crate::render;
use crate::size_cache::SizeCache;
use crate::telemetry::observe;

use super::{Order, OrderError, Toggle, load_order};

/// Number of read-modify-write attempts before an edit gives up.
const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Whether a toggled add-on must belong to the ordered drink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddOnPolicy {
    /// Any existing add-on may be toggled.
    #[default]
    Permissive,
    /// Only add-ons actively linked to the drink may be toggled.
    Strict,
}

/// An order together with what is needed to render its card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderView {
    pub order: Order,
    /// Add-ons offered for the drink, selected or not.
    pub available_add_ons: Vec<AddOn>,
    /// What the last toggle did, if the view results from one.
    pub toggle: Option<Toggle>,
    /// Telegram file id of the drink's image.
    pub image: Option<String>,
}

impl OrderView {
    pub fn quantity(&self) -> u32 {
        self.order.quantity()
    }

    pub fn total_price(&self) -> Money {
        self.order.total_price()
    }

    /// Name and price of every selected add-on.
    pub fn add_on_prices(&self) -> Vec<(&str, Money)> {
        self.order
            .add_ons()
            .iter()
            .map(|a| (a.name.as_str(), a.price))
            .collect()
    }

    pub fn render(&self) -> RenderRequest {
        render::order_card(self)
    }
}

/// Applies quantity changes and add-on toggles to draft and created orders.
///
/// Every edit reads the order, mutates the aggregate, and writes the line
/// items back guarded by the version it read. A lost race re-reads and
/// retries, so concurrent edits of one order are serialized by the store and
/// none of them is lost.
pub struct LineItemEditor<S> {
    store: S,
    sizes: Arc<SizeCache>,
    policy: AddOnPolicy,
    max_attempts: usize,
}

impl<S: Store> LineItemEditor<S> {
    pub fn new(store: S, sizes: Arc<SizeCache>) -> Self {
        Self {
            store,
            sizes,
            policy: AddOnPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_policy(mut self, policy: AddOnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sizes(&self) -> &SizeCache {
        &self.sizes
    }

    /// Creates a draft order for one unit of a drink-size.
    ///
    /// Opens a new session when none is given.
    #[tracing::instrument(skip(self))]
    pub async fn start_order(
        &self,
        actor: Actor,
        drink_size_id: DrinkSizeId,
        session_id: Option<SessionId>,
    ) -> Result<OrderView, DomainError> {
        observe("start_order", actor, async {
            if !actor.is(ActorRole::Customer) {
                return Err(OrderError::Unauthorized {
                    action: "start an order",
                }
                .into());
            }

            let drink_size = self
                .store
                .get_drink_size(drink_size_id)
                .await?
                .ok_or_else(|| DomainError::not_found("drink_size", drink_size_id))?;

            let session_id = match session_id {
                Some(id) => id,
                None => self.store.open_session(actor.id).await?,
            };

            let new_order = Order::draft(actor.id, &drink_size, 1, Some(session_id))?;
            let record = self.store.insert_order(new_order).await?;
            tracing::info!(order_id = %record.id, %drink_size_id, "Draft order created");

            let order = Order::from_record(record, drink_size)?;
            self.view_of(order, None).await
        })
        .await
    }

    /// Creates a draft order for a drink in a size given by its label.
    ///
    /// A label that matches no size, or a size the drink is not sold in, is a
    /// catalog inconsistency: it is logged and nothing is created.
    #[tracing::instrument(skip(self))]
    pub async fn start_order_by_size_name(
        &self,
        actor: Actor,
        drink_id: DrinkId,
        size_label: &str,
        session_id: Option<SessionId>,
    ) -> Result<OrderView, DomainError> {
        let size_id = self
            .sizes
            .resolve(&self.store, size_label)
            .await?
            .ok_or_else(|| {
                tracing::error!(%drink_id, size_label, "Size label has no catalog row");
                DomainError::CatalogInconsistency(format!("unknown size {size_label:?}"))
            })?;

        let drink_size = self
            .store
            .find_drink_size(drink_id, size_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(%drink_id, %size_id, "Drink is not sold in this size");
                DomainError::CatalogInconsistency(format!(
                    "drink {drink_id} has no size {size_label:?}"
                ))
            })?;

        self.start_order(actor, drink_size.id, session_id).await
    }

    /// Steps the quantity up or down by one.
    ///
    /// Stepping below one leaves the order unchanged and still succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn change_quantity(
        &self,
        actor: Actor,
        order_id: OrderId,
        delta: QuantityDelta,
    ) -> Result<OrderView, DomainError> {
        observe("change_quantity", actor, async {
            let (order, _) = self
                .edit(actor, order_id, |order| {
                    let changed = order.change_quantity(delta);
                    (changed, None)
                })
                .await?;
            self.view_of(order, None).await
        })
        .await
    }

    /// Selects the add-on if it is not selected, deselects it otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_add_on(
        &self,
        actor: Actor,
        order_id: OrderId,
        add_on_id: AddOnId,
    ) -> Result<OrderView, DomainError> {
        observe("toggle_add_on", actor, async {
            let add_on = self
                .store
                .get_add_on(add_on_id)
                .await?
                .ok_or_else(|| DomainError::not_found("add_on", add_on_id))?;

            if self.policy == AddOnPolicy::Strict {
                let order = load_order(&self.store, order_id).await?;
                let allowed = self
                    .store
                    .drink_add_ons(order.drink_size().drink_id)
                    .await?;
                if !allowed.iter().any(|a| a.id == add_on_id) {
                    return Err(OrderError::AddOnNotAllowed { add_on_id }.into());
                }
            }

            let (order, toggle) = self
                .edit(actor, order_id, |order| {
                    let toggle = order.toggle_add_on(add_on.clone());
                    (true, Some(toggle))
                })
                .await?;
            self.view_of(order, toggle).await
        })
        .await
    }

    /// Loads an order owned by the actor for display.
    #[tracing::instrument(skip(self))]
    pub async fn view(&self, actor: Actor, order_id: OrderId) -> Result<OrderView, DomainError> {
        let order = load_order(&self.store, order_id).await?;
        order.ensure_owned_by(&actor)?;
        self.view_of(order, None).await
    }

    /// Remembers the message showing an order card so later renders edit it.
    pub async fn remember_card(
        &self,
        session_id: SessionId,
        message: MessageRef,
    ) -> Result<(), DomainError> {
        self.store
            .record_last_action(session_id, message.to_last_action("order_message"))
            .await?;
        Ok(())
    }

    /// Runs one read-mutate-write cycle, retrying when another edit won.
    ///
    /// `mutate` returns whether it changed the order; unchanged orders are not
    /// written.
    async fn edit<F>(
        &self,
        actor: Actor,
        order_id: OrderId,
        mut mutate: F,
    ) -> Result<(Order, Option<Toggle>), DomainError>
    where
        F: FnMut(&mut Order) -> (bool, Option<Toggle>),
    {
        for attempt in 1..=self.max_attempts {
            let mut order = load_order(&self.store, order_id).await?;
            order.ensure_owned_by(&actor)?;
            order.ensure_editable()?;

            let (changed, toggle) = mutate(&mut order);
            if !changed {
                return Ok((order, toggle));
            }

            match self
                .store
                .save_line_items(order_id, order.version(), order.line_items())
                .await
            {
                Ok(record) => {
                    let order = Order::from_record(record, order.drink_size().clone())?;
                    return Ok((order, toggle));
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    tracing::debug!(%order_id, attempt, "Line item edit lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(%order_id, attempts = self.max_attempts, "Line item edit gave up");
        Err(DomainError::Conflict { order_id })
    }

    async fn view_of(
        &self,
        order: Order,
        toggle: Option<Toggle>,
    ) -> Result<OrderView, DomainError> {
        let drink_id = order.drink_size().drink_id;
        let available_add_ons = self.store.drink_add_ons(drink_id).await?;
        let image = self
            .store
            .get_drink(drink_id)
            .await?
            .and_then(|d| d.image_file_id);
        Ok(OrderView {
            order,
            available_add_ons,
            toggle,
            image,
        })
    }
}
