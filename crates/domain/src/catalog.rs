//! Menu browsing and drink card publishing.

use store::{Drink, DrinkId, DrinkSize, DrinkType, DrinkTypeId, Role, Store};

use crate::actor::{Actor, ActorRole};
use crate::error::DomainError;
use crate::notify::RenderRequest;
use crate::order::OrderError;
use crate::render;
use crate::telemetry::observe;

/// Read access to the menu plus the manager-only publish/retract controls.
pub struct Catalog<S> {
    store: S,
}

impl<S: Store> Catalog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn drink_types(&self) -> Result<Vec<DrinkType>, DomainError> {
        Ok(self.store.drink_types().await?)
    }

    /// Published drinks of a type, each with its active sizes cheapest first.
    ///
    /// Drinks with no active size are left out.
    pub async fn drink_menu(
        &self,
        type_id: DrinkTypeId,
    ) -> Result<Vec<(Drink, Vec<DrinkSize>)>, DomainError> {
        let drinks = self.store.drinks_by_type(type_id).await?;
        let mut menu = Vec::with_capacity(drinks.len());
        for drink in drinks {
            let sizes = self.store.drink_sizes(drink.id).await?;
            if sizes.is_empty() {
                tracing::debug!(drink_id = %drink.id, "Drink has no active sizes, skipped");
                continue;
            }
            menu.push((drink, sizes));
        }
        Ok(menu)
    }

    /// Renders a drink card for managers to review before publishing.
    pub async fn admin_card(&self, drink_id: DrinkId) -> Result<RenderRequest, DomainError> {
        let drink = self.require_drink(drink_id).await?;
        let sizes = self.store.drink_sizes(drink_id).await?;
        let add_ons = self.store.drink_add_ons(drink_id).await?;
        Ok(render::drink_admin_card(&drink, &sizes, &add_ons))
    }

    /// Makes a drink card visible to customers.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self, actor: Actor, drink_id: DrinkId) -> Result<Drink, DomainError> {
        observe("publish_drink", actor, async {
            self.require_manager(&actor, "publish a drink").await?;
            if !self.store.publish_drink(drink_id).await? {
                return Err(DomainError::not_found("drink", drink_id));
            }
            tracing::info!(%drink_id, "Drink published");
            self.require_drink(drink_id).await
        })
        .await
    }

    /// Pulls a drink card back into draft so it can be entered again.
    ///
    /// The drink, its sizes and its add-on links are deactivated together.
    #[tracing::instrument(skip(self))]
    pub async fn retract(&self, actor: Actor, drink_id: DrinkId) -> Result<(), DomainError> {
        observe("retract_drink", actor, async {
            self.require_manager(&actor, "retract a drink").await?;
            if !self.store.retract_drink(drink_id).await? {
                return Err(DomainError::not_found("drink", drink_id));
            }
            tracing::info!(%drink_id, "Drink retracted");
            Ok(())
        })
        .await
    }

    async fn require_drink(&self, drink_id: DrinkId) -> Result<Drink, DomainError> {
        self.store
            .get_drink(drink_id)
            .await?
            .ok_or_else(|| DomainError::not_found("drink", drink_id))
    }

    async fn require_manager(
        &self,
        actor: &Actor,
        action: &'static str,
    ) -> Result<(), DomainError> {
        let is_manager = actor.is(ActorRole::Manager)
            && self
                .store
                .get_user(actor.id)
                .await?
                .is_some_and(|u| u.role == Role::Manager);
        if is_manager {
            Ok(())
        } else {
            Err(OrderError::Unauthorized { action }.into())
        }
    }
}
