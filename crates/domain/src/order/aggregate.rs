//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use store::{
    AddOn, AddOnId, DrinkSize, LineItems, Money, NewOrder, OrderId, OrderRecord, OrderStatus,
    SessionId, UserId,
};

use crate::action::QuantityDelta;
use crate::actor::{Actor, ActorRole};

use super::OrderError;

/// Computes an order total: unit price times quantity plus every add-on once.
///
/// Add-ons are priced per order, not per cup.
pub fn recompute_price(unit_price: Money, quantity: u32, add_ons: &[AddOn]) -> Money {
    unit_price.multiply(quantity) + add_ons.iter().map(|a| a.price).sum::<Money>()
}

/// Outcome of toggling an add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Added,
    Removed,
}

/// Order aggregate root.
///
/// Wraps a stored order together with the drink-size it was created for, so
/// the total can always be recomputed from the unit price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer_id: UserId,
    drink_size: DrinkSize,
    status: OrderStatus,
    quantity: u32,
    /// Selected add-ons, ordered by id.
    add_ons: Vec<AddOn>,
    total_price: Money,
    manager_id: Option<UserId>,
    manager_comment: Option<String>,
    decline_reason: Option<String>,
    session_id: Option<SessionId>,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Construction
impl Order {
    /// Prepares a new draft order.
    ///
    /// Fails unless the drink-size is active and has a positive price. The
    /// initial total is `price * quantity`.
    pub fn draft(
        customer_id: UserId,
        drink_size: &DrinkSize,
        quantity: u32,
        session_id: Option<SessionId>,
    ) -> Result<NewOrder, OrderError> {
        if !drink_size.is_active {
            return Err(OrderError::DrinkSizeInactive {
                drink_size_id: drink_size.id,
            });
        }
        if !drink_size.price.is_positive() {
            return Err(OrderError::DrinkSizeUnpriced {
                drink_size_id: drink_size.id,
            });
        }
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }

        Ok(NewOrder {
            customer_id,
            drink_size_id: drink_size.id,
            quantity,
            total_price: recompute_price(drink_size.price, quantity, &[]),
            session_id,
        })
    }

    /// Rebuilds the aggregate from its stored row.
    pub fn from_record(record: OrderRecord, drink_size: DrinkSize) -> Result<Self, OrderError> {
        if record.drink_size_id != drink_size.id {
            return Err(OrderError::DrinkSizeMismatch {
                order_id: record.id,
                expected: record.drink_size_id,
                actual: drink_size.id,
            });
        }

        let mut add_ons = record.add_ons;
        add_ons.sort_by_key(|a| a.id);

        Ok(Self {
            id: record.id,
            customer_id: record.customer_id,
            drink_size,
            status: record.status,
            quantity: record.quantity,
            add_ons,
            total_price: record.total_price,
            manager_id: record.manager_id,
            manager_comment: record.manager_comment,
            decline_reason: record.decline_reason,
            session_id: record.session_id,
            is_active: record.is_active,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> UserId {
        self.customer_id
    }

    pub fn drink_size(&self) -> &DrinkSize {
        &self.drink_size
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn add_ons(&self) -> &[AddOn] {
        &self.add_ons
    }

    pub fn has_add_on(&self, add_on_id: AddOnId) -> bool {
        self.add_ons.iter().any(|a| a.id == add_on_id)
    }

    /// The stored total.
    pub fn total_price(&self) -> Money {
        self.total_price
    }

    /// The total the pricing rule yields for the current line items.
    pub fn expected_price(&self) -> Money {
        recompute_price(self.drink_size.price, self.quantity, &self.add_ons)
    }

    pub fn manager_id(&self) -> Option<UserId> {
        self.manager_id
    }

    pub fn manager_comment(&self) -> Option<&str> {
        self.manager_comment.as_deref()
    }

    pub fn decline_reason(&self) -> Option<&str> {
        self.decline_reason.as_deref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Version the order was read at.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Line items as they should be written back.
    pub fn line_items(&self) -> LineItems {
        LineItems {
            quantity: self.quantity,
            total_price: self.total_price,
            add_ons: self.add_ons.iter().map(|a| a.id).collect(),
        }
    }
}

// Rule checks
impl Order {
    /// Fails unless `actor` is the customer who placed the order.
    pub fn ensure_owned_by(&self, actor: &Actor) -> Result<(), OrderError> {
        if actor.role == ActorRole::Customer && actor.id == self.customer_id {
            Ok(())
        } else {
            Err(OrderError::NotOwner {
                order_id: self.id,
                actor_id: actor.id,
            })
        }
    }

    pub fn ensure_editable(&self) -> Result<(), OrderError> {
        if self.status.can_edit_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "edit items",
            })
        }
    }

    /// Fails unless the order has at least one priced line.
    pub fn ensure_priced(&self) -> Result<(), OrderError> {
        if self.quantity >= 1 && self.drink_size.price.is_positive() {
            Ok(())
        } else {
            Err(OrderError::DrinkSizeUnpriced {
                drink_size_id: self.drink_size.id,
            })
        }
    }
}

// Mutations
impl Order {
    /// Applies a quantity step and recomputes the total.
    ///
    /// Returns false, leaving the order untouched, if the step would take the
    /// quantity below one.
    pub fn change_quantity(&mut self, delta: QuantityDelta) -> bool {
        let next = match delta {
            QuantityDelta::Increment => self.quantity.saturating_add(1),
            QuantityDelta::Decrement => self.quantity.saturating_sub(1),
        };
        if next < 1 || next == self.quantity {
            return false;
        }

        self.quantity = next;
        self.reprice();
        true
    }

    /// Removes the add-on if selected, adds it otherwise, then recomputes the
    /// total.
    pub fn toggle_add_on(&mut self, add_on: AddOn) -> Toggle {
        let toggle = match self.add_ons.iter().position(|a| a.id == add_on.id) {
            Some(index) => {
                self.add_ons.remove(index);
                Toggle::Removed
            }
            None => {
                let index = self.add_ons.partition_point(|a| a.id < add_on.id);
                self.add_ons.insert(index, add_on);
                Toggle::Added
            }
        };
        self.reprice();
        toggle
    }

    fn reprice(&mut self) {
        self.total_price = self.expected_price();
    }
}
