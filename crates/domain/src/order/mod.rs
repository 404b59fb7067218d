//! Order aggregate and the services acting on it.

mod aggregate;
mod authority;
mod editor;

pub use aggregate::{Order, Toggle, recompute_price};
pub use authority::{StatusAuthority, sanitize_reason};
pub use editor::{AddOnPolicy, LineItemEditor, OrderView};

use store::{AddOnId, CatalogStore, DrinkSizeId, OrderId, OrderStatus, OrderStore, UserId};
use thiserror::Error;

use crate::error::DomainError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The drink-size was retracted from the menu.
    #[error("Drink size {drink_size_id} is not available")]
    DrinkSizeInactive { drink_size_id: DrinkSizeId },

    /// The drink-size has no positive price.
    #[error("Drink size {drink_size_id} has no price")]
    DrinkSizeUnpriced { drink_size_id: DrinkSizeId },

    /// The stored order points at a different drink-size than was loaded.
    #[error("Order {order_id} belongs to drink size {expected}, got {actual}")]
    DrinkSizeMismatch {
        order_id: OrderId,
        expected: DrinkSizeId,
        actual: DrinkSizeId,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// The actor is not the customer who placed the order.
    #[error("Order {order_id} does not belong to user {actor_id}")]
    NotOwner { order_id: OrderId, actor_id: UserId },

    /// The actor's role may not perform the action.
    #[error("Not permitted to {action}")]
    Unauthorized { action: &'static str },

    /// Another manager already claimed the order.
    #[error("Order {order_id} is already claimed")]
    AlreadyClaimed { order_id: OrderId },

    /// The order is claimed by a different manager.
    #[error("Order {order_id} is claimed by another manager")]
    NotClaimedBy { order_id: OrderId },

    /// The add-on is not offered for the ordered drink.
    #[error("Add-on {add_on_id} is not offered for this drink")]
    AddOnNotAllowed { add_on_id: AddOnId },

    /// A payment does not cover the order's total.
    #[error("Payment of {paid} minor units does not match order {order_id}")]
    PaymentMismatch { order_id: OrderId, paid: u32 },
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}

/// Loads an active order together with its drink-size.
///
/// Inactive orders are reported as missing.
pub(crate) async fn load_order<S>(store: &S, order_id: OrderId) -> Result<Order, DomainError>
where
    S: CatalogStore + OrderStore + ?Sized,
{
    let record = store
        .get_order(order_id)
        .await?
        .filter(|o| o.is_active)
        .ok_or_else(|| DomainError::not_found("order", order_id))?;

    let drink_size = store
        .get_drink_size(record.drink_size_id)
        .await?
        .ok_or_else(|| {
            DomainError::CatalogInconsistency(format!(
                "order {} references missing drink size {}",
                record.id, record.drink_size_id
            ))
        })?;

    Ok(Order::from_record(record, drink_size)?)
}
