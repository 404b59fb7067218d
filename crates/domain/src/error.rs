//! Domain error types.

use store::{OrderId, StoreError};
use thiserror::Error;

use crate::action::ActionParseError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A business rule of the order rejected the action.
    #[error("Order error: {0}")]
    Order(OrderError),

    /// A referenced entity does not exist or is no longer active.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Another actor changed the order first.
    #[error("Order {order_id} is not in the expected state")]
    Conflict { order_id: OrderId },

    /// An inbound action could not be parsed.
    #[error("Malformed action: {0}")]
    Malformed(#[from] ActionParseError),

    /// The catalog references rows that do not exist.
    #[error("Catalog inconsistency: {0}")]
    CatalogInconsistency(String),
}

impl DomainError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        DomainError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
