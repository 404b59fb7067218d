//! Shared types used across the café ordering crates.

pub mod money;
pub mod status;
pub mod types;

pub use money::Money;
pub use status::OrderStatus;
pub use types::{AddOnId, DrinkId, DrinkSizeId, DrinkTypeId, OrderId, SessionId, SizeId, UserId};
