//! Persistence for the café ordering bot.
//!
//! Two traits split the store by ownership: [`CatalogStore`] is the
//! read-mostly menu (drinks, sizes, add-ons) and [`OrderStore`] holds orders,
//! sessions and users. Both are implemented in memory for tests and on
//! PostgreSQL for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use common::{
    AddOnId, DrinkId, DrinkSizeId, DrinkTypeId, Money, OrderId, OrderStatus, SessionId, SizeId,
    UserId,
};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    AddOn, Drink, DrinkSize, DrinkType, LastAction, LineItems, ManagerGuard, NewOrder,
    OrderRecord, Role, SessionRecord, Size, StatusChange, User,
};
pub use store::{CatalogStore, OrderStore, OrderStoreExt, Store, normalize_size_name};
