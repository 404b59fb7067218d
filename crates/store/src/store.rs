use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    AddOn, AddOnId, Drink, DrinkId, DrinkSize, DrinkSizeId, DrinkType, DrinkTypeId, LastAction,
    LineItems, NewOrder, OrderId, OrderRecord, OrderStatus, Result, SessionId, SessionRecord,
    Size, SizeId, StatusChange, StoreError, User, UserId,
};

/// Read-mostly access to the menu.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Lists all drink categories.
    async fn drink_types(&self) -> Result<Vec<DrinkType>>;

    /// Lists active, published drinks of a category.
    async fn drinks_by_type(&self, type_id: DrinkTypeId) -> Result<Vec<Drink>>;

    /// Fetches a drink regardless of its active/draft flags.
    async fn get_drink(&self, drink_id: DrinkId) -> Result<Option<Drink>>;

    /// Lists active drink-sizes of a drink, cheapest first.
    async fn drink_sizes(&self, drink_id: DrinkId) -> Result<Vec<DrinkSize>>;

    /// Fetches a drink-size regardless of its active flag.
    async fn get_drink_size(&self, drink_size_id: DrinkSizeId) -> Result<Option<DrinkSize>>;

    /// Fetches the active drink-size for a drink in a given size.
    async fn find_drink_size(&self, drink_id: DrinkId, size_id: SizeId)
    -> Result<Option<DrinkSize>>;

    async fn get_add_on(&self, add_on_id: AddOnId) -> Result<Option<AddOn>>;

    /// Lists add-ons actively linked to a drink.
    async fn drink_add_ons(&self, drink_id: DrinkId) -> Result<Vec<AddOn>>;

    async fn sizes(&self) -> Result<Vec<Size>>;

    /// Finds a size whose upper-cased name equals `normalized`.
    async fn size_by_name(&self, normalized: &str) -> Result<Option<Size>>;

    /// Finds a size whose upper-cased name starts with `normalized`.
    async fn size_by_prefix(&self, normalized: &str) -> Result<Option<Size>>;

    /// Marks a drink card as published. Returns false if the drink is unknown.
    async fn publish_drink(&self, drink_id: DrinkId) -> Result<bool>;

    /// Retracts a drink card: the drink becomes an inactive draft and all of
    /// its sizes and add-on links are deactivated, atomically.
    /// Returns false if the drink is unknown.
    async fn retract_drink(&self, drink_id: DrinkId) -> Result<bool>;
}

/// Orders, sessions and users.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a draft order and returns it with its generated id.
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord>;

    /// Fetches an order with its selected add-ons.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Replaces quantity, total price and the selected add-on set in one
    /// transaction.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version differs from
    /// `expected_version`, or if the order is inactive or no longer in an
    /// editable status. Returns the order as stored after the write.
    async fn save_line_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        items: LineItems,
    ) -> Result<OrderRecord>;

    /// Applies a conditional status update.
    ///
    /// Returns true if the order was active, in `change.from` and satisfied
    /// the manager guard; false otherwise, in which case nothing is written.
    async fn try_transition(&self, order_id: OrderId, change: StatusChange) -> Result<bool>;

    /// Lists active orders in any of `statuses` created before the cutoff.
    async fn stale_orders(
        &self,
        statuses: &[OrderStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>>;

    /// Returns the customer's most recent active order whose status is not
    /// in `excluded`.
    async fn latest_order(
        &self,
        customer_id: UserId,
        excluded: &[OrderStatus],
    ) -> Result<Option<OrderRecord>>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Inserts the user if unknown. Existing users are left untouched.
    async fn ensure_user(&self, user: User) -> Result<User>;

    /// Opens a new ordering session for a user.
    async fn open_session(&self, user_id: UserId) -> Result<SessionId>;

    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>>;

    async fn record_last_action(&self, session_id: SessionId, action: LastAction) -> Result<()>;

    /// Round-trips to the backing store.
    async fn ping(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Fetches an order, failing with `NotFound` if it does not exist.
    async fn require_order(&self, order_id: OrderId) -> Result<OrderRecord> {
        self.get_order(order_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "order",
                id: order_id.get(),
            })
    }

    /// Returns the customer's latest order that is still in play.
    async fn latest_open_order(&self, customer_id: UserId) -> Result<Option<OrderRecord>> {
        self.latest_order(
            customer_id,
            &[
                OrderStatus::Declined,
                OrderStatus::Expired,
                OrderStatus::Draft,
            ],
        )
        .await
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}

/// A backend serving both the menu and the orders.
pub trait Store: CatalogStore + OrderStore {}

impl<T: CatalogStore + OrderStore + ?Sized> Store for T {}

/// Normalizes a size label for lookups: trimmed and upper-cased.
pub fn normalize_size_name(name: &str) -> String {
    name.trim().to_uppercase()
}
