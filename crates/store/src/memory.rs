use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    AddOn, AddOnId, Drink, DrinkId, DrinkSize, DrinkSizeId, DrinkType, DrinkTypeId, LastAction,
    LineItems, Money, NewOrder, OrderId, OrderRecord, OrderStatus, Result, SessionId,
    SessionRecord, Size, SizeId, StatusChange, StoreError, User, UserId,
    store::{CatalogStore, OrderStore},
};

#[derive(Debug, Clone)]
struct DrinkSizeRow {
    drink_id: DrinkId,
    size_id: SizeId,
    price: Money,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct DrinkAddOnRow {
    drink_id: DrinkId,
    add_on_id: AddOnId,
    is_active: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    drink_types: BTreeMap<DrinkTypeId, DrinkType>,
    drinks: BTreeMap<DrinkId, Drink>,
    sizes: BTreeMap<SizeId, Size>,
    drink_sizes: BTreeMap<DrinkSizeId, DrinkSizeRow>,
    add_ons: BTreeMap<AddOnId, AddOn>,
    drink_add_ons: Vec<DrinkAddOnRow>,
    /// Orders are kept without their add-ons; selections live in
    /// `order_add_ons` and are joined on read.
    orders: BTreeMap<OrderId, OrderRecord>,
    order_add_ons: BTreeSet<(OrderId, AddOnId)>,
    users: HashMap<UserId, User>,
    sessions: BTreeMap<SessionId, SessionRecord>,
    unreadable_users: BTreeSet<UserId>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn drink_size(&self, id: DrinkSizeId) -> Option<DrinkSize> {
        let row = self.drink_sizes.get(&id)?;
        let drink = self.drinks.get(&row.drink_id)?;
        let size = self.sizes.get(&row.size_id)?;
        Some(DrinkSize {
            id,
            drink_id: row.drink_id,
            drink_name: drink.name.clone(),
            size_id: row.size_id,
            size_name: size.name.clone(),
            volume_ml: size.volume_ml,
            price: row.price,
            is_active: row.is_active,
        })
    }

    fn order(&self, id: OrderId) -> Option<OrderRecord> {
        let mut order = self.orders.get(&id)?.clone();
        order.add_ons = self
            .order_add_ons
            .range((id, AddOnId::new(i64::MIN))..=(id, AddOnId::new(i64::MAX)))
            .filter_map(|(_, add_on_id)| self.add_ons.get(add_on_id).cloned())
            .collect();
        Some(order)
    }
}

/// In-memory store implementation for testing.
///
/// Implements both store traits with the same semantics as the PostgreSQL
/// implementation. A single lock guards all tables, so every trait method is
/// atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_drink_type(&self, name: impl Into<String>) -> DrinkTypeId {
        let mut state = self.state.write().await;
        let id = DrinkTypeId::new(state.next_id());
        state.drink_types.insert(
            id,
            DrinkType {
                id,
                name: name.into(),
            },
        );
        id
    }

    /// Adds an active, published drink.
    pub async fn add_drink(&self, type_id: DrinkTypeId, name: impl Into<String>) -> DrinkId {
        let mut state = self.state.write().await;
        let id = DrinkId::new(state.next_id());
        let type_name = state
            .drink_types
            .get(&type_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        state.drinks.insert(
            id,
            Drink {
                id,
                type_id,
                type_name,
                name: name.into(),
                description: None,
                image_file_id: None,
                is_active: true,
                is_draft: false,
            },
        );
        id
    }

    /// Adds a drink card that has not been published yet.
    pub async fn add_draft_drink(&self, type_id: DrinkTypeId, name: impl Into<String>) -> DrinkId {
        let id = self.add_drink(type_id, name).await;
        if let Some(drink) = self.state.write().await.drinks.get_mut(&id) {
            drink.is_draft = true;
        }
        id
    }

    pub async fn set_drink_image(&self, drink_id: DrinkId, file_id: impl Into<String>) {
        if let Some(drink) = self.state.write().await.drinks.get_mut(&drink_id) {
            drink.image_file_id = Some(file_id.into());
        }
    }

    pub async fn add_size(&self, name: impl Into<String>, volume_ml: i32) -> SizeId {
        let mut state = self.state.write().await;
        let id = SizeId::new(state.next_id());
        state.sizes.insert(
            id,
            Size {
                id,
                name: name.into(),
                volume_ml,
            },
        );
        id
    }

    pub async fn add_drink_size(
        &self,
        drink_id: DrinkId,
        size_id: SizeId,
        price: Money,
    ) -> DrinkSizeId {
        let mut state = self.state.write().await;
        let id = DrinkSizeId::new(state.next_id());
        state.drink_sizes.insert(
            id,
            DrinkSizeRow {
                drink_id,
                size_id,
                price,
                is_active: true,
            },
        );
        id
    }

    pub async fn deactivate_drink_size(&self, drink_size_id: DrinkSizeId) {
        if let Some(row) = self.state.write().await.drink_sizes.get_mut(&drink_size_id) {
            row.is_active = false;
        }
    }

    pub async fn add_add_on(&self, name: impl Into<String>, price: Money) -> AddOnId {
        let mut state = self.state.write().await;
        let id = AddOnId::new(state.next_id());
        state.add_ons.insert(
            id,
            AddOn {
                id,
                name: name.into(),
                price,
            },
        );
        id
    }

    pub async fn link_add_on(&self, drink_id: DrinkId, add_on_id: AddOnId) {
        self.state.write().await.drink_add_ons.push(DrinkAddOnRow {
            drink_id,
            add_on_id,
            is_active: true,
        });
    }

    pub async fn add_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// Makes every following lookup of `user_id` fail with a database error.
    pub async fn make_user_unreadable(&self, user_id: UserId) {
        self.state.write().await.unreadable_users.insert(user_id);
    }

    /// Rewrites an order's creation time.
    pub async fn backdate_order(&self, order_id: OrderId, created_at: DateTime<Utc>) {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.created_at = created_at;
        }
    }

    /// Soft-deletes an order.
    pub async fn deactivate_order(&self, order_id: OrderId) {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.is_active = false;
        }
    }

    /// Returns the number of add-on selection rows stored for an order.
    pub async fn add_on_row_count(&self, order_id: OrderId) -> usize {
        self.state
            .read()
            .await
            .order_add_ons
            .iter()
            .filter(|(o, _)| *o == order_id)
            .count()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn drink_types(&self) -> Result<Vec<DrinkType>> {
        Ok(self.state.read().await.drink_types.values().cloned().collect())
    }

    async fn drinks_by_type(&self, type_id: DrinkTypeId) -> Result<Vec<Drink>> {
        let state = self.state.read().await;
        Ok(state
            .drinks
            .values()
            .filter(|d| d.type_id == type_id && d.is_active && !d.is_draft)
            .cloned()
            .collect())
    }

    async fn get_drink(&self, drink_id: DrinkId) -> Result<Option<Drink>> {
        Ok(self.state.read().await.drinks.get(&drink_id).cloned())
    }

    async fn drink_sizes(&self, drink_id: DrinkId) -> Result<Vec<DrinkSize>> {
        let state = self.state.read().await;
        let mut sizes: Vec<_> = state
            .drink_sizes
            .iter()
            .filter(|(_, row)| row.drink_id == drink_id && row.is_active)
            .filter_map(|(id, _)| state.drink_size(*id))
            .collect();
        sizes.sort_by_key(|s| s.price);
        Ok(sizes)
    }

    async fn get_drink_size(&self, drink_size_id: DrinkSizeId) -> Result<Option<DrinkSize>> {
        Ok(self.state.read().await.drink_size(drink_size_id))
    }

    async fn find_drink_size(
        &self,
        drink_id: DrinkId,
        size_id: SizeId,
    ) -> Result<Option<DrinkSize>> {
        let state = self.state.read().await;
        Ok(state
            .drink_sizes
            .iter()
            .find(|(_, row)| row.drink_id == drink_id && row.size_id == size_id && row.is_active)
            .and_then(|(id, _)| state.drink_size(*id)))
    }

    async fn get_add_on(&self, add_on_id: AddOnId) -> Result<Option<AddOn>> {
        Ok(self.state.read().await.add_ons.get(&add_on_id).cloned())
    }

    async fn drink_add_ons(&self, drink_id: DrinkId) -> Result<Vec<AddOn>> {
        let state = self.state.read().await;
        Ok(state
            .drink_add_ons
            .iter()
            .filter(|row| row.drink_id == drink_id && row.is_active)
            .filter_map(|row| state.add_ons.get(&row.add_on_id).cloned())
            .collect())
    }

    async fn sizes(&self) -> Result<Vec<Size>> {
        Ok(self.state.read().await.sizes.values().cloned().collect())
    }

    async fn size_by_name(&self, normalized: &str) -> Result<Option<Size>> {
        let state = self.state.read().await;
        Ok(state
            .sizes
            .values()
            .find(|s| s.name.to_uppercase() == normalized)
            .cloned())
    }

    async fn size_by_prefix(&self, normalized: &str) -> Result<Option<Size>> {
        let state = self.state.read().await;
        Ok(state
            .sizes
            .values()
            .find(|s| s.name.to_uppercase().starts_with(normalized))
            .cloned())
    }

    async fn publish_drink(&self, drink_id: DrinkId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.drinks.get_mut(&drink_id) {
            Some(drink) => {
                drink.is_draft = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retract_drink(&self, drink_id: DrinkId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(drink) = state.drinks.get_mut(&drink_id) else {
            return Ok(false);
        };
        drink.is_draft = true;
        drink.is_active = false;

        for row in state.drink_sizes.values_mut().filter(|r| r.drink_id == drink_id) {
            row.is_active = false;
        }
        for row in state.drink_add_ons.iter_mut().filter(|r| r.drink_id == drink_id) {
            row.is_active = false;
        }
        Ok(true)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        if !state.drink_sizes.contains_key(&order.drink_size_id) {
            return Err(StoreError::NotFound {
                entity: "drink_size",
                id: order.drink_size_id.get(),
            });
        }

        let id = OrderId::new(state.next_id());
        let now = Utc::now();
        let record = OrderRecord {
            id,
            customer_id: order.customer_id,
            drink_size_id: order.drink_size_id,
            status: OrderStatus::Draft,
            quantity: order.quantity,
            total_price: order.total_price,
            add_ons: Vec::new(),
            manager_id: None,
            manager_comment: None,
            decline_reason: None,
            session_id: order.session_id,
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(id, record.clone());
        Ok(record)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.state.read().await.order(order_id))
    }

    async fn save_line_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        items: LineItems,
    ) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        let conflict = StoreError::ConcurrencyConflict {
            order_id,
            expected: expected_version,
        };
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Err(conflict);
        };
        if order.version != expected_version
            || !order.is_active
            || !order.status.can_edit_items()
        {
            return Err(conflict);
        }

        order.quantity = items.quantity;
        order.total_price = items.total_price;
        order.version += 1;
        order.updated_at = Utc::now();

        state.order_add_ons.retain(|(o, _)| *o != order_id);
        for add_on_id in items.add_ons {
            state.order_add_ons.insert((order_id, add_on_id));
        }

        state.order(order_id).ok_or(StoreError::NotFound {
            entity: "order",
            id: order_id.get(),
        })
    }

    async fn try_transition(&self, order_id: OrderId, change: StatusChange) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if !order.is_active
            || order.status != change.from
            || !change.guard.admits(order.manager_id)
        {
            return Ok(false);
        }

        order.status = change.to;
        if let Some(manager) = change.assign_manager {
            order.manager_id = Some(manager);
        }
        if let Some(comment) = change.manager_comment {
            order.manager_comment = Some(comment);
        }
        if let Some(reason) = change.decline_reason {
            order.decline_reason = Some(reason);
        }
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn stale_orders(
        &self,
        statuses: &[OrderStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.is_active && statuses.contains(&o.status) && o.created_at < created_before
            })
            .filter_map(|o| state.order(o.id))
            .collect())
    }

    async fn latest_order(
        &self,
        customer_id: UserId,
        excluded: &[OrderStatus],
    ) -> Result<Option<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.customer_id == customer_id && o.is_active && !excluded.contains(&o.status)
            })
            .max_by_key(|o| (o.created_at, o.id))
            .and_then(|o| state.order(o.id)))
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let state = self.state.read().await;
        if state.unreadable_users.contains(&user_id) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state.users.get(&user_id).cloned())
    }

    async fn ensure_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        Ok(state.users.entry(user.id).or_insert(user).clone())
    }

    async fn open_session(&self, user_id: UserId) -> Result<SessionId> {
        let mut state = self.state.write().await;
        let id = SessionId::new(state.next_id());
        state.sessions.insert(
            id,
            SessionRecord {
                id,
                user_id,
                last_action: None,
            },
        );
        Ok(id)
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn record_last_action(&self, session_id: SessionId, action: LastAction) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::NotFound {
                entity: "session",
                id: session_id.get(),
            })?;
        session.last_action = Some(action);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManagerGuard, OrderStoreExt, Role};

    struct Fixture {
        store: InMemoryStore,
        drink_size: DrinkSizeId,
        syrup: AddOnId,
        milk: AddOnId,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let coffee = store.add_drink_type("Coffee").await;
        let latte = store.add_drink(coffee, "Latte").await;
        let medium = store.add_size("M", 300).await;
        let drink_size = store
            .add_drink_size(latte, medium, Money::from_units(150))
            .await;
        let syrup = store.add_add_on("Syrup", Money::from_units(30)).await;
        let milk = store.add_add_on("Oat milk", Money::from_units(50)).await;
        store.link_add_on(latte, syrup).await;
        store.link_add_on(latte, milk).await;
        Fixture {
            store,
            drink_size,
            syrup,
            milk,
        }
    }

    async fn draft(f: &Fixture) -> OrderRecord {
        f.store
            .insert_order(NewOrder {
                customer_id: UserId::new(100),
                drink_size_id: f.drink_size,
                quantity: 1,
                total_price: Money::from_units(150),
                session_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_and_get_order() {
        let f = fixture().await;
        let order = draft(&f).await;

        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.version, 1);

        let loaded = f.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(loaded, order);
    }

    #[tokio::test]
    async fn insert_with_unknown_drink_size_fails() {
        let f = fixture().await;
        let result = f
            .store
            .insert_order(NewOrder {
                customer_id: UserId::new(1),
                drink_size_id: DrinkSizeId::new(9999),
                quantity: 1,
                total_price: Money::zero(),
                session_id: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn save_line_items_replaces_selection() {
        let f = fixture().await;
        let order = draft(&f).await;

        let saved = f
            .store
            .save_line_items(
                order.id,
                1,
                LineItems {
                    quantity: 2,
                    total_price: Money::from_units(380),
                    add_ons: vec![f.milk, f.syrup],
                },
            )
            .await
            .unwrap();

        assert_eq!(saved.version, 2);
        assert_eq!(saved.quantity, 2);
        let ids: Vec<_> = saved.add_ons.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![f.syrup, f.milk]);

        let saved = f
            .store
            .save_line_items(
                order.id,
                2,
                LineItems {
                    quantity: 2,
                    total_price: Money::from_units(330),
                    add_ons: vec![f.milk],
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.add_ons.len(), 1);
        assert_eq!(f.store.add_on_row_count(order.id).await, 1);
    }

    #[tokio::test]
    async fn save_line_items_with_stale_version_conflicts() {
        let f = fixture().await;
        let order = draft(&f).await;
        let items = LineItems {
            quantity: 2,
            total_price: Money::from_units(300),
            add_ons: vec![],
        };

        f.store
            .save_line_items(order.id, 1, items.clone())
            .await
            .unwrap();
        let result = f.store.save_line_items(order.id, 1, items).await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { expected: 1, .. })
        ));
    }

    #[tokio::test]
    async fn save_line_items_rejected_after_payment() {
        let f = fixture().await;
        let order = draft(&f).await;
        assert!(
            f.store
                .try_transition(
                    order.id,
                    StatusChange::new(OrderStatus::Draft, OrderStatus::Created),
                )
                .await
                .unwrap()
        );
        assert!(
            f.store
                .try_transition(
                    order.id,
                    StatusChange::new(OrderStatus::Created, OrderStatus::Paid),
                )
                .await
                .unwrap()
        );

        let result = f
            .store
            .save_line_items(
                order.id,
                3,
                LineItems {
                    quantity: 5,
                    total_price: Money::from_units(750),
                    add_ons: vec![],
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
        assert_eq!(f.store.require_order(order.id).await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn try_transition_checks_expected_status() {
        let f = fixture().await;
        let order = draft(&f).await;

        let wrong_from = StatusChange::new(OrderStatus::Paid, OrderStatus::Processing);
        assert!(!f.store.try_transition(order.id, wrong_from).await.unwrap());

        let unknown = StatusChange::new(OrderStatus::Draft, OrderStatus::Created);
        assert!(!f.store.try_transition(OrderId::new(777), unknown).await.unwrap());

        let stored = f.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Draft);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn try_transition_honours_manager_guard() {
        let f = fixture().await;
        let order = draft(&f).await;
        f.store
            .try_transition(order.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Paid))
            .await
            .unwrap();

        let first = UserId::new(1);
        let second = UserId::new(2);
        let claim = |m: UserId| {
            StatusChange::new(OrderStatus::Paid, OrderStatus::Processing)
                .guard(ManagerGuard::Unclaimed)
                .assign_manager(m)
        };

        assert!(f.store.try_transition(order.id, claim(first)).await.unwrap());
        assert!(!f.store.try_transition(order.id, claim(second)).await.unwrap());

        let ready_by_second = StatusChange::new(OrderStatus::Processing, OrderStatus::Ready)
            .guard(ManagerGuard::ClaimedBy(second));
        assert!(!f.store.try_transition(order.id, ready_by_second).await.unwrap());

        let stored = f.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.manager_id, Some(first));
        assert_eq!(stored.status, OrderStatus::Processing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_claims_admit_exactly_one() {
        let f = fixture().await;
        let order = draft(&f).await;
        f.store
            .try_transition(order.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Paid))
            .await
            .unwrap();

        let id = order.id;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let claim = |m: UserId| {
            let store = f.store.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let change = StatusChange::new(OrderStatus::Paid, OrderStatus::Processing)
                    .guard(ManagerGuard::Unclaimed)
                    .assign_manager(m);
                barrier.wait().await;
                store.try_transition(id, change).await.unwrap()
            })
        };
        let (first, second) = tokio::join!(claim(UserId::new(1)), claim(UserId::new(2)));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first ^ second);
        let stored = f.store.require_order(order.id).await.unwrap();
        let winner = if first { UserId::new(1) } else { UserId::new(2) };
        assert_eq!(stored.manager_id, Some(winner));
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn inactive_orders_never_transition() {
        let f = fixture().await;
        let order = draft(&f).await;
        f.store.deactivate_order(order.id).await;

        let change = StatusChange::new(OrderStatus::Draft, OrderStatus::Created);
        assert!(!f.store.try_transition(order.id, change).await.unwrap());
    }

    #[tokio::test]
    async fn stale_orders_filters_by_status_and_age() {
        let f = fixture().await;
        let old = draft(&f).await;
        let fresh = draft(&f).await;
        for id in [old.id, fresh.id] {
            f.store
                .try_transition(id, StatusChange::new(OrderStatus::Draft, OrderStatus::Created))
                .await
                .unwrap();
        }
        let cutoff = Utc::now() - chrono::Duration::minutes(30);
        f.store
            .backdate_order(old.id, cutoff - chrono::Duration::minutes(1))
            .await;

        let stale = f
            .store
            .stale_orders(&[OrderStatus::Created, OrderStatus::Paid], cutoff)
            .await
            .unwrap();
        let ids: Vec<_> = stale.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![old.id]);
    }

    #[tokio::test]
    async fn latest_open_order_skips_closed_statuses() {
        let f = fixture().await;
        let paid = draft(&f).await;
        f.store
            .try_transition(paid.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Paid))
            .await
            .unwrap();
        let _cart = draft(&f).await;

        let latest = f
            .store
            .latest_open_order(UserId::new(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, paid.id);

        assert!(
            f.store
                .latest_open_order(UserId::new(999))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn retract_drink_deactivates_sizes_and_add_ons() {
        let f = fixture().await;
        let drink_id = f.store.get_drink_size(f.drink_size).await.unwrap().unwrap().drink_id;

        assert!(f.store.retract_drink(drink_id).await.unwrap());

        let drink = f.store.get_drink(drink_id).await.unwrap().unwrap();
        assert!(drink.is_draft);
        assert!(!drink.is_active);
        assert!(f.store.drink_sizes(drink_id).await.unwrap().is_empty());
        assert!(f.store.drink_add_ons(drink_id).await.unwrap().is_empty());

        assert!(f.store.publish_drink(drink_id).await.unwrap());
        assert!(!f.store.get_drink(drink_id).await.unwrap().unwrap().is_draft);
        assert!(!f.store.retract_drink(DrinkId::new(4242)).await.unwrap());
    }

    #[tokio::test]
    async fn size_lookup_exact_then_prefix() {
        let store = InMemoryStore::new();
        let medium = store.add_size("Medium", 350).await;
        let large = store.add_size("L", 450).await;

        assert_eq!(store.size_by_name("L").await.unwrap().unwrap().id, large);
        assert!(store.size_by_name("M").await.unwrap().is_none());
        assert_eq!(store.size_by_prefix("M").await.unwrap().unwrap().id, medium);
        assert!(store.size_by_prefix("%").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ensure_user_keeps_existing_role() {
        let store = InMemoryStore::new();
        let id = UserId::new(10);
        store.add_user(User::new(id, Role::Manager)).await;

        let user = store.ensure_user(User::new(id, Role::Customer)).await.unwrap();
        assert_eq!(user.role, Role::Manager);
    }

    #[tokio::test]
    async fn sessions_track_last_action() {
        let store = InMemoryStore::new();
        let session = store.open_session(UserId::new(3)).await.unwrap();
        let action = LastAction {
            event: "order_message".into(),
            chat_id: 3,
            message_id: 77,
        };

        store.record_last_action(session, action.clone()).await.unwrap();

        let stored = store.get_session(session).await.unwrap().unwrap();
        assert_eq!(stored.last_action, Some(action));

        let missing = store
            .record_last_action(
                SessionId::new(999),
                LastAction {
                    event: "x".into(),
                    chat_id: 1,
                    message_id: 1,
                },
            )
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }
}
