//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use store::{
    AddOnId, CatalogStore, DrinkId, DrinkSizeId, LastAction, LineItems, ManagerGuard, Money,
    NewOrder, OrderStatus, OrderStore, OrderStoreExt, PostgresStore, Role, StatusChange,
    StoreError, User, UserId,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_initial_schema.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Menu rows inserted for each test.
struct Menu {
    drink: DrinkId,
    drink_size: DrinkSizeId,
    syrup: AddOnId,
    milk: AddOnId,
}

/// Get a fresh store with cleared tables and a one-drink menu.
async fn get_test_store() -> (PostgresStore, Menu) {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_adds, orders, sessions, users, drink_adds, adds, \
         drink_sizes, sizes, images, drinks, drink_types RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .unwrap();

    let type_id: i64 =
        sqlx::query_scalar("INSERT INTO drink_types (name) VALUES ('Coffee') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
    let drink: i64 = sqlx::query_scalar(
        "INSERT INTO drinks (type_id, name, is_draft) VALUES ($1, 'Latte', FALSE) RETURNING id",
    )
    .bind(type_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO images (drink_id, file_id) VALUES ($1, 'latte-photo')")
        .bind(drink)
        .execute(&pool)
        .await
        .unwrap();
    let size: i64 = sqlx::query_scalar(
        "INSERT INTO sizes (name, volume_ml) VALUES ('Medium', 350) RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let drink_size: i64 = sqlx::query_scalar(
        "INSERT INTO drink_sizes (drink_id, size_id, price) VALUES ($1, $2, 150.00) RETURNING id",
    )
    .bind(drink)
    .bind(size)
    .fetch_one(&pool)
    .await
    .unwrap();

    let mut add_ons = Vec::new();
    for (name, price) in [("Syrup", dec!(30)), ("Oat milk", dec!(50))] {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO adds (name, price) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(price)
                .fetch_one(&pool)
                .await
                .unwrap();
        sqlx::query("INSERT INTO drink_adds (drink_id, add_id) VALUES ($1, $2)")
            .bind(drink)
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
        add_ons.push(AddOnId::new(id));
    }

    let menu = Menu {
        drink: DrinkId::new(drink),
        drink_size: DrinkSizeId::new(drink_size),
        syrup: add_ons[0],
        milk: add_ons[1],
    };
    (PostgresStore::new(pool), menu)
}

async fn insert_draft(store: &PostgresStore, menu: &Menu, customer: i64) -> store::OrderRecord {
    store
        .insert_order(NewOrder {
            customer_id: UserId::new(customer),
            drink_size_id: menu.drink_size,
            quantity: 1,
            total_price: Money::new(dec!(150)),
            session_id: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn catalog_reads_join_names_and_image() {
    let (store, menu) = get_test_store().await;

    let drink = store.get_drink(menu.drink).await.unwrap().unwrap();
    assert_eq!(drink.type_name, "Coffee");
    assert_eq!(drink.image_file_id.as_deref(), Some("latte-photo"));

    let sizes = store.drink_sizes(menu.drink).await.unwrap();
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes[0].drink_name, "Latte");
    assert_eq!(sizes[0].size_name, "Medium");
    assert_eq!(sizes[0].price, Money::new(dec!(150)));

    let add_ons = store.drink_add_ons(menu.drink).await.unwrap();
    assert_eq!(add_ons.iter().map(|a| a.id).collect::<Vec<_>>(), vec![menu.syrup, menu.milk]);
}

#[tokio::test]
async fn size_lookup_by_name_and_prefix() {
    let (store, _) = get_test_store().await;

    assert!(store.size_by_name("M").await.unwrap().is_none());
    assert_eq!(store.size_by_name("MEDIUM").await.unwrap().unwrap().name, "Medium");
    assert_eq!(store.size_by_prefix("M").await.unwrap().unwrap().name, "Medium");
    assert!(store.size_by_prefix("%").await.unwrap().is_none());
    assert!(store.size_by_prefix("_").await.unwrap().is_none());
}

#[tokio::test]
async fn retract_drink_is_atomic() {
    let (store, menu) = get_test_store().await;

    assert!(store.retract_drink(menu.drink).await.unwrap());

    let drink = store.get_drink(menu.drink).await.unwrap().unwrap();
    assert!(drink.is_draft && !drink.is_active);
    assert!(store.drink_sizes(menu.drink).await.unwrap().is_empty());
    assert!(store.drink_add_ons(menu.drink).await.unwrap().is_empty());
}

#[tokio::test]
async fn insert_order_with_unknown_drink_size() {
    let (store, _) = get_test_store().await;

    let result = store
        .insert_order(NewOrder {
            customer_id: UserId::new(1),
            drink_size_id: DrinkSizeId::new(999_999),
            quantity: 1,
            total_price: Money::zero(),
            session_id: None,
        })
        .await;

    assert!(matches!(result, Err(StoreError::NotFound { entity: "drink_size", .. })));
}

#[tokio::test]
async fn save_line_items_is_version_checked() {
    let (store, menu) = get_test_store().await;
    let order = insert_draft(&store, &menu, 10).await;
    assert_eq!(order.status, OrderStatus::Draft);
    assert_eq!(order.version, 1);

    let saved = store
        .save_line_items(
            order.id,
            1,
            LineItems {
                quantity: 3,
                total_price: Money::new(dec!(480)),
                add_ons: vec![menu.syrup],
            },
        )
        .await
        .unwrap();
    assert_eq!(saved.version, 2);
    assert_eq!(saved.quantity, 3);
    assert_eq!(saved.total_price, Money::new(dec!(480)));
    assert_eq!(saved.add_ons.len(), 1);

    let stale = store
        .save_line_items(
            order.id,
            1,
            LineItems {
                quantity: 1,
                total_price: Money::new(dec!(150)),
                add_ons: vec![],
            },
        )
        .await;
    assert!(matches!(stale, Err(StoreError::ConcurrencyConflict { .. })));
}

#[tokio::test]
async fn save_line_items_never_duplicates_add_on_rows() {
    let (store, menu) = get_test_store().await;
    let order = insert_draft(&store, &menu, 10).await;

    let store = &store;
    let items = move |version| {
        store.save_line_items(
            order.id,
            version,
            LineItems {
                quantity: 1,
                total_price: Money::new(dec!(230)),
                add_ons: vec![menu.syrup, menu.milk],
            },
        )
    };
    items(1).await.unwrap();
    let saved = items(2).await.unwrap();
    assert_eq!(saved.add_ons.len(), 2);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_adds WHERE order_id = $1")
        .bind(order.id.get())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn try_transition_claims_exactly_once() {
    let (store, menu) = get_test_store().await;
    let order = insert_draft(&store, &menu, 10).await;
    assert!(
        store
            .try_transition(order.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Created))
            .await
            .unwrap()
    );
    assert!(
        store
            .try_transition(order.id, StatusChange::new(OrderStatus::Created, OrderStatus::Paid))
            .await
            .unwrap()
    );

    let claim = |manager: i64| {
        StatusChange::new(OrderStatus::Paid, OrderStatus::Processing)
            .guard(ManagerGuard::Unclaimed)
            .assign_manager(UserId::new(manager))
            .manager_comment("Время ожидания вашего заказа - 5 мин.")
    };
    let (a, b) = tokio::join!(
        store.try_transition(order.id, claim(1)),
        store.try_transition(order.id, claim(2)),
    );
    assert!(a.unwrap() ^ b.unwrap());

    let stored = store.require_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
    assert!(stored.manager_id.is_some());
    assert_eq!(stored.version, 4);

    let wrong_manager = UserId::new(if stored.manager_id == Some(UserId::new(1)) { 2 } else { 1 });
    let ready = StatusChange::new(OrderStatus::Processing, OrderStatus::Ready)
        .guard(ManagerGuard::ClaimedBy(wrong_manager));
    assert!(!store.try_transition(order.id, ready).await.unwrap());
}

#[tokio::test]
async fn line_items_locked_after_payment() {
    let (store, menu) = get_test_store().await;
    let order = insert_draft(&store, &menu, 10).await;
    store
        .try_transition(order.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Paid))
        .await
        .unwrap();

    let result = store
        .save_line_items(
            order.id,
            2,
            LineItems {
                quantity: 2,
                total_price: Money::new(dec!(300)),
                add_ons: vec![],
            },
        )
        .await;
    assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
}

#[tokio::test]
async fn decline_reason_is_persisted() {
    let (store, menu) = get_test_store().await;
    let order = insert_draft(&store, &menu, 10).await;
    store
        .try_transition(order.id, StatusChange::new(OrderStatus::Draft, OrderStatus::Created))
        .await
        .unwrap();

    let reason = "x".repeat(255);
    let declined = StatusChange::new(OrderStatus::Created, OrderStatus::Declined)
        .decline_reason(reason.clone());
    assert!(store.try_transition(order.id, declined).await.unwrap());

    let stored = store.require_order(order.id).await.unwrap();
    assert_eq!(stored.decline_reason, Some(reason));
}

#[tokio::test]
async fn stale_and_latest_order_queries() {
    let (store, menu) = get_test_store().await;
    let old = insert_draft(&store, &menu, 10).await;
    let fresh = insert_draft(&store, &menu, 10).await;
    for id in [old.id, fresh.id] {
        store
            .try_transition(id, StatusChange::new(OrderStatus::Draft, OrderStatus::Created))
            .await
            .unwrap();
    }
    sqlx::query("UPDATE orders SET created_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(old.id.get())
        .execute(store.pool())
        .await
        .unwrap();

    let cutoff = Utc::now() - Duration::minutes(30);
    let stale = store
        .stale_orders(&[OrderStatus::Created, OrderStatus::Paid], cutoff)
        .await
        .unwrap();
    assert_eq!(stale.iter().map(|o| o.id).collect::<Vec<_>>(), vec![old.id]);

    let latest = store
        .latest_open_order(UserId::new(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, fresh.id);
}

#[tokio::test]
async fn users_and_sessions() {
    let (store, _) = get_test_store().await;
    let id = UserId::new(42);

    let mut manager = User::new(id, Role::Manager);
    manager.first_name = Some("Anna".into());
    assert_eq!(store.ensure_user(manager.clone()).await.unwrap(), manager);
    let again = store.ensure_user(User::new(id, Role::Customer)).await.unwrap();
    assert_eq!(again.role, Role::Manager);

    let session = store.open_session(id).await.unwrap();
    let action = LastAction {
        event: "order_message".into(),
        chat_id: 42,
        message_id: 1001,
    };
    store.record_last_action(session, action.clone()).await.unwrap();
    let stored = store.get_session(session).await.unwrap().unwrap();
    assert_eq!(stored.last_action, Some(action));

    store.ping().await.unwrap();
}
