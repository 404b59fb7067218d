use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    AddOn, AddOnId, Drink, DrinkId, DrinkSize, DrinkSizeId, DrinkType, DrinkTypeId, LastAction,
    LineItems, ManagerGuard, Money, NewOrder, OrderId, OrderRecord, OrderStatus, Result, Role,
    SessionId, SessionRecord, Size, SizeId, StatusChange, StoreError, User, UserId,
    store::{CatalogStore, OrderStore},
};

const ORDER_COLUMNS: &str = r#"
    id, customer_id, drink_size_id, status_id, drink_count, total_price,
    manager_id, manager_comment, decline_reason, session_id, is_active,
    version, created_at, updated_at
"#;

const DRINK_SELECT: &str = r#"
    SELECT d.id, d.type_id, t.name AS type_name, d.name, d.description,
           d.is_active, d.is_draft,
           (SELECT i.file_id FROM images i
             WHERE i.drink_id = d.id AND i.is_active
             ORDER BY i.id LIMIT 1) AS image_file_id
    FROM drinks d
    JOIN drink_types t ON t.id = d.type_id
"#;

const DRINK_SIZE_SELECT: &str = r#"
    SELECT ds.id, ds.drink_id, d.name AS drink_name, ds.size_id,
           s.name AS size_name, s.volume_ml, ds.price, ds.is_active
    FROM drink_sizes ds
    JOIN drinks d ON d.id = ds.drink_id
    JOIN sizes s ON s.id = ds.size_id
"#;

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn status_codes(statuses: impl IntoIterator<Item = OrderStatus>) -> Vec<i16> {
        statuses.into_iter().map(|s| s.code()).collect()
    }

    fn row_to_order(row: &PgRow) -> Result<OrderRecord> {
        let code: i16 = row.try_get("status_id")?;
        let status = OrderStatus::from_code(code)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown status code {code}")))?;
        let count: i32 = row.try_get("drink_count")?;
        let quantity = u32::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative drink count {count}")))?;

        Ok(OrderRecord {
            id: OrderId::new(row.try_get("id")?),
            customer_id: UserId::new(row.try_get("customer_id")?),
            drink_size_id: DrinkSizeId::new(row.try_get("drink_size_id")?),
            status,
            quantity,
            total_price: Money::new(row.try_get::<Decimal, _>("total_price")?),
            add_ons: Vec::new(),
            manager_id: row.try_get::<Option<i64>, _>("manager_id")?.map(UserId::new),
            manager_comment: row.try_get("manager_comment")?,
            decline_reason: row.try_get("decline_reason")?,
            session_id: row.try_get::<Option<i64>, _>("session_id")?.map(SessionId::new),
            is_active: row.try_get("is_active")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_drink(row: PgRow) -> Result<Drink> {
        Ok(Drink {
            id: DrinkId::new(row.try_get("id")?),
            type_id: DrinkTypeId::new(row.try_get("type_id")?),
            type_name: row.try_get("type_name")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image_file_id: row.try_get("image_file_id")?,
            is_active: row.try_get("is_active")?,
            is_draft: row.try_get("is_draft")?,
        })
    }

    fn row_to_drink_size(row: PgRow) -> Result<DrinkSize> {
        Ok(DrinkSize {
            id: DrinkSizeId::new(row.try_get("id")?),
            drink_id: DrinkId::new(row.try_get("drink_id")?),
            drink_name: row.try_get("drink_name")?,
            size_id: SizeId::new(row.try_get("size_id")?),
            size_name: row.try_get("size_name")?,
            volume_ml: row.try_get("volume_ml")?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
            is_active: row.try_get("is_active")?,
        })
    }

    fn row_to_add_on(row: &PgRow) -> Result<AddOn> {
        Ok(AddOn {
            id: AddOnId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
        })
    }

    fn row_to_size(row: PgRow) -> Result<Size> {
        Ok(Size {
            id: SizeId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            volume_ml: row.try_get("volume_ml")?,
        })
    }

    fn row_to_user(row: PgRow) -> Result<User> {
        let role: String = row.try_get("role")?;
        Ok(User {
            id: UserId::new(row.try_get("tg_user_id")?),
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            role: Role::parse(&role)
                .ok_or_else(|| StoreError::InvalidData(format!("unknown role {role}")))?,
        })
    }

    /// Attaches the selected add-ons to a batch of order rows.
    async fn with_add_ons(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<OrderRecord>> {
        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id.get()).collect();
        let add_on_rows = sqlx::query(
            r#"
            SELECT oa.order_id, a.id, a.name, a.price
            FROM order_adds oa
            JOIN adds a ON a.id = oa.add_id
            WHERE oa.order_id = ANY($1)
            ORDER BY oa.order_id, a.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut by_order: HashMap<i64, Vec<AddOn>> = HashMap::new();
        for row in &add_on_rows {
            let order_id: i64 = row.try_get("order_id")?;
            by_order
                .entry(order_id)
                .or_default()
                .push(Self::row_to_add_on(row)?);
        }
        for order in &mut orders {
            order.add_ons = by_order.remove(&order.id.get()).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn load_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.get())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Self::with_add_ons(conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn drink_types(&self) -> Result<Vec<DrinkType>> {
        let rows = sqlx::query("SELECT id, name FROM drink_types ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DrinkType {
                    id: DrinkTypeId::new(row.try_get("id")?),
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn drinks_by_type(&self, type_id: DrinkTypeId) -> Result<Vec<Drink>> {
        let rows = sqlx::query(&format!(
            "{DRINK_SELECT} WHERE d.type_id = $1 AND d.is_active AND NOT d.is_draft ORDER BY d.id"
        ))
        .bind(type_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_drink).collect()
    }

    async fn get_drink(&self, drink_id: DrinkId) -> Result<Option<Drink>> {
        let row = sqlx::query(&format!("{DRINK_SELECT} WHERE d.id = $1"))
            .bind(drink_id.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_drink).transpose()
    }

    async fn drink_sizes(&self, drink_id: DrinkId) -> Result<Vec<DrinkSize>> {
        let rows = sqlx::query(&format!(
            "{DRINK_SIZE_SELECT} WHERE ds.drink_id = $1 AND ds.is_active ORDER BY ds.price, ds.id"
        ))
        .bind(drink_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_drink_size).collect()
    }

    async fn get_drink_size(&self, drink_size_id: DrinkSizeId) -> Result<Option<DrinkSize>> {
        let row = sqlx::query(&format!("{DRINK_SIZE_SELECT} WHERE ds.id = $1"))
            .bind(drink_size_id.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_drink_size).transpose()
    }

    async fn find_drink_size(
        &self,
        drink_id: DrinkId,
        size_id: SizeId,
    ) -> Result<Option<DrinkSize>> {
        let row = sqlx::query(&format!(
            "{DRINK_SIZE_SELECT} WHERE ds.drink_id = $1 AND ds.size_id = $2 AND ds.is_active \
             ORDER BY ds.id LIMIT 1"
        ))
        .bind(drink_id.get())
        .bind(size_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_drink_size).transpose()
    }

    async fn get_add_on(&self, add_on_id: AddOnId) -> Result<Option<AddOn>> {
        let row = sqlx::query("SELECT id, name, price FROM adds WHERE id = $1")
            .bind(add_on_id.get())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_add_on).transpose()
    }

    async fn drink_add_ons(&self, drink_id: DrinkId) -> Result<Vec<AddOn>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.name, a.price
            FROM drink_adds da
            JOIN adds a ON a.id = da.add_id
            WHERE da.drink_id = $1 AND da.is_active
            ORDER BY a.id
            "#,
        )
        .bind(drink_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_add_on).collect()
    }

    async fn sizes(&self) -> Result<Vec<Size>> {
        let rows = sqlx::query("SELECT id, name, volume_ml FROM sizes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_size).collect()
    }

    async fn size_by_name(&self, normalized: &str) -> Result<Option<Size>> {
        let row = sqlx::query(
            "SELECT id, name, volume_ml FROM sizes WHERE UPPER(name) = $1 ORDER BY id LIMIT 1",
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_size).transpose()
    }

    async fn size_by_prefix(&self, normalized: &str) -> Result<Option<Size>> {
        let row = sqlx::query(
            r"SELECT id, name, volume_ml FROM sizes
              WHERE UPPER(name) LIKE $1 ESCAPE '\'
              ORDER BY id LIMIT 1",
        )
        .bind(like_prefix(normalized))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_size).transpose()
    }

    async fn publish_drink(&self, drink_id: DrinkId) -> Result<bool> {
        let result = sqlx::query("UPDATE drinks SET is_draft = FALSE WHERE id = $1")
            .bind(drink_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn retract_drink(&self, drink_id: DrinkId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE drinks SET is_draft = TRUE, is_active = FALSE WHERE id = $1")
                .bind(drink_id.get())
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE drink_sizes SET is_active = FALSE WHERE drink_id = $1")
            .bind(drink_id.get())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE drink_adds SET is_active = FALSE WHERE drink_id = $1")
            .bind(drink_id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord> {
        let count = i32::try_from(order.quantity)
            .map_err(|_| StoreError::InvalidData(format!("drink count {}", order.quantity)))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders
                (customer_id, drink_size_id, status_id, drink_count, total_price, session_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.customer_id.get())
        .bind(order.drink_size_id.get())
        .bind(OrderStatus::Draft.code())
        .bind(count)
        .bind(order.total_price.amount())
        .bind(order.session_id.map(|s| s.get()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_drink_size_id_fkey")
            {
                return StoreError::NotFound {
                    entity: "drink_size",
                    id: order.drink_size_id.get(),
                };
            }
            StoreError::Database(e)
        })?;

        Self::row_to_order(&row)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_order(&mut conn, order_id).await
    }

    async fn save_line_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        items: LineItems,
    ) -> Result<OrderRecord> {
        let count = i32::try_from(items.quantity)
            .map_err(|_| StoreError::InvalidData(format!("drink count {}", items.quantity)))?;
        let editable = Self::status_codes(
            OrderStatus::ALL
                .into_iter()
                .filter(OrderStatus::can_edit_items),
        );
        let add_on_ids: Vec<i64> = items.add_ons.iter().map(|a| a.get()).collect();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET drink_count = $3, total_price = $4, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2 AND is_active AND status_id = ANY($5)
            "#,
        )
        .bind(order_id.get())
        .bind(expected_version)
        .bind(count)
        .bind(items.total_price.amount())
        .bind(&editable)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(%order_id, expected_version, "Line item write lost the version race");
            return Err(StoreError::ConcurrencyConflict {
                order_id,
                expected: expected_version,
            });
        }

        sqlx::query("DELETE FROM order_adds WHERE order_id = $1 AND NOT (add_id = ANY($2))")
            .bind(order_id.get())
            .bind(&add_on_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO order_adds (order_id, add_id)
            SELECT $1, unnest($2::bigint[])
            ON CONFLICT (order_id, add_id) DO NOTHING
            "#,
        )
        .bind(order_id.get())
        .bind(&add_on_ids)
        .execute(&mut *tx)
        .await?;

        let order = Self::load_order(&mut *tx, order_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "order",
                id: order_id.get(),
            })?;

        tx.commit().await?;
        Ok(order)
    }

    async fn try_transition(&self, order_id: OrderId, change: StatusChange) -> Result<bool> {
        let mut sql = String::from(
            r#"
            UPDATE orders
            SET status_id = $3,
                manager_id = COALESCE($4, manager_id),
                manager_comment = COALESCE($5, manager_comment),
                decline_reason = COALESCE($6, decline_reason),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status_id = $2 AND is_active
            "#,
        );
        match change.guard {
            ManagerGuard::Any => {}
            ManagerGuard::Unclaimed => sql.push_str(" AND manager_id IS NULL"),
            ManagerGuard::ClaimedBy(_) => sql.push_str(" AND manager_id = $7"),
        }

        let mut query = sqlx::query(&sql)
            .bind(order_id.get())
            .bind(change.from.code())
            .bind(change.to.code())
            .bind(change.assign_manager.map(|m| m.get()))
            .bind(change.manager_comment)
            .bind(change.decline_reason);
        if let ManagerGuard::ClaimedBy(manager) = change.guard {
            query = query.bind(manager.get());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stale_orders(
        &self,
        statuses: &[OrderStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE is_active AND status_id = ANY($1) AND created_at < $2
            ORDER BY created_at, id
            "#
        ))
        .bind(Self::status_codes(statuses.iter().copied()))
        .bind(created_before)
        .fetch_all(&mut *conn)
        .await?;

        Self::with_add_ons(&mut conn, rows).await
    }

    async fn latest_order(
        &self,
        customer_id: UserId,
        excluded: &[OrderStatus],
    ) -> Result<Option<OrderRecord>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE customer_id = $1 AND is_active AND NOT (status_id = ANY($2))
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(customer_id.get())
        .bind(Self::status_codes(excluded.iter().copied()))
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Self::with_add_ons(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT tg_user_id, username, first_name, role FROM users WHERE tg_user_id = $1",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn ensure_user(&self, user: User) -> Result<User> {
        let row = sqlx::query(
            r#"
            WITH inserted AS (
                INSERT INTO users (tg_user_id, username, first_name, role)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tg_user_id) DO NOTHING
                RETURNING tg_user_id, username, first_name, role
            )
            SELECT tg_user_id, username, first_name, role FROM inserted
            UNION ALL
            SELECT tg_user_id, username, first_name, role FROM users WHERE tg_user_id = $1
            LIMIT 1
            "#,
        )
        .bind(user.id.get())
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_user(row)
    }

    async fn open_session(&self, user_id: UserId) -> Result<SessionId> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO sessions (tg_user_id) VALUES ($1) RETURNING id")
                .bind(user_id.get())
                .fetch_one(&self.pool)
                .await?;

        Ok(SessionId::new(id))
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query("SELECT id, tg_user_id, last_action FROM sessions WHERE id = $1")
            .bind(session_id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let last_action: Option<serde_json::Value> = row.try_get("last_action")?;
                Ok(Some(SessionRecord {
                    id: SessionId::new(row.try_get("id")?),
                    user_id: UserId::new(row.try_get("tg_user_id")?),
                    last_action: last_action.map(serde_json::from_value).transpose()?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn record_last_action(&self, session_id: SessionId, action: LastAction) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET last_action = $2 WHERE id = $1")
            .bind(session_id.get())
            .bind(serde_json::to_value(&action)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id.get(),
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A `LIKE ... ESCAPE '\'` pattern matching strings that start with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
