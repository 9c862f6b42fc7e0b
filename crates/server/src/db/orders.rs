//! `PostgreSQL` order repository.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use dosirak_core::{
    DeliveryDetails, DeliveryMethod, Discount, Money, Order, OrderId, OrderItem, OrderStatus,
    PaymentGroup, PaymentGroupStatus, PaymentId, PaymentStatus, ProductId, StoreId, UserId,
};

use super::{OrderLease, OrderQuery, OrderStore, RepositoryError};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    uid: UserId,
    store_id: StoreId,
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    delivery_method: DeliveryMethod,
    delivery: Json<DeliveryDetails>,
    delivery_date: NaiveDate,
    delivery_time: Option<NaiveTime>,
    delivery_fee: Decimal,
    allow_additional_order: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentGroupRow {
    id: PaymentId,
    order_id: OrderId,
    amount: Decimal,
    carries_delivery_fee: bool,
    delivery_fee: Decimal,
    status: PaymentGroupStatus,
    points_used: Decimal,
    paid_at: DateTime<Utc>,
    is_additional: bool,
}

impl From<PaymentGroupRow> for PaymentGroup {
    fn from(row: PaymentGroupRow) -> Self {
        Self {
            id: row.id,
            amount: Money::new(row.amount),
            carries_delivery_fee: row.carries_delivery_fee,
            delivery_fee: Money::new(row.delivery_fee),
            status: row.status,
            points_used: Money::new(row.points_used),
            paid_at: row.paid_at,
            is_additional: row.is_additional,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    order_id: OrderId,
    payment_id: PaymentId,
    product_id: ProductId,
    name: String,
    quantity: i32,
    unit_price: Decimal,
    item_price: Decimal,
    options: Json<BTreeMap<String, String>>,
    discount: Option<Json<Discount>>,
    is_add_item: bool,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative quantity {} on order {}",
                row.quantity, row.order_id
            ))
        })?;
        Ok(Self {
            product_id: row.product_id,
            name: row.name,
            quantity,
            unit_price: Money::new(row.unit_price),
            item_price: Money::new(row.item_price),
            options: row.options.0,
            discount: row.discount.map(|d| d.0),
            is_add_item: row.is_add_item,
            payment_id: row.payment_id,
        })
    }
}

impl OrderRow {
    fn into_order(
        self,
        payment_info: Vec<PaymentGroup>,
        items: Vec<OrderItem>,
    ) -> Result<Order, RepositoryError> {
        let delivery = self.delivery.0;
        if delivery.method() != self.delivery_method {
            return Err(RepositoryError::DataCorruption(format!(
                "order {} stores method {} but {} details",
                self.id,
                self.delivery_method,
                delivery.method()
            )));
        }
        let order = Order {
            id: self.id,
            uid: self.uid,
            store_id: self.store_id,
            items,
            order_status: self.order_status,
            payment_status: self.payment_status,
            delivery,
            delivery_date: self.delivery_date,
            delivery_time: self.delivery_time,
            delivery_fee: Money::new(self.delivery_fee),
            created_at: self.created_at,
            payment_info,
            allow_additional_order: self.allow_additional_order,
        };
        order
            .ledger()
            .verify()
            .map_err(|e| RepositoryError::DataCorruption(format!("order {}: {e}", order.id)))?;
        Ok(order)
    }
}

// =============================================================================
// Repository
// =============================================================================

const ORDER_COLUMNS: &str = r"
    id, uid, store_id, order_status, payment_status, delivery_method, delivery,
    delivery_date, delivery_time, delivery_fee, allow_additional_order, created_at";

/// Order store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Attach groups and items to order rows, keeping row order.
async fn hydrate(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = rows.iter().map(|r| r.id.as_str().to_owned()).collect();

    let groups = sqlx::query_as::<_, PaymentGroupRow>(
        r"
        SELECT id, order_id, amount, carries_delivery_fee, delivery_fee, status,
               points_used, paid_at, is_additional
        FROM payment_groups
        WHERE order_id = ANY($1)
        ORDER BY order_id, position
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let items = sqlx::query_as::<_, OrderItemRow>(
        r"
        SELECT order_id, payment_id, product_id, name, quantity, unit_price, item_price,
               options, discount, is_add_item
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY order_id, position
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut groups_by_order: HashMap<OrderId, Vec<PaymentGroup>> = HashMap::new();
    for row in groups {
        groups_by_order
            .entry(row.order_id.clone())
            .or_default()
            .push(row.into());
    }
    let mut items_by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
    for row in items {
        let order_id = row.order_id.clone();
        items_by_order.entry(order_id).or_default().push(row.try_into()?);
    }

    rows.into_iter()
        .map(|row| {
            let groups = groups_by_order.remove(&row.id).unwrap_or_default();
            let items = items_by_order.remove(&row.id).unwrap_or_default();
            row.into_order(groups, items)
        })
        .collect()
}

async fn fetch_order(conn: &mut PgConnection, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(hydrate(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

/// Write engine-owned fields in one transaction on `conn`.
async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<(), RepositoryError> {
    let mut tx = conn.begin().await?;
    let updated = sqlx::query(
        r"
        UPDATE orders
        SET order_status = $2,
            payment_status = $3,
            delivery = $4,
            allow_additional_order = $5,
            updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(&order.id)
    .bind(order.order_status)
    .bind(order.payment_status)
    .bind(Json(&order.delivery))
    .bind(order.allow_additional_order)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }

    insert_children(&mut tx, order).await?;
    tx.commit().await?;
    Ok(())
}

/// A pooled connection holding the session advisory lock for one order.
///
/// Reads and writes under the lease run here. On drop the lock is released
/// in the background before the connection goes back to the pool; without a
/// runtime the connection is closed instead, which also drops the lock.
struct LeasedConnection {
    order_id: OrderId,
    conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            conn.close_on_drop();
            return;
        };
        let order_id = self.order_id.clone();
        runtime.spawn(async move {
            let unlocked = sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&order_id)
                .execute(&mut *conn)
                .await;
            if let Err(e) = unlocked {
                tracing::warn!(order_id = %order_id, error = %e, "advisory unlock failed, closing connection");
                conn.close_on_drop();
            }
        });
    }
}

fn leased_connection(lease: &OrderLease) -> Result<&LeasedConnection, RepositoryError> {
    lease.holder::<LeasedConnection>().ok_or_else(|| {
        RepositoryError::Conflict(format!(
            "lease for {} was not taken from this store",
            lease.order_id()
        ))
    })
}

/// Insert groups and items from `position` onwards; existing rows are left alone.
async fn insert_children(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    for (position, group) in order.payment_info.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| RepositoryError::Conflict("too many payment groups".to_string()))?;
        sqlx::query(
            r"
            INSERT INTO payment_groups
                (id, order_id, position, amount, carries_delivery_fee, delivery_fee,
                 status, points_used, paid_at, is_additional)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status
            WHERE payment_groups.order_id = EXCLUDED.order_id
            ",
        )
        .bind(&group.id)
        .bind(&order.id)
        .bind(position)
        .bind(group.amount.amount())
        .bind(group.carries_delivery_fee)
        .bind(group.delivery_fee.amount())
        .bind(group.status)
        .bind(group.points_used.amount())
        .bind(group.paid_at)
        .bind(group.is_additional)
        .execute(&mut **tx)
        .await?;
    }

    for (position, item) in order.items.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| RepositoryError::Conflict("too many items".to_string()))?;
        let quantity = i32::try_from(item.quantity)
            .map_err(|_| RepositoryError::Conflict("quantity out of range".to_string()))?;
        sqlx::query(
            r"
            INSERT INTO order_items
                (order_id, position, payment_id, product_id, name, quantity, unit_price,
                 item_price, options, discount, is_add_item)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id, position) DO NOTHING
            ",
        )
        .bind(&order.id)
        .bind(position)
        .bind(&item.payment_id)
        .bind(&item.product_id)
        .bind(&item.name)
        .bind(quantity)
        .bind(item.unit_price.amount())
        .bind(item.item_price.amount())
        .bind(Json(&item.options))
        .bind(item.discount.as_ref().map(Json))
        .bind(item.is_add_item)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(format!("{what} already exists"))
        }
        _ => RepositoryError::Database(e),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn lease(&self, id: &OrderId) -> Result<OrderLease, RepositoryError> {
        let leased = LeasedConnection {
            order_id: id.clone(),
            conn: Mutex::new(Some(self.pool.acquire().await?)),
        };
        // Built before locking so a cancelled wait still unlocks on drop.
        {
            let mut slot = leased.conn.lock().await;
            if let Some(conn) = slot.as_mut() {
                sqlx::query("SELECT pg_advisory_lock(hashtextextended($1, 0))")
                    .bind(id)
                    .execute(&mut **conn)
                    .await?;
            }
        }
        Ok(OrderLease::new(id.clone(), leased))
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    async fn get_leased(&self, lease: &OrderLease) -> Result<Option<Order>, RepositoryError> {
        let mut slot = leased_connection(lease)?.conn.lock().await;
        let conn = slot.as_mut().ok_or(RepositoryError::NotFound)?;
        fetch_order(conn, lease.order_id()).await
    }

    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE ($1::text IS NULL OR uid = $1)
              AND ($2::text IS NULL OR store_id = $2)
            ORDER BY created_at DESC
            "
        ))
        .bind(query.uid.as_ref())
        .bind(query.store_id.as_ref())
        .fetch_all(&mut *conn)
        .await?;

        hydrate(&mut conn, rows).await
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO orders
                (id, uid, store_id, order_status, payment_status, delivery_method, delivery,
                 delivery_date, delivery_time, delivery_fee, allow_additional_order, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(&order.id)
        .bind(&order.uid)
        .bind(&order.store_id)
        .bind(order.order_status)
        .bind(order.payment_status)
        .bind(order.delivery_method())
        .bind(Json(&order.delivery))
        .bind(order.delivery_date)
        .bind(order.delivery_time)
        .bind(order.delivery_fee.amount())
        .bind(order.allow_additional_order)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, &format!("order {}", order.id)))?;

        insert_children(&mut tx, order)
            .await
            .map_err(|e| match e {
                RepositoryError::Database(db) => map_unique_violation(db, "payment"),
                other => other,
            })?;
        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, lease: &OrderLease, order: &Order) -> Result<(), RepositoryError> {
        if lease.order_id() != &order.id {
            return Err(RepositoryError::Conflict(format!(
                "lease for {} cannot write order {}",
                lease.order_id(),
                order.id
            )));
        }

        let mut slot = leased_connection(lease)?.conn.lock().await;
        let conn = slot.as_mut().ok_or(RepositoryError::NotFound)?;
        write_order(conn, order).await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
