//! PostgreSQL-backed order store and payment ledger.
//!
//! Both share the pool of the fact log and the tables created by the
//! workspace migrations (`orders`, `payments`).

use async_trait::async_trait;
use common::{OrderId, PaymentId, UserId};
use domain::{Money, Order, OrderItem, OrderStatus, Payment, PaymentStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::services::orders::OrderStore;
use crate::services::payments::PaymentLedger;

const ORDER_COLUMNS: &str = "id, user_id, items, total_cents, status, created_at";

const PAYMENT_COLUMNS: &str =
    "id, order_id, method, value_cents, accepted, status, created_at, decided_at";

fn decode_error(message: String) -> SagaError {
    SagaError::Database(sqlx::Error::Decode(message.into()))
}

/// Orders in the `orders` table.
///
/// Status writes lock the row, so a conditional transition and a concurrent
/// writer cannot both succeed.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let items: serde_json::Value = row.try_get("items")?;
        let items: Vec<OrderItem> = serde_json::from_value(items)?;
        let status: String = row.try_get("status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            items,
            total: Money::from_cents(row.try_get("total_cents")?),
            status: status.parse::<OrderStatus>().map_err(decode_error)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert(&self, order: Order) -> Result<Order> {
        let items = serde_json::to_value(&order.items)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, total_cents, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_i64())
        .bind(items)
        .bind(order.total.cents())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(SagaError::Conflict(format!(
                "Order {} already exists",
                order.id
            )));
        }
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, seq DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn transition(
        &self,
        id: OrderId,
        from: Option<OrderStatus>,
        to: OrderStatus,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let mut order = match sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => Self::row_to_order(row)?,
            None => return Err(SagaError::NotFound(format!("Order {id} not found"))),
        };

        if let Some(expected) = from {
            if order.status != expected {
                return Err(SagaError::Conflict(format!(
                    "Order {id} is {}, expected {expected}",
                    order.status
                )));
            }
        }
        order.transition(to)?;

        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(order.status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(order)
    }
}

/// Payment rows in the `payments` table.
///
/// The unique index on `order_id` makes `create_if_absent` a single
/// `INSERT .. ON CONFLICT DO NOTHING`, so concurrent consumers of the same
/// order-created fact end up with one row.
#[derive(Clone)]
pub struct PostgresPaymentLedger {
    pool: PgPool,
}

impl PostgresPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            method: row.try_get("method")?,
            value: Money::from_cents(row.try_get("value_cents")?),
            accepted: row.try_get("accepted")?,
            status: status.parse::<PaymentStatus>().map_err(decode_error)?,
            created_at: row.try_get("created_at")?,
            decided_at: row.try_get("decided_at")?,
        })
    }
}

#[async_trait]
impl PaymentLedger for PostgresPaymentLedger {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id))]
    async fn create_if_absent(&self, payment: Payment) -> Result<(Payment, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, method, value_cents, accepted, status, created_at, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.method.as_deref())
        .bind(payment.value.cents())
        .bind(payment.accepted)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.decided_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok((payment, true));
        }

        let existing = self.find_by_order(payment.order_id).await?.ok_or_else(|| {
            SagaError::Conflict(format!(
                "Payment for order {} vanished during insert",
                payment.order_id
            ))
        })?;
        Ok((existing, false))
    }

    #[tracing::instrument(skip(self, method))]
    async fn finalize(
        &self,
        order_id: OrderId,
        method: Option<String>,
        accepted: bool,
    ) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 FOR UPDATE");
        let mut payment = match sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => Self::row_to_payment(row)?,
            None => {
                return Err(SagaError::NotFound(format!(
                    "No payment registered for order {order_id}"
                )));
            }
        };
        payment.record_decision(method, accepted)?;

        sqlx::query(
            r#"
            UPDATE payments
            SET method = $2, accepted = $3, status = $4, decided_at = $5
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(payment.method.as_deref())
        .bind(payment.accepted)
        .bind(payment.status.as_str())
        .bind(payment.decided_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(payment)
    }
}
