use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::PaymentStore;
use crate::error::{PaymentError, PaymentResult};
use crate::models::{
    AuditEntry, NewFailedEvent, NewPayment, NewPaymentAnomaly, NewPaymentRequest, Payment,
    PaymentRequest, PaymentRequestStatus, PaymentStatus, ANOMALY_STATUS_NEED_TO_CHECK,
    FAILED_EVENT_STATUS_NEEDS_REVIEW,
};

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, external_id, amount, status, \
     expired_time, create_time, update_time";

const REQUEST_COLUMNS: &str = "id, order_id, user_id, amount, status, retry_count, notes, \
     create_time, update_time";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    order_id: i64,
    user_id: i64,
    external_id: String,
    amount: Decimal,
    status: String,
    expired_time: DateTime<Utc>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PaymentError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status).ok_or_else(|| {
            PaymentError::Database(sqlx::Error::Decode(
                format!("unknown payment status '{}'", row.status).into(),
            ))
        })?;
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            external_id: row.external_id,
            amount: row.amount,
            status,
            expired_time: row.expired_time,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRequestRow {
    id: i64,
    order_id: i64,
    user_id: i64,
    amount: Decimal,
    status: String,
    retry_count: i32,
    notes: String,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TryFrom<PaymentRequestRow> for PaymentRequest {
    type Error = PaymentError;

    fn try_from(row: PaymentRequestRow) -> Result<Self, Self::Error> {
        let status = PaymentRequestStatus::from_str(&row.status).ok_or_else(|| {
            PaymentError::Database(sqlx::Error::Decode(
                format!("unknown payment request status '{}'", row.status).into(),
            ))
        })?;
        Ok(PaymentRequest {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            amount: row.amount,
            status,
            retry_count: row.retry_count,
            notes: row.notes,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

fn payments_from(rows: Vec<PaymentRow>) -> PaymentResult<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

fn requests_from(rows: Vec<PaymentRequestRow>) -> PaymentResult<Vec<PaymentRequest>> {
    rows.into_iter().map(PaymentRequest::try_from).collect()
}

fn expect_row(rows_affected: u64, what: &str, id: i64) -> PaymentResult<()> {
    if rows_affected == 0 {
        return Err(PaymentError::NotFound(format!("{what} {id}")));
    }
    Ok(())
}

/// Postgres-backed store (see `db/migrations` for the schema).
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn save_payment(&self, payment: NewPayment) -> PaymentResult<Payment> {
        let query = format!(
            "INSERT INTO payments (order_id, user_id, external_id, amount, status, expired_time)
             VALUES ($1, $2, $3, $4, 'PENDING', $5)
             RETURNING {PAYMENT_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PaymentRow>(&query)
            .bind(payment.order_id)
            .bind(payment.user_id)
            .bind(&payment.external_id)
            .bind(payment.amount)
            .bind(payment.expired_time)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    PaymentError::Conflict(format!(
                        "payment for order {} already exists",
                        payment.order_id
                    ))
                }
                other => PaymentError::Database(other),
            })?;

        row.try_into()
    }

    async fn mark_paid(&self, order_id: i64) -> PaymentResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'PAID', update_time = NOW()
             WHERE order_id = $1 AND status <> 'PAID'",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_already_paid(&self, order_id: i64) -> PaymentResult<bool> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM payments WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| s == PaymentStatus::Paid.as_str())
            .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))
    }

    async fn check_amount_by_order_id(&self, order_id: i64) -> PaymentResult<Decimal> {
        let amount: Option<Decimal> =
            sqlx::query_scalar("SELECT amount FROM payments WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        amount.ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))
    }

    async fn get_payment_by_order_id(&self, order_id: i64) -> PaymentResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1");
        let row = sqlx::query_as::<_, PaymentRow>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn get_expired_pending_payments(&self) -> PaymentResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status = 'PENDING' AND expired_time < NOW()
             ORDER BY expired_time ASC"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        payments_from(rows)
    }

    async fn mark_expired(&self, payment_id: i64) -> PaymentResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'EXPIRED', update_time = NOW()
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_pending_invoices(&self) -> PaymentResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status = 'PENDING' AND create_time > NOW() - INTERVAL '24 hours'
             ORDER BY create_time ASC"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        payments_from(rows)
    }

    async fn save_payment_request(
        &self,
        request: NewPaymentRequest,
    ) -> PaymentResult<PaymentRequest> {
        let query = format!(
            "INSERT INTO payment_requests (order_id, user_id, amount, status)
             VALUES ($1, $2, $3, 'PENDING')
             RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PaymentRequestRow>(&query)
            .bind(request.order_id)
            .bind(request.user_id)
            .bind(request.amount)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get_pending_payment_requests(&self, limit: i64) -> PaymentResult<Vec<PaymentRequest>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE status = 'PENDING'
             ORDER BY create_time ASC, id ASC
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, PaymentRequestRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        requests_from(rows)
    }

    async fn get_failed_payment_requests(
        &self,
        limit: i64,
        max_retry: i32,
    ) -> PaymentResult<Vec<PaymentRequest>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE status = 'FAILED' AND retry_count <= $2
             ORDER BY create_time ASC, id ASC
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, PaymentRequestRow>(&query)
            .bind(limit)
            .bind(max_retry)
            .fetch_all(&self.pool)
            .await?;

        requests_from(rows)
    }

    async fn update_success_payment_request(&self, id: i64) -> PaymentResult<()> {
        let result = sqlx::query(
            "UPDATE payment_requests SET status = 'SUCCESS', update_time = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        expect_row(result.rows_affected(), "payment request", id)
    }

    async fn update_failed_payment_request(&self, id: i64, notes: &str) -> PaymentResult<()> {
        let result = sqlx::query(
            "UPDATE payment_requests
             SET status = 'FAILED', notes = $2, retry_count = retry_count + 1, update_time = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        expect_row(result.rows_affected(), "payment request", id)
    }

    async fn update_pending_payment_request(&self, id: i64) -> PaymentResult<()> {
        let result = sqlx::query(
            "UPDATE payment_requests SET status = 'PENDING', update_time = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        expect_row(result.rows_affected(), "payment request", id)
    }

    async fn save_anomaly(&self, anomaly: NewPaymentAnomaly) -> PaymentResult<()> {
        sqlx::query(
            "INSERT INTO payment_anomalies (order_id, external_id, anomaly_type, notes, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(anomaly.order_id)
        .bind(&anomaly.external_id)
        .bind(&anomaly.anomaly_type)
        .bind(&anomaly.notes)
        .bind(ANOMALY_STATUS_NEED_TO_CHECK)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_failed_event(&self, event: NewFailedEvent) -> PaymentResult<()> {
        sqlx::query(
            "INSERT INTO failed_events (order_id, external_id, failed_type, status, notes)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.order_id)
        .bind(&event.external_id)
        .bind(&event.failed_type)
        .bind(FAILED_EVENT_STATUS_NEEDS_REVIEW)
        .bind(&event.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_audit_log(&self, entry: &AuditEntry) -> PaymentResult<()> {
        sqlx::query(
            "INSERT INTO payment_audit_logs (order_id, user_id, payment_id, external_id, event, actor)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.order_id)
        .bind(entry.user_id)
        .bind(entry.payment_id)
        .bind(&entry.external_id)
        .bind(entry.event.as_str())
        .bind(&entry.actor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
