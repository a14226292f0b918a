use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use super::PaymentStore;
use crate::error::{PaymentError, PaymentResult};
use crate::models::{
    AuditEntry, FailedEvent, NewFailedEvent, NewPayment, NewPaymentAnomaly, NewPaymentRequest,
    Payment, PaymentAnomaly, PaymentAuditLog, PaymentRequest, PaymentRequestStatus,
    PaymentStatus, ANOMALY_STATUS_NEED_TO_CHECK, FAILED_EVENT_STATUS_NEEDS_REVIEW,
};

#[derive(Default)]
struct State {
    next_id: i64,
    /// keyed by order id
    payments: HashMap<i64, Payment>,
    /// keyed by id, which follows insertion order
    requests: BTreeMap<i64, PaymentRequest>,
    anomalies: Vec<PaymentAnomaly>,
    failed_events: Vec<FailedEvent>,
    audit_logs: Vec<PaymentAuditLog>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn request_mut(&mut self, id: i64) -> PaymentResult<&mut PaymentRequest> {
        self.requests
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment request {id}")))
    }
}

#[derive(Default)]
struct FailureSwitches {
    audit_writes: AtomicBool,
    failed_event_writes: AtomicBool,
    request_fetches: AtomicBool,
    requeue_writes: AtomicBool,
    /// payment ids whose `mark_expired` fails
    expire_writes: Mutex<Vec<i64>>,
}

fn switched_off() -> PaymentError {
    PaymentError::Database(sqlx::Error::PoolTimedOut)
}

/// Store kept in process memory.
///
/// Used with `BUS_TYPE=inmemory` style local runs and throughout the tests.
/// Same semantics as [`super::PgPaymentStore`], including the conditional
/// transitions; a single `RwLock` makes each call atomic.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<State>>,
    failures: Arc<FailureSwitches>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert_audit_log` fail until switched back.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.failures.audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `save_failed_event` fail until switched back.
    pub fn fail_failed_event_writes(&self, fail: bool) {
        self.failures.failed_event_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get_pending_payment_requests` fail until switched back.
    pub fn fail_request_fetches(&self, fail: bool) {
        self.failures.request_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make `update_pending_payment_request` fail until switched back.
    pub fn fail_requeue_writes(&self, fail: bool) {
        self.failures.requeue_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `mark_expired` fail for one payment id.
    pub fn fail_expire_for(&self, payment_id: i64) {
        if let Ok(mut ids) = self.failures.expire_writes.lock() {
            ids.push(payment_id);
        }
    }

    fn expire_fails_for(&self, payment_id: i64) -> bool {
        self.failures
            .expire_writes
            .lock()
            .map(|ids| ids.contains(&payment_id))
            .unwrap_or(false)
    }

    pub async fn payment(&self, order_id: i64) -> Option<Payment> {
        self.state.read().await.payments.get(&order_id).cloned()
    }

    pub async fn payment_requests(&self) -> Vec<PaymentRequest> {
        self.state.read().await.requests.values().cloned().collect()
    }

    pub async fn anomalies(&self) -> Vec<PaymentAnomaly> {
        self.state.read().await.anomalies.clone()
    }

    pub async fn failed_events(&self) -> Vec<FailedEvent> {
        self.state.read().await.failed_events.clone()
    }

    pub async fn audit_logs(&self) -> Vec<PaymentAuditLog> {
        self.state.read().await.audit_logs.clone()
    }

    /// Audit entries carrying one event tag.
    pub async fn audit_events(&self, event: &str) -> Vec<PaymentAuditLog> {
        self.audit_logs()
            .await
            .into_iter()
            .filter(|log| log.event == event)
            .collect()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn save_payment(&self, payment: NewPayment) -> PaymentResult<Payment> {
        let mut state = self.state.write().await;
        if state.payments.contains_key(&payment.order_id) {
            return Err(PaymentError::Conflict(format!(
                "payment for order {} already exists",
                payment.order_id
            )));
        }

        let now = Utc::now();
        let stored = Payment {
            id: state.next_id(),
            order_id: payment.order_id,
            user_id: payment.user_id,
            external_id: payment.external_id,
            amount: payment.amount,
            status: PaymentStatus::Pending,
            expired_time: payment.expired_time,
            create_time: now,
            update_time: now,
        };
        state.payments.insert(stored.order_id, stored.clone());
        Ok(stored)
    }

    async fn mark_paid(&self, order_id: i64) -> PaymentResult<bool> {
        let mut state = self.state.write().await;
        match state.payments.get_mut(&order_id) {
            Some(payment) if payment.status != PaymentStatus::Paid => {
                payment.status = PaymentStatus::Paid;
                payment.update_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_already_paid(&self, order_id: i64) -> PaymentResult<bool> {
        let state = self.state.read().await;
        state
            .payments
            .get(&order_id)
            .map(|p| p.status == PaymentStatus::Paid)
            .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))
    }

    async fn check_amount_by_order_id(&self, order_id: i64) -> PaymentResult<Decimal> {
        let state = self.state.read().await;
        state
            .payments
            .get(&order_id)
            .map(|p| p.amount)
            .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))
    }

    async fn get_payment_by_order_id(&self, order_id: i64) -> PaymentResult<Option<Payment>> {
        Ok(self.payment(order_id).await)
    }

    async fn get_expired_pending_payments(&self) -> PaymentResult<Vec<Payment>> {
        let now = Utc::now();
        let state = self.state.read().await;
        let mut expired: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.expired_time < now)
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.id);
        Ok(expired)
    }

    async fn mark_expired(&self, payment_id: i64) -> PaymentResult<bool> {
        if self.expire_fails_for(payment_id) {
            return Err(switched_off());
        }
        let mut state = self.state.write().await;
        match state.payments.values_mut().find(|p| p.id == payment_id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Expired;
                payment.update_time = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_pending_invoices(&self) -> PaymentResult<Vec<Payment>> {
        let cutoff = Utc::now() - Duration::hours(24);
        let state = self.state.read().await;
        let mut pending: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.create_time > cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.id);
        Ok(pending)
    }

    async fn save_payment_request(
        &self,
        request: NewPaymentRequest,
    ) -> PaymentResult<PaymentRequest> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let stored = PaymentRequest {
            id: state.next_id(),
            order_id: request.order_id,
            user_id: request.user_id,
            amount: request.amount,
            status: PaymentRequestStatus::Pending,
            retry_count: 0,
            notes: String::new(),
            create_time: now,
            update_time: now,
        };
        state.requests.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_pending_payment_requests(&self, limit: i64) -> PaymentResult<Vec<PaymentRequest>> {
        if self.failures.request_fetches.load(Ordering::SeqCst) {
            return Err(switched_off());
        }
        let state = self.state.read().await;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status == PaymentRequestStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_failed_payment_requests(
        &self,
        limit: i64,
        max_retry: i32,
    ) -> PaymentResult<Vec<PaymentRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status == PaymentRequestStatus::Failed && r.retry_count <= max_retry)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update_success_payment_request(&self, id: i64) -> PaymentResult<()> {
        let mut state = self.state.write().await;
        let request = state.request_mut(id)?;
        request.status = PaymentRequestStatus::Success;
        request.update_time = Utc::now();
        Ok(())
    }

    async fn update_failed_payment_request(&self, id: i64, notes: &str) -> PaymentResult<()> {
        let mut state = self.state.write().await;
        let request = state.request_mut(id)?;
        request.status = PaymentRequestStatus::Failed;
        request.notes = notes.to_string();
        request.retry_count += 1;
        request.update_time = Utc::now();
        Ok(())
    }

    async fn update_pending_payment_request(&self, id: i64) -> PaymentResult<()> {
        if self.failures.requeue_writes.load(Ordering::SeqCst) {
            return Err(switched_off());
        }
        let mut state = self.state.write().await;
        let request = state.request_mut(id)?;
        request.status = PaymentRequestStatus::Pending;
        request.update_time = Utc::now();
        Ok(())
    }

    async fn save_anomaly(&self, anomaly: NewPaymentAnomaly) -> PaymentResult<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let id = state.next_id();
        state.anomalies.push(PaymentAnomaly {
            id,
            order_id: anomaly.order_id,
            external_id: anomaly.external_id,
            anomaly_type: anomaly.anomaly_type,
            notes: anomaly.notes,
            status: ANOMALY_STATUS_NEED_TO_CHECK.to_string(),
            create_time: now,
            update_time: now,
        });
        Ok(())
    }

    async fn save_failed_event(&self, event: NewFailedEvent) -> PaymentResult<()> {
        if self.failures.failed_event_writes.load(Ordering::SeqCst) {
            return Err(switched_off());
        }
        let mut state = self.state.write().await;
        let now = Utc::now();
        let id = state.next_id();
        state.failed_events.push(FailedEvent {
            id,
            order_id: event.order_id,
            external_id: event.external_id,
            failed_type: event.failed_type,
            status: FAILED_EVENT_STATUS_NEEDS_REVIEW.to_string(),
            notes: event.notes,
            create_time: now,
            update_time: now,
        });
        Ok(())
    }

    async fn insert_audit_log(&self, entry: &AuditEntry) -> PaymentResult<()> {
        if self.failures.audit_writes.load(Ordering::SeqCst) {
            return Err(switched_off());
        }
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.audit_logs.push(PaymentAuditLog {
            id,
            order_id: entry.order_id,
            user_id: entry.user_id,
            payment_id: entry.payment_id,
            external_id: entry.external_id.clone(),
            event: entry.event.as_str().to_string(),
            actor: entry.actor.clone(),
            create_time: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{external_id_for, AuditEvent};

    fn new_payment(order_id: i64, amount: i64, expires_in: Duration) -> NewPayment {
        NewPayment {
            order_id,
            user_id: 1,
            external_id: external_id_for(order_id),
            amount: Decimal::new(amount, 0),
            expired_time: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn duplicate_order_is_conflict() {
        let store = InMemoryPaymentStore::new();
        store
            .save_payment(new_payment(1, 100, Duration::hours(1)))
            .await
            .unwrap();

        let err = store
            .save_payment(new_payment(1, 100, Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));
    }

    #[tokio::test]
    async fn mark_paid_transitions_once() {
        let store = InMemoryPaymentStore::new();
        store
            .save_payment(new_payment(5, 100, Duration::hours(1)))
            .await
            .unwrap();

        assert!(!store.is_already_paid(5).await.unwrap());
        assert!(store.mark_paid(5).await.unwrap());
        assert!(!store.mark_paid(5).await.unwrap());
        assert!(store.is_already_paid(5).await.unwrap());
        assert!(!store.mark_paid(404).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let store = InMemoryPaymentStore::new();
        assert!(matches!(
            store.is_already_paid(9).await,
            Err(PaymentError::NotFound(_))
        ));
        assert!(matches!(
            store.check_amount_by_order_id(9).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_expired_only_from_pending() {
        let store = InMemoryPaymentStore::new();
        let payment = store
            .save_payment(new_payment(2, 100, -Duration::minutes(1)))
            .await
            .unwrap();
        store.mark_paid(2).await.unwrap();

        assert!(store.get_expired_pending_payments().await.unwrap().is_empty());
        assert!(!store.mark_expired(payment.id).await.unwrap());
        assert_eq!(store.payment(2).await.unwrap().status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn failed_requests_respect_retry_ceiling_and_order() {
        let store = InMemoryPaymentStore::new();
        let mut ids = Vec::new();
        for order_id in 1..=7 {
            let request = store
                .save_payment_request(NewPaymentRequest {
                    order_id,
                    user_id: 1,
                    amount: Decimal::new(10, 0),
                })
                .await
                .unwrap();
            store
                .update_failed_payment_request(request.id, "gateway down")
                .await
                .unwrap();
            ids.push(request.id);
        }
        // push the first request past the ceiling
        for _ in 0..3 {
            store.update_failed_payment_request(ids[0], "again").await.unwrap();
        }

        let failed = store.get_failed_payment_requests(5, 3).await.unwrap();
        let got: Vec<i64> = failed.iter().map(|r| r.id).collect();
        assert_eq!(got, ids[1..6].to_vec());
    }

    #[tokio::test]
    async fn audit_write_failure_switch() {
        let store = InMemoryPaymentStore::new();
        let entry = AuditEntry::new(1, AuditEvent::MarkPaid, "payment_service");

        store.fail_audit_writes(true);
        assert!(store.insert_audit_log(&entry).await.is_err());
        store.fail_audit_writes(false);
        store.insert_audit_log(&entry).await.unwrap();

        assert_eq!(store.audit_events("MarkPaid").await.len(), 1);
    }

    #[tokio::test]
    async fn expire_failure_is_per_payment() {
        let store = InMemoryPaymentStore::new();
        let a = store
            .save_payment(new_payment(1, 100, -Duration::minutes(1)))
            .await
            .unwrap();
        let b = store
            .save_payment(new_payment(2, 100, -Duration::minutes(1)))
            .await
            .unwrap();

        store.fail_expire_for(a.id);
        assert!(matches!(
            store.mark_expired(a.id).await,
            Err(PaymentError::Database(_))
        ));
        assert!(store.mark_expired(b.id).await.unwrap());
    }
}
