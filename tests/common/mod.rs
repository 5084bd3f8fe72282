//! Test utilities and fixtures for receiptd integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;

// Re-export the main library crate
pub use receiptd::db::{init_db, queries, AppState, DbPool};
pub use receiptd::handlers::webhooks::process_payment_webhook;
pub use receiptd::models::*;
pub use receiptd::providers;
pub use receiptd::queue;
pub use receiptd::workers;

use receiptd::email::{EmailMessage, EmailTransport};
use receiptd::error::{AppError, Result};
use receiptd::queue::ALL_QUEUES;
use receiptd::storage::{ArtifactStore, UploadOptions, UploadedArtifact};

pub const TEST_SECRET: &str = "whsec_test_secret";

/// Create a pooled shared-cache in-memory database so that every pooled
/// connection sees the same data.
pub fn test_pool() -> DbPool {
    let name = format!(
        "file:receiptd_test_{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4().as_simple()
    );
    let manager = SqliteConnectionManager::file(name).with_flags(
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI,
    );
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

// ============ Mock adapters ============

/// Recording artifact store with a programmable number of leading failures.
#[derive(Default)]
pub struct MockArtifactStore {
    pub uploads: Mutex<Vec<UploadOptions>>,
    fail_remaining: AtomicUsize,
}

impl MockArtifactStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `times` uploads with a transient network error.
    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            uploads: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(times),
        })
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn should_fail(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn upload(&self, local_path: &Path, options: &UploadOptions) -> Result<UploadedArtifact> {
        if self.should_fail() {
            return Err(AppError::Internal(
                "simulated network error: connection reset".to_string(),
            ));
        }
        // The worker must only hand us files that exist.
        std::fs::metadata(local_path).map_err(AppError::from)?;
        self.uploads.lock().unwrap().push(options.clone());
        Ok(UploadedArtifact {
            public_id: options.public_id.clone(),
            url: format!("http://res.test/{}", options.public_id),
            secure_url: format!("https://res.test/{}", options.public_id),
        })
    }

    async fn signed_url(&self, public_id: &str, expires_at: i64) -> Result<String> {
        Ok(format!(
            "https://res.test/signed/{}?expires={}",
            public_id, expires_at
        ))
    }

    async fn delete(&self, _public_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Recording email transport with programmable failures.
#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    fail_remaining: AtomicUsize,
    fail_message: Mutex<Option<String>>,
}

impl MockMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `times` sends with the given provider error text.
    pub fn failing(times: usize, message: &str) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_remaining: AtomicUsize::new(times),
            fail_message: Mutex::new(Some(message.to_string())),
        })
    }

    /// Fail every send with the given provider error text.
    pub fn always_failing(message: &str) -> Arc<Self> {
        Self::failing(usize::MAX, message)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn should_fail(&self) -> bool {
        if self.fail_remaining.load(Ordering::SeqCst) == usize::MAX {
            return true; // always failing: never decrements
        }
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EmailTransport for MockMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        if self.should_fail() {
            let msg = self
                .fail_message
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "simulated send failure".to_string());
            return Err(AppError::EmailTransport(msg));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("msg_{}", sent.len()))
    }
}

// ============ Harness ============

/// One test's worth of application state plus handles to its mock adapters.
pub struct TestHarness {
    pub state: AppState,
    pub artifacts: Arc<MockArtifactStore>,
    pub mailer: Arc<MockMailer>,
}

pub fn test_state() -> TestHarness {
    test_state_with(MockArtifactStore::new(), MockMailer::new())
}

pub fn test_state_with(
    artifacts: Arc<MockArtifactStore>,
    mailer: Arc<MockMailer>,
) -> TestHarness {
    let receipts_dir: PathBuf = std::env::temp_dir().join(format!(
        "receiptd_test_{}",
        uuid::Uuid::new_v4().as_simple()
    ));

    let mut webhook_secrets = HashMap::new();
    webhook_secrets.insert("paystack".to_string(), TEST_SECRET.to_string());

    let state = AppState {
        db: test_pool(),
        receipts_dir,
        webhook_secrets,
        allow_mock_webhooks: true,
        email_from: "receipts@test.local".to_string(),
        signed_url_ttl_secs: 3600,
        artifacts: artifacts.clone(),
        mailer: mailer.clone(),
    };

    TestHarness {
        state,
        artifacts,
        mailer,
    }
}

// ============ Fixtures ============

pub struct Fixture {
    pub user: User,
    pub store: Store,
    pub order: Order,
}

/// Create a user, store, and pending order with a single line item whose
/// price equals the order total.
pub fn create_test_order(state: &AppState, total_cents: i64) -> Fixture {
    let conn = state.db.get().unwrap();
    let suffix = uuid::Uuid::new_v4().as_simple().to_string();

    let user = queries::create_user(
        &conn,
        &format!("buyer+{}@example.com", &suffix[..8]),
        "Test Buyer",
    )
    .unwrap();
    let store = queries::create_store(&conn, "Test Store").unwrap();
    let order = create_order_for(state, &user, &store, total_cents);

    Fixture { user, store, order }
}

pub fn create_order_for(state: &AppState, user: &User, store: &Store, total_cents: i64) -> Order {
    let conn = state.db.get().unwrap();
    let suffix = uuid::Uuid::new_v4().as_simple().to_string();
    queries::create_order(
        &conn,
        &CreateOrder {
            order_number: format!("ORD-{}", &suffix[..8]),
            user_id: user.id.clone(),
            store_id: store.id.clone(),
            items: vec![OrderItem {
                name: "Widget".to_string(),
                quantity: 1,
                unit_price_cents: total_cents,
            }],
            subtotal_cents: total_cents,
            tax_cents: 0,
            shipping_cents: 0,
            discount_cents: 0,
            total_cents,
            currency: "usd".to_string(),
        },
    )
    .unwrap()
}

// ============ Webhook helpers ============

/// Canonical mock-provider payload.
pub fn mock_payload(order_id: &str, transaction_id: &str, status: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "transaction_id": transaction_id,
        "order_id": order_id,
        "status": status,
        "amount": amount,
        "currency": "usd",
    }))
    .unwrap()
}

/// Paystack-shaped payload.
pub fn paystack_payload(
    order_id: &str,
    transaction_id: &str,
    event_type: &str,
    amount: i64,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": event_type,
        "data": {
            "object": {
                "id": transaction_id,
                "amount": amount,
                "currency": "usd",
                "metadata": { "order_id": order_id }
            }
        }
    }))
    .unwrap()
}

/// Deliver a mock-provider webhook (signature bypass).
pub async fn deliver_mock(state: &AppState, webhook_id: &str, body: &[u8]) -> WebhookResponse {
    process_payment_webhook(state, "mock", webhook_id, None, body)
        .await
        .expect("webhook intake should not error internally")
}

/// Deliver a paystack webhook signed with the given secret.
pub async fn deliver_paystack(
    state: &AppState,
    webhook_id: &str,
    body: &[u8],
    secret: &str,
) -> WebhookResponse {
    let signature = providers::sign_payload(secret, body);
    process_payment_webhook(state, "paystack", webhook_id, Some(&signature), body)
        .await
        .expect("webhook intake should not error internally")
}

// ============ Queue helpers ============

/// Make all queued jobs immediately claimable, collapsing retry backoff.
pub fn promote_delayed(state: &AppState) {
    let conn = state.db.get().unwrap();
    conn.execute("UPDATE jobs SET run_at = 0 WHERE status = 'queued'", [])
        .unwrap();
}

/// Synchronously drain every queue, collapsing backoff between rounds, until
/// no worker has anything left to do. Bounded so a permanently failing stage
/// terminates once its attempt budget is spent.
pub async fn drain_pipeline(state: &AppState) {
    for _ in 0..50 {
        promote_delayed(state);
        let mut ran = false;
        for spec in ALL_QUEUES {
            while workers::run_one(state, spec).await.unwrap().is_some() {
                ran = true;
                promote_delayed(state);
            }
        }
        if !ran {
            return;
        }
    }
    panic!("pipeline did not settle within 50 drain rounds");
}

// ============ Assertion helpers ============

pub fn get_receipt_for_order(state: &AppState, order_id: &str) -> Receipt {
    let conn = state.db.get().unwrap();
    queries::get_receipt_by_order_id(&conn, order_id)
        .unwrap()
        .expect("receipt should exist for order")
}

pub fn get_order(state: &AppState, order_id: &str) -> Order {
    let conn = state.db.get().unwrap();
    queries::get_order_by_id(&conn, order_id).unwrap().unwrap()
}

pub fn get_webhook_log(state: &AppState, webhook_id: &str) -> WebhookLog {
    let conn = state.db.get().unwrap();
    queries::get_webhook_log_by_webhook_id(&conn, webhook_id)
        .unwrap()
        .expect("webhook log should exist")
}

/// Age a receipt so recovery thresholds treat it as stuck.
pub fn backdate_receipt(state: &AppState, receipt_id: &str, secs: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE receipts SET created_at = created_at - ?1 WHERE id = ?2",
        rusqlite::params![secs, receipt_id],
    )
    .unwrap();
}

/// Drop all broker state, simulating a queue outage after commit.
pub fn wipe_queue(state: &AppState) {
    let conn = state.db.get().unwrap();
    conn.execute("DELETE FROM jobs", []).unwrap();
}
