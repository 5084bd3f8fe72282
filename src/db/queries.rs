use chrono::{Datelike, Utc};
use rusqlite::{params, Connection};

use crate::db::is_unique_violation;
use crate::error::{AppError, Result};
use crate::id;
use crate::models::*;

use super::from_row::{
    FromRow, CLOUD_STORAGE_LOG_COLS, EMAIL_LOG_COLS, JOB_LOG_COLS, ORDER_COLS,
    PAYMENT_TRANSACTION_COLS, RECEIPT_COLS, STORE_COLS, USER_COLS, WEBHOOK_LOG_COLS,
};

/// Webhook log rows expire after 3 days.
pub const WEBHOOK_LOG_TTL_SECS: i64 = 3 * 86_400;

/// Job log rows expire after 30 days.
pub const JOB_LOG_TTL_SECS: i64 = 30 * 86_400;

/// Bounded retries for receipt-number allocation under concurrent commits.
const RECEIPT_NUMBER_MAX_RETRIES: i64 = 5;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Users ============

pub fn create_user(conn: &Connection, email: &str, name: &str) -> Result<User> {
    let id = id::user();
    let now = now();
    let email = email.trim().to_lowercase();

    conn.execute(
        "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, &email, name, now],
    )?;

    Ok(User {
        id,
        email,
        name: name.to_string(),
        created_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    User::fetch_optional(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

// ============ Stores ============

pub fn create_store(conn: &Connection, name: &str) -> Result<Store> {
    let id = id::store();
    let now = now();

    conn.execute(
        "INSERT INTO stores (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![&id, name, now],
    )?;

    Ok(Store {
        id,
        name: name.to_string(),
        created_at: now,
    })
}

pub fn get_store_by_id(conn: &Connection, id: &str) -> Result<Option<Store>> {
    Store::fetch_optional(
        conn,
        &format!("SELECT {} FROM stores WHERE id = ?1", STORE_COLS),
        &[&id],
    )
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = id::order();
    let now = now();
    let items_json = serde_json::to_string(&input.items)?;

    conn.execute(
        "INSERT INTO orders (id, order_number, user_id, store_id, items, subtotal_cents, tax_cents, shipping_cents, discount_cents, total_cents, currency, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending_payment', ?12, ?12)",
        params![
            &id,
            &input.order_number,
            &input.user_id,
            &input.store_id,
            &items_json,
            input.subtotal_cents,
            input.tax_cents,
            input.shipping_cents,
            input.discount_cents,
            input.total_cents,
            &input.currency,
            now,
        ],
    )?;

    Ok(Order {
        id,
        order_number: input.order_number.clone(),
        user_id: input.user_id.clone(),
        store_id: input.store_id.clone(),
        items: input.items.clone(),
        subtotal_cents: input.subtotal_cents,
        tax_cents: input.tax_cents,
        shipping_cents: input.shipping_cents,
        discount_cents: input.discount_cents,
        total_cents: input.total_cents,
        currency: input.currency.clone(),
        status: OrderStatus::PendingPayment,
        paid_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    Order::fetch_optional(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

/// Flip an order to PAYMENT_FAILED. Only pending orders transition; a paid or
/// cancelled order is left alone (late failure events must not regress it).
pub fn set_order_payment_failed(conn: &Connection, id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE orders SET status = 'payment_failed', updated_at = ?1
         WHERE id = ?2 AND status = 'pending_payment'",
        params![now, id],
    )?;
    Ok(affected > 0)
}

pub fn cancel_order(conn: &Connection, id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE orders SET status = 'cancelled', cancelled_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'pending_payment'",
        params![now, id],
    )?;
    Ok(affected > 0)
}

// ============ Webhook logs ============

pub struct NewWebhookLog<'a> {
    pub webhook_id: &'a str,
    pub provider: &'a str,
    pub event_type: &'a str,
    pub raw_payload: &'a serde_json::Value,
    pub signature: Option<&'a str>,
    pub signature_valid: bool,
}

pub fn get_webhook_log_by_webhook_id(
    conn: &Connection,
    webhook_id: &str,
) -> Result<Option<WebhookLog>> {
    WebhookLog::fetch_optional(
        conn,
        &format!(
            "SELECT {} FROM webhook_logs WHERE webhook_id = ?1",
            WEBHOOK_LOG_COLS
        ),
        &[&webhook_id],
    )
}

/// Insert a webhook log row. The unique index on `webhook_id` is the dedup
/// gate: a concurrent duplicate delivery surfaces as a constraint violation
/// which the intake path maps to a `duplicate` response.
pub fn insert_webhook_log(conn: &Connection, input: &NewWebhookLog) -> Result<WebhookLog> {
    let id = id::webhook_log();
    let now = now();
    let expires_at = now + WEBHOOK_LOG_TTL_SECS;
    let payload_json = serde_json::to_string(input.raw_payload)?;

    conn.execute(
        "INSERT INTO webhook_logs (id, webhook_id, provider, event_type, raw_payload, signature, signature_valid, processed, processing_attempts, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?9)",
        params![
            &id,
            input.webhook_id,
            input.provider,
            input.event_type,
            &payload_json,
            input.signature,
            input.signature_valid as i32,
            expires_at,
            now,
        ],
    )?;

    Ok(WebhookLog {
        id,
        webhook_id: input.webhook_id.to_string(),
        provider: input.provider.to_string(),
        event_type: input.event_type.to_string(),
        raw_payload: input.raw_payload.clone(),
        signature: input.signature.map(|s| s.to_string()),
        signature_valid: input.signature_valid,
        processed: false,
        processed_at: None,
        outcome: None,
        error_message: None,
        processing_attempts: 0,
        order_id: None,
        transaction_id: None,
        expires_at,
        created_at: now,
    })
}

/// Record a delivery that was rejected before processing started
/// (bad signature, malformed payload). Write-once: outcome is final.
pub fn insert_rejected_webhook_log(
    conn: &Connection,
    input: &NewWebhookLog,
    outcome: WebhookOutcome,
    error: &str,
) -> Result<()> {
    let id = id::webhook_log();
    let now = now();
    let payload_json = serde_json::to_string(input.raw_payload)?;

    // A replayed delivery of an already-rejected webhook id is harmless;
    // keep the first row.
    conn.execute(
        "INSERT OR IGNORE INTO webhook_logs (id, webhook_id, provider, event_type, raw_payload, signature, signature_valid, processed, processed_at, outcome, error_message, processing_attempts, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, 0, ?11, ?8)",
        params![
            &id,
            input.webhook_id,
            input.provider,
            input.event_type,
            &payload_json,
            input.signature,
            input.signature_valid as i32,
            now,
            outcome.as_str(),
            error,
            now + WEBHOOK_LOG_TTL_SECS,
        ],
    )?;
    Ok(())
}

/// Close a webhook log after its processor finished.
pub fn close_webhook_log(
    conn: &Connection,
    id: &str,
    outcome: WebhookOutcome,
    order_id: Option<&str>,
    transaction_id: Option<&str>,
    error: Option<&str>,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE webhook_logs
         SET processed = 1, processed_at = ?1, outcome = ?2, order_id = ?3, transaction_id = ?4, error_message = ?5
         WHERE id = ?6",
        params![now, outcome.as_str(), order_id, transaction_id, error, id],
    )?;
    Ok(affected > 0)
}

/// Mark a webhook as failed mid-processing. The transport returns 5xx so the
/// provider retries; `processing_attempts` counts how often that happened.
pub fn mark_webhook_processing_failed(conn: &Connection, id: &str, error: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_logs
         SET outcome = 'processing_failed', error_message = ?1, processing_attempts = processing_attempts + 1
         WHERE id = ?2",
        params![error, id],
    )?;
    Ok(affected > 0)
}

pub fn purge_expired_webhook_logs(conn: &Connection) -> Result<usize> {
    let now = now();
    let deleted = conn.execute(
        "DELETE FROM webhook_logs WHERE expires_at < ?1",
        params![now],
    )?;
    Ok(deleted)
}

// ============ Payment transactions ============

pub fn get_payment_transaction_by_transaction_id(
    conn: &Connection,
    transaction_id: &str,
) -> Result<Option<PaymentTransaction>> {
    PaymentTransaction::fetch_optional(
        conn,
        &format!(
            "SELECT {} FROM payment_transactions WHERE transaction_id = ?1",
            PAYMENT_TRANSACTION_COLS
        ),
        &[&transaction_id],
    )
}

/// Record a provider-reported payment failure. Idempotent: a replayed failure
/// event with the same transaction id keeps the first row.
pub fn record_failed_transaction(
    conn: &Connection,
    provider: &str,
    note: &PaymentNotification,
    webhook_log_id: &str,
    order: Option<&Order>,
    failure_reason: &str,
) -> Result<()> {
    let id = id::payment();
    let now = now();

    conn.execute(
        "INSERT OR IGNORE INTO payment_transactions (id, transaction_id, order_id, user_id, store_id, provider, amount_cents, currency, status, webhook_log_id, failed_at, failure_reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'failed', ?9, ?10, ?11, ?10)",
        params![
            &id,
            &note.transaction_id,
            order.map(|o| o.id.as_str()),
            order.map(|o| o.user_id.as_str()),
            order.map(|o| o.store_id.as_str()),
            provider,
            note.amount,
            &note.currency,
            webhook_log_id,
            now,
            failure_reason,
        ],
    )?;
    Ok(())
}

// ============ Receipts ============

pub fn get_receipt_by_id(conn: &Connection, id: &str) -> Result<Option<Receipt>> {
    Receipt::fetch_optional(
        conn,
        &format!("SELECT {} FROM receipts WHERE id = ?1", RECEIPT_COLS),
        &[&id],
    )
}

pub fn get_receipt_by_transaction_id(
    conn: &Connection,
    transaction_id: &str,
) -> Result<Option<Receipt>> {
    Receipt::fetch_optional(
        conn,
        &format!(
            "SELECT {} FROM receipts WHERE transaction_id = ?1",
            RECEIPT_COLS
        ),
        &[&transaction_id],
    )
}

pub fn get_receipt_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<Receipt>> {
    Receipt::fetch_optional(
        conn,
        &format!("SELECT {} FROM receipts WHERE order_id = ?1", RECEIPT_COLS),
        &[&order_id],
    )
}

pub fn count_receipts_for_store_year(
    conn: &Connection,
    store_id: &str,
    year: i32,
) -> Result<i64> {
    let pattern = format!("RCP-{}-%", year);
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM receipts WHERE store_id = ?1 AND receipt_number LIKE ?2",
        params![store_id, &pattern],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// The payment-commit transaction (atomic promotion of an order to PAID).
///
/// Inside one serializable transaction:
/// 1. re-read the order and re-verify it is not already PAID (closes the
///    TOCTOU window against a concurrent webhook that won the race),
/// 2. insert the PaymentTransaction; the unique index on `transaction_id`
///    makes the loser of a concurrent commit fail here,
/// 3. flip the order to PAID,
/// 4. allocate a dense per-(store, year) receipt number, retrying on
///    collision up to a small bound,
/// 5. insert the PENDING receipt with the frozen order snapshot.
///
/// Returns `AppError::Conflict` when another committer already processed
/// this transaction id; callers map that to `already_processed`.
pub fn commit_paid_order(
    conn: &mut Connection,
    provider: &str,
    note: &PaymentNotification,
    webhook_log_id: &str,
) -> Result<Receipt> {
    let tx = conn.transaction()?;
    let now = now();

    let order = get_order_by_id(&tx, &note.order_id)?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", note.order_id)))?;
    if order.status == OrderStatus::Paid {
        return Err(AppError::Conflict("order already paid".to_string()));
    }

    let user = get_user_by_id(&tx, &order.user_id)?
        .ok_or_else(|| AppError::Internal(format!("order {} has no user", order.id)))?;

    let txn_id = id::payment();
    if let Err(e) = tx.execute(
        "INSERT INTO payment_transactions (id, transaction_id, order_id, user_id, store_id, provider, amount_cents, currency, status, webhook_log_id, succeeded_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'succeeded', ?9, ?10, ?10)",
        params![
            &txn_id,
            &note.transaction_id,
            &order.id,
            &order.user_id,
            &order.store_id,
            provider,
            note.amount,
            &note.currency,
            webhook_log_id,
            now,
        ],
    ) {
        if is_unique_violation(&e) {
            return Err(AppError::Conflict(
                "transaction already recorded".to_string(),
            ));
        }
        return Err(e.into());
    }

    tx.execute(
        "UPDATE orders SET status = 'paid', paid_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![now, &order.id],
    )?;

    // Snapshot the order as it was at commit time, with the PAID transition
    // applied, so downstream renders see the final state.
    let mut frozen = order.clone();
    frozen.status = OrderStatus::Paid;
    frozen.paid_at = Some(now);
    frozen.updated_at = now;
    let snapshot = serde_json::to_value(&frozen)?;
    let snapshot_json = serde_json::to_string(&snapshot)?;

    let year = Utc::now().year();
    let count = count_receipts_for_store_year(&tx, &order.store_id, year)?;

    let receipt_id = id::receipt();
    let mut receipt_number = None;
    for attempt in 0..RECEIPT_NUMBER_MAX_RETRIES {
        let candidate = format_receipt_number(year, count + 1 + attempt);
        match tx.execute(
            "INSERT INTO receipts (id, receipt_number, order_id, transaction_id, user_id, store_id, order_snapshot, amount_cents, currency, status, paid_at, email_recipient, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11, ?12, ?12)",
            params![
                &receipt_id,
                &candidate,
                &order.id,
                &note.transaction_id,
                &order.user_id,
                &order.store_id,
                &snapshot_json,
                note.amount,
                &note.currency,
                now,
                &user.email,
                now,
            ],
        ) {
            Ok(_) => {
                receipt_number = Some(candidate);
                break;
            }
            Err(e) if is_unique_violation(&e) => {
                let msg = e.to_string();
                if msg.contains("transaction_id") {
                    return Err(AppError::Conflict(
                        "receipt already exists for transaction".to_string(),
                    ));
                }
                // Receipt number collision with a concurrent commit; try the
                // next sequence value.
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let receipt_number = receipt_number.ok_or_else(|| {
        AppError::Conflict("could not allocate a receipt number".to_string())
    })?;

    tx.commit()?;

    Ok(Receipt {
        id: receipt_id,
        receipt_number,
        order_id: order.id,
        transaction_id: note.transaction_id.clone(),
        user_id: order.user_id,
        store_id: order.store_id,
        order_snapshot: snapshot,
        amount_cents: note.amount,
        currency: note.currency.clone(),
        status: ReceiptStatus::Pending,
        paid_at: now,
        pdf_generated: false,
        pdf_generated_at: None,
        pdf_local_path: None,
        pdf_size_bytes: None,
        pdf_generation_attempts: 0,
        cloudinary_uploaded: false,
        cloudinary_uploaded_at: None,
        cloudinary_public_id: None,
        cloudinary_secure_url: None,
        cloudinary_signed_url: None,
        cloudinary_signed_url_expires_at: None,
        cloudinary_upload_attempts: 0,
        email_sent: false,
        email_sent_at: None,
        email_send_attempts: 0,
        email_permanent_failure: false,
        email_last_error: None,
        email_recipient: user.email,
        created_at: now,
        updated_at: now,
    })
}

// ============ Receipt stage updates ============

/// Record a successful render in one update: flag, metadata, and the
/// attempt counter together.
pub fn mark_pdf_generated(
    conn: &Connection,
    receipt_id: &str,
    local_path: &str,
    size_bytes: i64,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET pdf_generated = 1, pdf_generated_at = ?1, pdf_local_path = ?2, pdf_size_bytes = ?3,
             pdf_generation_attempts = pdf_generation_attempts + 1, updated_at = ?1
         WHERE id = ?4",
        params![now, local_path, size_bytes, receipt_id],
    )?;
    Ok(affected > 0)
}

pub fn increment_pdf_attempts(conn: &Connection, receipt_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET pdf_generation_attempts = pdf_generation_attempts + 1, updated_at = ?1
         WHERE id = ?2",
        params![now, receipt_id],
    )?;
    Ok(affected > 0)
}

pub fn mark_uploaded(
    conn: &Connection,
    receipt_id: &str,
    public_id: &str,
    secure_url: &str,
    signed_url: Option<&str>,
    signed_url_expires_at: Option<i64>,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET cloudinary_uploaded = 1, cloudinary_uploaded_at = ?1, cloudinary_public_id = ?2,
             cloudinary_secure_url = ?3, cloudinary_signed_url = ?4,
             cloudinary_signed_url_expires_at = ?5,
             cloudinary_upload_attempts = cloudinary_upload_attempts + 1, updated_at = ?1
         WHERE id = ?6",
        params![
            now,
            public_id,
            secure_url,
            signed_url,
            signed_url_expires_at,
            receipt_id
        ],
    )?;
    Ok(affected > 0)
}

pub fn increment_upload_attempts(conn: &Connection, receipt_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET cloudinary_upload_attempts = cloudinary_upload_attempts + 1, updated_at = ?1
         WHERE id = ?2",
        params![now, receipt_id],
    )?;
    Ok(affected > 0)
}

pub fn mark_email_sent(conn: &Connection, receipt_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET email_sent = 1, email_sent_at = ?1, email_send_attempts = email_send_attempts + 1,
             updated_at = ?1
         WHERE id = ?2",
        params![now, receipt_id],
    )?;
    Ok(affected > 0)
}

pub fn record_email_failure(
    conn: &Connection,
    receipt_id: &str,
    error: &str,
    permanent: bool,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts
         SET email_send_attempts = email_send_attempts + 1, email_last_error = ?1,
             email_permanent_failure = CASE WHEN ?2 THEN 1 ELSE email_permanent_failure END,
             updated_at = ?3
         WHERE id = ?4",
        params![error, permanent as i32, now, receipt_id],
    )?;
    Ok(affected > 0)
}

/// Flip a receipt to COMPLETED when all three stage flags hold. Idempotent
/// and monotonic: PENDING -> COMPLETED only, callable from whichever of the
/// upload and email workers finishes last.
pub fn mark_completed_if_ready(conn: &Connection, receipt_id: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE receipts SET status = 'completed', updated_at = ?1
         WHERE id = ?2 AND pdf_generated = 1 AND cloudinary_uploaded = 1 AND email_sent = 1
           AND status = 'pending'",
        params![now, receipt_id],
    )?;
    Ok(affected > 0)
}

// ============ Recovery scans ============

/// Receipts whose render never completed and still have attempt budget.
pub fn find_stuck_render(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 0 AND pdf_generation_attempts < ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

pub fn find_stuck_upload(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 1 AND cloudinary_uploaded = 0
               AND cloudinary_upload_attempts < ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

pub fn find_stuck_email(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 1 AND email_sent = 0 AND email_permanent_failure = 0
               AND email_send_attempts < ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

/// Receipts past their render attempt cap and old enough to need an operator.
pub fn find_critical_render(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 0 AND pdf_generation_attempts >= ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

pub fn find_critical_upload(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 1 AND cloudinary_uploaded = 0
               AND cloudinary_upload_attempts >= ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

pub fn find_critical_email(
    conn: &Connection,
    created_before: i64,
    max_attempts: i64,
    limit: i64,
) -> Result<Vec<Receipt>> {
    Receipt::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM receipts
             WHERE pdf_generated = 1 AND email_sent = 0 AND email_permanent_failure = 0
               AND email_send_attempts >= ?1 AND created_at < ?2
             ORDER BY created_at ASC LIMIT ?3",
            RECEIPT_COLS
        ),
        &[&max_attempts, &created_before, &limit],
    )
}

// ============ Job logs ============

/// Open an audit row for a claimed job. Closed by `close_job_log` when the
/// execution settles.
pub fn insert_job_log_started(conn: &Connection, job: &Job) -> Result<String> {
    let id = id::job_log();
    let now = now();
    let data_json = serde_json::to_string(&job.data)?;

    conn.execute(
        "INSERT INTO job_logs (id, job_id, queue, job_type, receipt_id, status, attempts, max_attempts, data, is_recovery, queued_at, started_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &id,
            &job.job_id,
            &job.queue,
            &job.job_type,
            job.receipt_id(),
            job.attempts,
            job.max_attempts,
            &data_json,
            job.is_recovery as i32,
            job.queued_at,
            now,
            now + JOB_LOG_TTL_SECS,
        ],
    )?;
    Ok(id)
}

pub fn close_job_log(
    conn: &Connection,
    log_id: &str,
    result: Option<&serde_json::Value>,
    error: Option<&str>,
) -> Result<bool> {
    let now = now();
    let result_json = result.map(serde_json::to_string).transpose()?;
    let affected = if error.is_none() {
        conn.execute(
            "UPDATE job_logs SET status = 'completed', result = ?1, completed_at = ?2 WHERE id = ?3",
            params![result_json, now, log_id],
        )?
    } else {
        conn.execute(
            "UPDATE job_logs SET status = 'failed', error = ?1, failed_at = ?2 WHERE id = ?3",
            params![error, now, log_id],
        )?
    };
    Ok(affected > 0)
}

pub fn list_job_logs_for_receipt(conn: &Connection, receipt_id: &str) -> Result<Vec<JobLog>> {
    JobLog::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM job_logs WHERE receipt_id = ?1 ORDER BY started_at ASC",
            JOB_LOG_COLS
        ),
        &[&receipt_id],
    )
}

pub fn purge_expired_job_logs(conn: &Connection) -> Result<usize> {
    let now = now();
    let deleted = conn.execute("DELETE FROM job_logs WHERE expires_at < ?1", params![now])?;
    Ok(deleted)
}

// ============ Email logs ============

pub fn insert_email_log(
    conn: &Connection,
    receipt_id: &str,
    recipient: &str,
    subject: &str,
    status: DeliveryStatus,
    provider_message_id: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let id = id::email_log();
    let now = now();
    conn.execute(
        "INSERT INTO email_logs (id, receipt_id, recipient, subject, status, provider_message_id, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            receipt_id,
            recipient,
            subject,
            status.as_str(),
            provider_message_id,
            error,
            now
        ],
    )?;
    Ok(())
}

pub fn list_email_logs_for_receipt(conn: &Connection, receipt_id: &str) -> Result<Vec<EmailLog>> {
    EmailLog::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM email_logs WHERE receipt_id = ?1 ORDER BY created_at ASC",
            EMAIL_LOG_COLS
        ),
        &[&receipt_id],
    )
}

// ============ Cloud storage logs ============

pub fn insert_cloud_storage_log(
    conn: &Connection,
    receipt_id: &str,
    action: &str,
    status: DeliveryStatus,
    public_id: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    let id = id::cloud_storage_log();
    let now = now();
    conn.execute(
        "INSERT INTO cloud_storage_logs (id, receipt_id, action, status, public_id, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, receipt_id, action, status.as_str(), public_id, error, now],
    )?;
    Ok(())
}

pub fn list_cloud_storage_logs_for_receipt(
    conn: &Connection,
    receipt_id: &str,
) -> Result<Vec<CloudStorageLog>> {
    CloudStorageLog::fetch_all(
        conn,
        &format!(
            "SELECT {} FROM cloud_storage_logs WHERE receipt_id = ?1 ORDER BY created_at ASC",
            CLOUD_STORAGE_LOG_COLS
        ),
        &[&receipt_id],
    )
}
