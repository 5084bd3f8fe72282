//! Mapping between database rows and model structs.
//!
//! Each model implements `FromRow` once; the provided `fetch_optional` and
//! `fetch_all` methods then cover the two query shapes the crate needs. The
//! `*_COLS` constants pin the column order that every `from_row` body reads
//! by index, so SELECT lists and row mappings cannot drift apart.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::error::Result;
use crate::models::*;

/// Construction of a model from one database row, with query helpers built
/// on top.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;

    /// Run `sql` and map the first row, if any.
    fn fetch_optional(
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<Self>> {
        conn.query_row(sql, params, Self::from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Run `sql` and map every row.
    fn fetch_all(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

// Column lists, one per table, in the exact order the from_row bodies below
// read them.

pub const USER_COLS: &str = "id, email, name, created_at";

pub const STORE_COLS: &str = "id, name, created_at";

pub const ORDER_COLS: &str =
    "id, order_number, user_id, store_id, items, subtotal_cents, tax_cents, shipping_cents, discount_cents, total_cents, currency, status, paid_at, cancelled_at, created_at, updated_at";

pub const PAYMENT_TRANSACTION_COLS: &str =
    "id, transaction_id, order_id, user_id, store_id, provider, amount_cents, currency, status, webhook_log_id, succeeded_at, failed_at, failure_reason, created_at";

pub const RECEIPT_COLS: &str =
    "id, receipt_number, order_id, transaction_id, user_id, store_id, order_snapshot, amount_cents, currency, status, paid_at, pdf_generated, pdf_generated_at, pdf_local_path, pdf_size_bytes, pdf_generation_attempts, cloudinary_uploaded, cloudinary_uploaded_at, cloudinary_public_id, cloudinary_secure_url, cloudinary_signed_url, cloudinary_signed_url_expires_at, cloudinary_upload_attempts, email_sent, email_sent_at, email_send_attempts, email_permanent_failure, email_last_error, email_recipient, created_at, updated_at";

pub const WEBHOOK_LOG_COLS: &str =
    "id, webhook_id, provider, event_type, raw_payload, signature, signature_valid, processed, processed_at, outcome, error_message, processing_attempts, order_id, transaction_id, expires_at, created_at";

pub const JOB_COLS: &str =
    "id, job_id, queue, job_type, data, status, priority, attempts, max_attempts, backoff_base_secs, run_at, is_recovery, last_error, queued_at, started_at, finished_at";

pub const JOB_LOG_COLS: &str =
    "id, job_id, queue, job_type, receipt_id, status, attempts, max_attempts, data, result, error, is_recovery, queued_at, started_at, completed_at, failed_at, expires_at";

pub const EMAIL_LOG_COLS: &str =
    "id, receipt_id, recipient, subject, status, provider_message_id, error, created_at";

pub const CLOUD_STORAGE_LOG_COLS: &str =
    "id, receipt_id, action, status, public_id, error, created_at";

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Store {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Store {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let items_str: String = row.get(4)?;
        Ok(Order {
            id: row.get(0)?,
            order_number: row.get(1)?,
            user_id: row.get(2)?,
            store_id: row.get(3)?,
            items: serde_json::from_str(&items_str).unwrap_or_default(),
            subtotal_cents: row.get(5)?,
            tax_cents: row.get(6)?,
            shipping_cents: row.get(7)?,
            discount_cents: row.get(8)?,
            total_cents: row.get(9)?,
            currency: row.get(10)?,
            status: OrderStatus::from_str(&row.get::<_, String>(11)?).unwrap(),
            paid_at: row.get(12)?,
            cancelled_at: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl FromRow for PaymentTransaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentTransaction {
            id: row.get(0)?,
            transaction_id: row.get(1)?,
            order_id: row.get(2)?,
            user_id: row.get(3)?,
            store_id: row.get(4)?,
            provider: row.get(5)?,
            amount_cents: row.get(6)?,
            currency: row.get(7)?,
            status: TransactionStatus::from_str(&row.get::<_, String>(8)?).unwrap(),
            webhook_log_id: row.get(9)?,
            succeeded_at: row.get(10)?,
            failed_at: row.get(11)?,
            failure_reason: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

impl FromRow for Receipt {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let snapshot_str: String = row.get(6)?;
        Ok(Receipt {
            id: row.get(0)?,
            receipt_number: row.get(1)?,
            order_id: row.get(2)?,
            transaction_id: row.get(3)?,
            user_id: row.get(4)?,
            store_id: row.get(5)?,
            order_snapshot: serde_json::from_str(&snapshot_str).unwrap_or_default(),
            amount_cents: row.get(7)?,
            currency: row.get(8)?,
            status: ReceiptStatus::from_str(&row.get::<_, String>(9)?).unwrap(),
            paid_at: row.get(10)?,
            pdf_generated: row.get::<_, i32>(11)? != 0,
            pdf_generated_at: row.get(12)?,
            pdf_local_path: row.get(13)?,
            pdf_size_bytes: row.get(14)?,
            pdf_generation_attempts: row.get(15)?,
            cloudinary_uploaded: row.get::<_, i32>(16)? != 0,
            cloudinary_uploaded_at: row.get(17)?,
            cloudinary_public_id: row.get(18)?,
            cloudinary_secure_url: row.get(19)?,
            cloudinary_signed_url: row.get(20)?,
            cloudinary_signed_url_expires_at: row.get(21)?,
            cloudinary_upload_attempts: row.get(22)?,
            email_sent: row.get::<_, i32>(23)? != 0,
            email_sent_at: row.get(24)?,
            email_send_attempts: row.get(25)?,
            email_permanent_failure: row.get::<_, i32>(26)? != 0,
            email_last_error: row.get(27)?,
            email_recipient: row.get(28)?,
            created_at: row.get(29)?,
            updated_at: row.get(30)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let payload_str: String = row.get(4)?;
        let outcome: Option<String> = row.get(9)?;
        Ok(WebhookLog {
            id: row.get(0)?,
            webhook_id: row.get(1)?,
            provider: row.get(2)?,
            event_type: row.get(3)?,
            raw_payload: serde_json::from_str(&payload_str).unwrap_or_default(),
            signature: row.get(5)?,
            signature_valid: row.get::<_, i32>(6)? != 0,
            processed: row.get::<_, i32>(7)? != 0,
            processed_at: row.get(8)?,
            outcome: outcome.and_then(|s| WebhookOutcome::from_str(&s)),
            error_message: row.get(10)?,
            processing_attempts: row.get(11)?,
            order_id: row.get(12)?,
            transaction_id: row.get(13)?,
            expires_at: row.get(14)?,
            created_at: row.get(15)?,
        })
    }
}

impl FromRow for Job {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let data_str: String = row.get(4)?;
        Ok(Job {
            id: row.get(0)?,
            job_id: row.get(1)?,
            queue: row.get(2)?,
            job_type: row.get(3)?,
            data: serde_json::from_str(&data_str).unwrap_or_default(),
            status: JobStatus::from_str(&row.get::<_, String>(5)?).unwrap(),
            priority: row.get(6)?,
            attempts: row.get(7)?,
            max_attempts: row.get(8)?,
            backoff_base_secs: row.get(9)?,
            run_at: row.get(10)?,
            is_recovery: row.get::<_, i32>(11)? != 0,
            last_error: row.get(12)?,
            queued_at: row.get(13)?,
            started_at: row.get(14)?,
            finished_at: row.get(15)?,
        })
    }
}

impl FromRow for JobLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let data_str: String = row.get(8)?;
        let result_str: Option<String> = row.get(9)?;
        Ok(JobLog {
            id: row.get(0)?,
            job_id: row.get(1)?,
            queue: row.get(2)?,
            job_type: row.get(3)?,
            receipt_id: row.get(4)?,
            status: JobStatus::from_str(&row.get::<_, String>(5)?).unwrap(),
            attempts: row.get(6)?,
            max_attempts: row.get(7)?,
            data: serde_json::from_str(&data_str).unwrap_or_default(),
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get(10)?,
            is_recovery: row.get::<_, i32>(11)? != 0,
            queued_at: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
            failed_at: row.get(15)?,
            expires_at: row.get(16)?,
        })
    }
}

impl FromRow for EmailLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EmailLog {
            id: row.get(0)?,
            receipt_id: row.get(1)?,
            recipient: row.get(2)?,
            subject: row.get(3)?,
            status: DeliveryStatus::from_str(&row.get::<_, String>(4)?).unwrap(),
            provider_message_id: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for CloudStorageLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CloudStorageLog {
            id: row.get(0)?,
            receipt_id: row.get(1)?,
            action: row.get(2)?,
            status: DeliveryStatus::from_str(&row.get::<_, String>(3)?).unwrap(),
            public_id: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
