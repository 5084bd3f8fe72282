use rusqlite::Connection;

/// Initialize the database schema.
///
/// WAL mode keeps webhook intake, worker pools, and the recovery sweep from
/// serializing on each other; synchronous=NORMAL is safe with WAL.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA journal_size_limit = 67108864;

        -- Buyers (recipient address + display name for receipt emails)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Stores (receipt numbers are dense per store and year)
        CREATE TABLE IF NOT EXISTS stores (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Orders
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL REFERENCES users(id),
            store_id TEXT NOT NULL REFERENCES stores(id),
            items TEXT NOT NULL,                  -- JSON array of line items
            subtotal_cents INTEGER NOT NULL,
            tax_cents INTEGER NOT NULL,
            shipping_cents INTEGER NOT NULL,
            discount_cents INTEGER NOT NULL,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending_payment', 'paid', 'payment_failed', 'cancelled')),
            paid_at INTEGER,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_store_status ON orders(store_id, status);

        -- Payment transactions (one row per provider payment event that
        -- reached the commit path; transaction_id unique per provider event)
        CREATE TABLE IF NOT EXISTS payment_transactions (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL UNIQUE,
            order_id TEXT REFERENCES orders(id),
            user_id TEXT,
            store_id TEXT,
            provider TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('succeeded', 'failed')),
            webhook_log_id TEXT,
            succeeded_at INTEGER,
            failed_at INTEGER,
            failure_reason TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_transactions_order ON payment_transactions(order_id);

        -- Receipts (transaction_id unique: one receipt per successful payment;
        -- receipt_number unique per store)
        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            receipt_number TEXT NOT NULL,
            order_id TEXT NOT NULL REFERENCES orders(id),
            transaction_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            store_id TEXT NOT NULL,
            order_snapshot TEXT NOT NULL,         -- frozen at commit, never mutated
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'completed', 'failed')),
            paid_at INTEGER NOT NULL,

            pdf_generated INTEGER NOT NULL DEFAULT 0,
            pdf_generated_at INTEGER,
            pdf_local_path TEXT,
            pdf_size_bytes INTEGER,
            pdf_generation_attempts INTEGER NOT NULL DEFAULT 0,

            cloudinary_uploaded INTEGER NOT NULL DEFAULT 0,
            cloudinary_uploaded_at INTEGER,
            cloudinary_public_id TEXT,
            cloudinary_secure_url TEXT,
            cloudinary_signed_url TEXT,
            cloudinary_signed_url_expires_at INTEGER,
            cloudinary_upload_attempts INTEGER NOT NULL DEFAULT 0,

            email_sent INTEGER NOT NULL DEFAULT 0,
            email_sent_at INTEGER,
            email_send_attempts INTEGER NOT NULL DEFAULT 0,
            email_permanent_failure INTEGER NOT NULL DEFAULT 0,
            email_last_error TEXT,
            email_recipient TEXT NOT NULL,

            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(store_id, receipt_number)
        );
        CREATE INDEX IF NOT EXISTS idx_receipts_order ON receipts(order_id);
        CREATE INDEX IF NOT EXISTS idx_receipts_render_pending ON receipts(pdf_generated, created_at);
        CREATE INDEX IF NOT EXISTS idx_receipts_upload_pending ON receipts(cloudinary_uploaded, created_at);
        CREATE INDEX IF NOT EXISTS idx_receipts_email_pending ON receipts(email_sent, created_at);

        -- Webhook intake audit log (webhook_id unique: the dedup gate)
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id TEXT PRIMARY KEY,
            webhook_id TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            event_type TEXT NOT NULL,
            raw_payload TEXT NOT NULL,
            signature TEXT,
            signature_valid INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER,
            outcome TEXT CHECK (outcome IS NULL OR outcome IN ('success', 'validation_failed', 'processing_failed', 'duplicate', 'ignored')),
            error_message TEXT,
            processing_attempts INTEGER NOT NULL DEFAULT 0,
            order_id TEXT,
            transaction_id TEXT,
            expires_at INTEGER NOT NULL,          -- 3 day TTL
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_expires ON webhook_logs(expires_at);

        -- Durable job broker (job_id unique: reserved dedup key)
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL UNIQUE,
            queue TEXT NOT NULL,
            job_type TEXT NOT NULL,
            data TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued' CHECK (status IN ('queued', 'running', 'completed', 'failed')),
            priority INTEGER NOT NULL DEFAULT 1,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            backoff_base_secs INTEGER NOT NULL,
            run_at INTEGER NOT NULL,
            is_recovery INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            queued_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(queue, status, run_at, priority);

        -- Per-execution worker audit log (30 day TTL)
        CREATE TABLE IF NOT EXISTS job_logs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            queue TEXT NOT NULL,
            job_type TEXT NOT NULL,
            receipt_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            attempts INTEGER NOT NULL,
            max_attempts INTEGER NOT NULL,
            data TEXT NOT NULL,
            result TEXT,
            error TEXT,
            is_recovery INTEGER NOT NULL DEFAULT 0,
            queued_at INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            failed_at INTEGER,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_job_logs_receipt ON job_logs(receipt_id);
        CREATE INDEX IF NOT EXISTS idx_job_logs_expires ON job_logs(expires_at);

        -- Per-attempt email provider call records
        CREATE TABLE IF NOT EXISTS email_logs (
            id TEXT PRIMARY KEY,
            receipt_id TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'failed')),
            provider_message_id TEXT,
            error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_email_logs_receipt ON email_logs(receipt_id);

        -- Per-attempt artifact store call records
        CREATE TABLE IF NOT EXISTS cloud_storage_logs (
            id TEXT PRIMARY KEY,
            receipt_id TEXT NOT NULL,
            action TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('success', 'failed')),
            public_id TEXT,
            error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cloud_storage_logs_receipt ON cloud_storage_logs(receipt_id);
        "#,
    )?;
    Ok(())
}
