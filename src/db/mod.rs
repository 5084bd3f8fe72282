pub(crate) mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::email::EmailTransport;
use crate::storage::ArtifactStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state: the explicit composition root, constructed once at
/// startup and passed by reference (clone) into the router and each worker
/// pool. There is no process-wide mutable state beyond what lives here.
#[derive(Clone)]
pub struct AppState {
    /// Database pool shared by intake, workers, and the recovery sweep
    pub db: DbPool,
    /// Directory for locally rendered PDFs (`<receipts_dir>/<receipt_id>.pdf`)
    pub receipts_dir: PathBuf,
    /// Per-provider webhook HMAC secrets
    pub webhook_secrets: HashMap<String, String>,
    /// Whether the `mock` provider may bypass signature verification
    pub allow_mock_webhooks: bool,
    /// From-address for receipt emails
    pub email_from: String,
    /// Lifetime of signed artifact download URLs
    pub signed_url_ttl_secs: i64,
    /// Artifact store adapter (Cloudinary in production, mock in tests)
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Email transport adapter (Resend in production, mock in tests)
    pub mailer: Arc<dyn EmailTransport>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}

/// Whether a rusqlite error is a unique-constraint violation. Unique indexes
/// are the idempotency gates in this schema, so several callers need to turn
/// this specific failure into a duplicate-detection result.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
