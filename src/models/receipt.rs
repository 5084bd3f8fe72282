use serde::{Deserialize, Serialize};

/// Durable record of a completed payment plus its fulfillment state.
///
/// Created PENDING inside the payment-commit transaction; flips to COMPLETED
/// only when all three stage flags (`pdf_generated`, `cloudinary_uploaded`,
/// `email_sent`) are true. `transaction_id` is the idempotency anchor: one
/// receipt per successful payment, enforced by a unique index.
///
/// `order_snapshot` is frozen at commit time and never mutated; the PDF and
/// email renders read only from it, so later edits to the order cannot
/// change what the customer was billed for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub receipt_number: String,
    pub order_id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub store_id: String,
    pub order_snapshot: serde_json::Value,
    pub amount_cents: i64,
    pub currency: String,
    pub status: ReceiptStatus,
    pub paid_at: i64,

    // Render stage
    pub pdf_generated: bool,
    pub pdf_generated_at: Option<i64>,
    pub pdf_local_path: Option<String>,
    pub pdf_size_bytes: Option<i64>,
    pub pdf_generation_attempts: i64,

    // Upload stage
    pub cloudinary_uploaded: bool,
    pub cloudinary_uploaded_at: Option<i64>,
    pub cloudinary_public_id: Option<String>,
    pub cloudinary_secure_url: Option<String>,
    pub cloudinary_signed_url: Option<String>,
    pub cloudinary_signed_url_expires_at: Option<i64>,
    pub cloudinary_upload_attempts: i64,

    // Email stage
    pub email_sent: bool,
    pub email_sent_at: Option<i64>,
    pub email_send_attempts: i64,
    pub email_permanent_failure: bool,
    pub email_last_error: Option<String>,
    pub email_recipient: String,

    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Completed,
    Failed,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format a receipt number: `RCP-YYYY-NNNNNN`, sequence dense per
/// (store, year).
pub fn format_receipt_number(year: i32, sequence: i64) -> String {
    format!("RCP-{}-{:06}", year, sequence)
}

/// Parse a receipt number back into `(year, sequence)`.
pub fn parse_receipt_number(s: &str) -> Option<(i32, i64)> {
    let rest = s.strip_prefix("RCP-")?;
    let (year, seq) = rest.split_once('-')?;
    if year.len() != 4 || seq.len() != 6 {
        return None;
    }
    Some((year.parse().ok()?, seq.parse().ok()?))
}
