use serde::{Deserialize, Serialize};

/// A provider payment event that reached the commit path, succeeded or not.
///
/// `transaction_id` is the provider's payment identifier and is unique: the
/// unique index on it is what turns a concurrent double-commit into a
/// detectable conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: String,
    pub transaction_id: String,
    /// Absent when a failure event referenced an order we never knew about;
    /// the row is still recorded so provider-side events stay auditable.
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub store_id: Option<String>,
    pub provider: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub webhook_log_id: Option<String>,
    pub succeeded_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
