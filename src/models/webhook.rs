use serde::{Deserialize, Serialize};

/// Append-only audit record of every inbound webhook delivery.
///
/// `webhook_id` is the provider-supplied (or synthesized) event id and is
/// globally unique: the unique index on it is the primary idempotency gate
/// at the HTTP edge. Rows expire after three days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    pub webhook_id: String,
    pub provider: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    pub signature: Option<String>,
    pub signature_valid: bool,
    pub processed: bool,
    pub processed_at: Option<i64>,
    /// None until the delivery has been classified.
    pub outcome: Option<WebhookOutcome>,
    pub error_message: Option<String>,
    pub processing_attempts: i64,
    pub order_id: Option<String>,
    pub transaction_id: Option<String>,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Success,
    ValidationFailed,
    ProcessingFailed,
    Duplicate,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationFailed => "validation_failed",
            Self::ProcessingFailed => "processing_failed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "validation_failed" => Some(Self::ValidationFailed),
            "processing_failed" => Some(Self::ProcessingFailed),
            "duplicate" => Some(Self::Duplicate),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

impl std::fmt::Display for WebhookOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The provider-agnostic shape every webhook payload normalizes into.
///
/// This is also the canonical wire shape: the `mock` provider and unknown
/// providers are parsed with the identity mapping over these keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub transaction_id: String,
    pub order_id: String,
    /// "succeeded", "failed", or anything else (ignored).
    pub status: String,
    /// Amount in cents.
    pub amount: i64,
    pub currency: String,
}

/// How the intake path should dispatch a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDisposition {
    Succeeded,
    Failed,
    Other,
}

impl PaymentNotification {
    pub fn disposition(&self) -> PaymentDisposition {
        match self.status.as_str() {
            "succeeded" => PaymentDisposition::Succeeded,
            "failed" => PaymentDisposition::Failed,
            _ => PaymentDisposition::Other,
        }
    }
}

/// Typed result of webhook intake, always returned with HTTP 200 except for
/// internal errors (which surface as 500 so the provider retries).
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(rename = "type")]
    pub result_type: WebhookResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookResultType {
    Processed,
    Duplicate,
    ValidationFailed,
    InvalidSignature,
    AlreadyProcessed,
    PaymentFailed,
    Ignored,
}

impl WebhookResponse {
    pub fn processed(data: serde_json::Value) -> Self {
        Self {
            success: true,
            result_type: WebhookResultType::Processed,
            message: None,
            data: Some(data),
        }
    }

    pub fn duplicate() -> Self {
        Self {
            success: true,
            result_type: WebhookResultType::Duplicate,
            message: Some("Webhook already received".to_string()),
            data: None,
        }
    }

    pub fn invalid_signature() -> Self {
        Self {
            success: false,
            result_type: WebhookResultType::InvalidSignature,
            message: Some("Webhook signature verification failed".to_string()),
            data: None,
        }
    }

    pub fn validation_failed(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            result_type: WebhookResultType::ValidationFailed,
            message: Some(message.into()),
            data,
        }
    }

    pub fn already_processed(receipt_id: Option<String>) -> Self {
        Self {
            success: true,
            result_type: WebhookResultType::AlreadyProcessed,
            message: Some("Payment already receipted".to_string()),
            data: receipt_id.map(|id| serde_json::json!({ "receipt_id": id })),
        }
    }

    pub fn payment_failed() -> Self {
        Self {
            success: true,
            result_type: WebhookResultType::PaymentFailed,
            message: Some("Payment failure recorded".to_string()),
            data: None,
        }
    }

    pub fn ignored() -> Self {
        Self {
            success: true,
            result_type: WebhookResultType::Ignored,
            message: Some("Event type not handled".to_string()),
            data: None,
        }
    }
}
