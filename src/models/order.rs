use serde::{Deserialize, Serialize};

/// A customer order awaiting (or past) payment.
///
/// The full struct serializes into `Receipt.order_snapshot` at commit time,
/// so every field here must round-trip through JSON unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub store_id: String,
    pub items: Vec<OrderItem>,

    // Amounts (cents)
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub currency: String,

    pub status: OrderStatus,
    pub paid_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single line item on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl OrderItem {
    pub fn line_total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

/// Data required to create a new order (always starts PENDING_PAYMENT).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub order_number: String,
    pub user_id: String,
    pub store_id: String,
    pub items: Vec<OrderItem>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

/// Order payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    PaymentFailed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::PaymentFailed => "payment_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "payment_failed" => Some(Self::PaymentFailed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered buyer. Only the fields the receipt pipeline needs survive
/// here: the recipient address and a display name for email templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: i64,
}

/// A store whose orders produce receipts. Receipt numbers are dense per
/// store and year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}
