//! Paystack webhook payload shapes.
//!
//! Mapping into the canonical record:
//! `data.object.id` -> `transaction_id`,
//! `data.object.metadata.order_id` -> `order_id`,
//! `type == "payment_intent.succeeded"` -> `succeeded` (anything else is a
//! failure), `data.object.amount` / `data.object.currency` pass through.

use serde::Deserialize;

use crate::models::PaymentNotification;

#[derive(Debug, Deserialize)]
pub struct PaystackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaystackData,
}

#[derive(Debug, Deserialize)]
pub struct PaystackData {
    pub object: PaystackObject,
}

#[derive(Debug, Deserialize)]
pub struct PaystackObject {
    pub id: String,
    /// Amount in cents.
    pub amount: i64,
    pub currency: String,
    pub metadata: PaystackMetadata,
}

#[derive(Debug, Deserialize)]
pub struct PaystackMetadata {
    pub order_id: String,
}

impl PaystackEvent {
    pub fn normalize(&self) -> PaymentNotification {
        let status = if self.event_type == "payment_intent.succeeded" {
            "succeeded"
        } else {
            "failed"
        };
        PaymentNotification {
            transaction_id: self.data.object.id.clone(),
            order_id: self.data.object.metadata.order_id.clone(),
            status: status.to_string(),
            amount: self.data.object.amount,
            currency: self.data.object.currency.clone(),
        }
    }
}
