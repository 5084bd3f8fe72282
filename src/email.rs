//! Receipt email delivery.
//!
//! The email worker talks to the provider through the `EmailTransport`
//! trait; `ResendMailer` is the production adapter. Template rendering is a
//! pure function over `ReceiptData`, and provider errors are classified by
//! keyword so permanently-broken recipients stop retrying.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::pdf::{format_amount, format_date, ReceiptData};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// A fully composed outbound email.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Send a message, returning the provider's message id.
    async fn send(&self, message: &EmailMessage) -> Result<String>;
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ResendAttachment>,
}

#[derive(Debug, Serialize)]
struct ResendAttachment {
    filename: String,
    /// Base64-encoded file content.
    content: String,
    content_type: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

/// Email transport using the Resend API.
#[derive(Clone)]
pub struct ResendMailer {
    api_key: String,
    http_client: Client,
}

impl ResendMailer {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl EmailTransport for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let request = ResendEmailRequest {
            from: &message.from,
            to: vec![&message.to],
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
            attachments: message
                .attachments
                .iter()
                .map(|a| ResendAttachment {
                    filename: a.filename.clone(),
                    content: BASE64.encode(&a.content),
                    content_type: a.content_type.clone(),
                })
                .collect(),
        };

        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmailTransport(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmailTransport(format!("{}: {}", status, body)));
        }

        let sent: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| AppError::EmailTransport(format!("unreadable response: {}", e)))?;
        Ok(sent.id)
    }
}

/// Why an email send failed, derived from the provider error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailErrorKind {
    /// The recipient address is permanently undeliverable; retrying is
    /// pointless.
    InvalidEmail,
    ServerError,
    RateLimit,
    AttachmentTooLarge,
    Unknown,
}

/// Classify a provider error message by code and keywords.
pub fn classify_email_error(message: &str) -> EmailErrorKind {
    let m = message.to_lowercase();

    if m.contains("does not exist")
        || m.contains("invalid email")
        || m.contains("invalid recipient")
        || m.contains("no such user")
        || m.contains("mailbox not found")
        || m.contains("recipient rejected")
    {
        return EmailErrorKind::InvalidEmail;
    }
    if m.contains("rate limit") || m.contains("too many requests") || m.contains("429") {
        return EmailErrorKind::RateLimit;
    }
    if m.contains("too large") || m.contains("413") || m.contains("exceeds maximum size") {
        return EmailErrorKind::AttachmentTooLarge;
    }
    if m.contains("500")
        || m.contains("502")
        || m.contains("503")
        || m.contains("504")
        || m.contains("timeout")
        || m.contains("timed out")
        || m.contains("connection")
        || m.contains("unavailable")
    {
        return EmailErrorKind::ServerError;
    }
    EmailErrorKind::Unknown
}

/// Rendered subject/body set for one receipt email.
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Compose the receipt email from the frozen order snapshot data.
pub fn render_receipt_email(data: &ReceiptData) -> EmailContent {
    let subject = format!("Your receipt from {} ({})", data.store_name, data.receipt_number);
    let date = format_date(data.paid_at);
    let total = format_amount(data.total_cents, &data.currency);

    let item_lines: String = data
        .items
        .iter()
        .map(|item| {
            format!(
                "  {} x{} - {}\n",
                item.name,
                item.quantity,
                format_amount(item.line_total_cents(), &data.currency)
            )
        })
        .collect();

    let text = format!(
        "Thank you for your purchase from {}!\n\nReceipt: {}\nOrder: {}\nPaid: {}\n\nItems:\n{}\nTotal: {}\n\nYour receipt is attached as a PDF. Keep it for your records.",
        data.store_name, data.receipt_number, data.order_number, date, item_lines, total
    );

    let item_rows: String = data
        .items
        .iter()
        .map(|item| {
            format!(
                r#"<tr><td style="padding: 4px 12px 4px 0;">{}</td><td style="padding: 4px 12px; text-align: center;">{}</td><td style="padding: 4px 0; text-align: right;">{}</td></tr>"#,
                item.name,
                item.quantity,
                format_amount(item.line_total_cents(), &data.currency)
            )
        })
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Thank you for your purchase from {store}!</h2>
<p style="color: #666;">Receipt <strong>{number}</strong> for order <strong>{order}</strong>, paid {date}.</p>
<table style="width: 100%; border-collapse: collapse; margin: 16px 0;">
<tr><th style="text-align: left; border-bottom: 1px solid #ddd; padding-bottom: 8px;">Item</th><th style="text-align: center; border-bottom: 1px solid #ddd; padding-bottom: 8px;">Qty</th><th style="text-align: right; border-bottom: 1px solid #ddd; padding-bottom: 8px;">Amount</th></tr>
{rows}
</table>
<div style="background: #f5f5f5; padding: 16px 20px; border-radius: 8px; text-align: right;">
<span style="font-size: 18px; font-weight: bold; color: #333;">Total: {total}</span>
</div>
<p style="color: #666; margin-top: 24px;">Your receipt is attached as a PDF. Keep it for your records.</p>
</body>
</html>"#,
        store = data.store_name,
        number = data.receipt_number,
        order = data.order_number,
        date = date,
        rows = item_rows,
        total = total,
    );

    EmailContent {
        subject,
        html,
        text,
    }
}
