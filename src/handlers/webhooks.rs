//! Webhook intake: the HTTP edge of the receipt pipeline.
//!
//! `POST /webhooks/payment/{provider}` verifies the signature over the raw
//! body, normalizes the payload, de-duplicates by webhook id, appends to the
//! audit log, and dispatches to the commit path. Validation outcomes
//! (bad signature, duplicate, amount mismatch) are typed 200 responses so
//! providers do not retry problems only they can fix; internal errors
//! surface as 500 so they do retry.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use crate::commit::{self, CommitOutcome};
use crate::db::{is_unique_violation, queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    PaymentDisposition, PaymentNotification, WebhookLog, WebhookOutcome, WebhookResponse,
};
use crate::providers;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payment/{provider}", post(receive_payment_webhook))
}

/// Axum handler: extract headers, delegate to the intake service.
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let webhook_id = extract_webhook_id(&headers);
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let response =
        process_payment_webhook(&state, &provider, &webhook_id, signature.as_deref(), &body)
            .await?;
    Ok(Json(response))
}

/// The provider's event id, or a synthesized-but-unique fallback when the
/// header is missing (the random suffix keeps retried deliveries from
/// colliding with each other).
fn extract_webhook_id(headers: &HeaderMap) -> String {
    headers
        .get("x-webhook-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            format!(
                "webhook_{}_{}",
                chrono::Utc::now().timestamp_millis(),
                Uuid::new_v4().as_simple()
            )
        })
}

/// Full intake algorithm for one delivery.
pub async fn process_payment_webhook(
    state: &AppState,
    provider: &str,
    webhook_id: &str,
    signature: Option<&str>,
    body: &[u8],
) -> Result<WebhookResponse> {
    let raw_payload: serde_json::Value =
        serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);

    // Signature gate. The mock provider bypasses verification only when the
    // deployment explicitly allows it (dev/test environments).
    let bypass_signature = provider == "mock" && state.allow_mock_webhooks;
    if !bypass_signature {
        let verified = match (state.webhook_secrets.get(provider), signature) {
            (Some(secret), Some(signature)) => {
                providers::verify_signature(secret, body, signature)
            }
            (None, _) => {
                tracing::warn!(provider, "webhook received for provider without a configured secret");
                false
            }
            (_, None) => false,
        };

        if !verified {
            let conn = state.db.get()?;
            queries::insert_rejected_webhook_log(
                &conn,
                &queries::NewWebhookLog {
                    webhook_id,
                    provider,
                    event_type: "unknown",
                    raw_payload: &raw_payload,
                    signature,
                    signature_valid: false,
                },
                WebhookOutcome::ValidationFailed,
                "signature verification failed",
            )?;
            return Ok(WebhookResponse::invalid_signature());
        }
    }

    // Normalize. A payload we cannot parse is the provider's problem, not a
    // retryable server error.
    let event = match providers::parse_event(provider, body) {
        Ok(event) => event,
        Err(e) => {
            let conn = state.db.get()?;
            queries::insert_rejected_webhook_log(
                &conn,
                &queries::NewWebhookLog {
                    webhook_id,
                    provider,
                    event_type: "unparseable",
                    raw_payload: &raw_payload,
                    signature,
                    signature_valid: true,
                },
                WebhookOutcome::ValidationFailed,
                &e.to_string(),
            )?;
            return Ok(WebhookResponse::validation_failed(
                "malformed webhook payload",
                None,
            ));
        }
    };
    let event_type = event.event_type();
    let note = event.normalize();

    // Dedup gate: first check, then insert; a concurrent duplicate loses on
    // the unique index and is also answered as a duplicate.
    let log = {
        let conn = state.db.get()?;
        if queries::get_webhook_log_by_webhook_id(&conn, webhook_id)?.is_some() {
            return Ok(WebhookResponse::duplicate());
        }
        match queries::insert_webhook_log(
            &conn,
            &queries::NewWebhookLog {
                webhook_id,
                provider,
                event_type: &event_type,
                raw_payload: &raw_payload,
                signature,
                // Bypassed mock deliveries never had a signature validated.
                signature_valid: !bypass_signature,
            },
        ) {
            Ok(log) => log,
            Err(AppError::Database(e)) if is_unique_violation(&e) => {
                return Ok(WebhookResponse::duplicate());
            }
            Err(e) => return Err(e),
        }
    };

    match dispatch(state, provider, &note, &log).await {
        Ok((outcome, response)) => {
            let conn = state.db.get()?;
            queries::close_webhook_log(
                &conn,
                &log.id,
                outcome,
                Some(note.order_id.as_str()),
                Some(note.transaction_id.as_str()),
                response.message.as_deref().filter(|_| !response.success),
            )?;
            Ok(response)
        }
        Err(e) => {
            // Internal failure: record it and surface 5xx so the provider
            // retries the delivery.
            let conn = state.db.get()?;
            queries::mark_webhook_processing_failed(&conn, &log.id, &e.to_string())?;
            tracing::error!(webhook_id, provider, error = %e, "webhook processing failed");
            Err(e)
        }
    }
}

async fn dispatch(
    state: &AppState,
    provider: &str,
    note: &PaymentNotification,
    log: &WebhookLog,
) -> Result<(WebhookOutcome, WebhookResponse)> {
    match note.disposition() {
        PaymentDisposition::Succeeded => {
            let outcome = commit::commit_payment(state, note, &log.id, provider).await?;
            Ok(match outcome {
                CommitOutcome::Committed { receipt } => (
                    WebhookOutcome::Success,
                    WebhookResponse::processed(serde_json::json!({
                        "receipt_id": receipt.id,
                        "receipt_number": receipt.receipt_number,
                        "order_id": receipt.order_id,
                    })),
                ),
                CommitOutcome::AlreadyProcessed { receipt_id } => (
                    WebhookOutcome::Success,
                    WebhookResponse::already_processed(receipt_id),
                ),
                CommitOutcome::AmountMismatch {
                    expected_cents,
                    received_cents,
                } => (
                    WebhookOutcome::ValidationFailed,
                    WebhookResponse::validation_failed(
                        format!(
                            "amount mismatch: order total is {} but payment was {}",
                            expected_cents, received_cents
                        ),
                        None,
                    ),
                ),
                CommitOutcome::OrderCancelled { order_id } => (
                    WebhookOutcome::ValidationFailed,
                    WebhookResponse::validation_failed(
                        format!("order {} is cancelled", order_id),
                        Some(serde_json::json!({ "requires_refund": true })),
                    ),
                ),
                CommitOutcome::OrderNotFound { order_id } => (
                    WebhookOutcome::ValidationFailed,
                    WebhookResponse::validation_failed(
                        format!("order {} not found", order_id),
                        None,
                    ),
                ),
            })
        }
        PaymentDisposition::Failed => {
            commit::record_failed_payment(state, note, &log.id, provider)?;
            // The event itself was handled successfully.
            Ok((WebhookOutcome::Success, WebhookResponse::payment_failed()))
        }
        PaymentDisposition::Other => Ok((WebhookOutcome::Ignored, WebhookResponse::ignored())),
    }
}
