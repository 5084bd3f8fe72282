//! Email worker: send the receipt email with the PDF attached.
//!
//! Transport failures are classified by keyword; a permanently invalid
//! recipient sets `email_permanent_failure` and stops retrying (the job
//! settles as done), everything else rethrows so the broker retries with
//! backoff.

use crate::db::{queries, AppState};
use crate::email::{classify_email_error, render_receipt_email, EmailAttachment, EmailErrorKind, EmailMessage};
use crate::error::{AppError, Result};
use crate::models::{DeliveryStatus, Job};
use crate::pdf::ReceiptData;

pub async fn run(state: &AppState, job: &Job) -> Result<serde_json::Value> {
    let receipt_id = job
        .receipt_id()
        .ok_or_else(|| AppError::Internal("email job without receipt_id".to_string()))?
        .to_string();

    let (receipt, store_name) = {
        let conn = state.db.get()?;
        let receipt = queries::get_receipt_by_id(&conn, &receipt_id)?
            .ok_or_else(|| AppError::NotFound(format!("Receipt {}", receipt_id)))?;
        let store_name = queries::get_store_by_id(&conn, &receipt.store_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| receipt.store_id.clone());
        (receipt, store_name)
    };

    if receipt.email_sent {
        return Ok(serde_json::json!({ "skipped": "already_sent" }));
    }
    if receipt.email_permanent_failure {
        return Ok(serde_json::json!({ "skipped": "permanent_failure" }));
    }

    let local_path = match (receipt.pdf_generated, receipt.pdf_local_path.as_deref()) {
        (true, Some(path)) => path.to_string(),
        _ => {
            return Err(AppError::Validation(format!(
                "receipt {} has no generated PDF yet",
                receipt.id
            )));
        }
    };

    let data = ReceiptData::from_receipt(&receipt, &store_name)?;
    let content = render_receipt_email(&data);

    let send_result = compose_and_send(state, &receipt.email_recipient, &local_path, &data, &content).await;

    match send_result {
        Ok(message_id) => {
            let conn = state.db.get()?;
            queries::mark_email_sent(&conn, &receipt.id)?;
            queries::insert_email_log(
                &conn,
                &receipt.id,
                &receipt.email_recipient,
                &content.subject,
                DeliveryStatus::Success,
                Some(&message_id),
                None,
            )?;
            queries::mark_completed_if_ready(&conn, &receipt.id)?;

            tracing::info!(
                receipt_id = %receipt.id,
                recipient = %receipt.email_recipient,
                message_id = %message_id,
                "receipt email sent"
            );

            Ok(serde_json::json!({ "message_id": message_id }))
        }
        Err(e) => {
            let error = e.to_string();
            let kind = classify_email_error(&error);
            let permanent = kind == EmailErrorKind::InvalidEmail;

            let conn = state.db.get()?;
            queries::record_email_failure(&conn, &receipt.id, &error, permanent)?;
            queries::insert_email_log(
                &conn,
                &receipt.id,
                &receipt.email_recipient,
                &content.subject,
                DeliveryStatus::Failed,
                None,
                Some(&error),
            )?;

            if permanent {
                // Do not rethrow: retrying an invalid address cannot succeed.
                tracing::error!(
                    receipt_id = %receipt.id,
                    recipient = %receipt.email_recipient,
                    error = %error,
                    "recipient permanently undeliverable; email retries stopped"
                );
                return Ok(serde_json::json!({
                    "permanent_failure": true,
                    "error_kind": "invalid_email",
                }));
            }

            tracing::warn!(
                receipt_id = %receipt.id,
                error_kind = ?kind,
                error = %error,
                "receipt email send failed"
            );
            Err(e)
        }
    }
}

async fn compose_and_send(
    state: &AppState,
    recipient: &str,
    local_path: &str,
    data: &ReceiptData,
    content: &crate::email::EmailContent,
) -> Result<String> {
    let pdf_bytes = tokio::fs::read(local_path).await?;

    let message = EmailMessage {
        from: state.email_from.clone(),
        to: recipient.to_string(),
        subject: content.subject.clone(),
        html: content.html.clone(),
        text: content.text.clone(),
        attachments: vec![EmailAttachment {
            filename: format!("receipt-{}.pdf", data.receipt_number),
            content: pdf_bytes,
            content_type: "application/pdf".to_string(),
        }],
    };

    state.mailer.send(&message).await
}
