//! Payment commit: the atomic promotion of an order to PAID.
//!
//! Validation runs outside the transaction (read-only); the actual
//! promotion is the single serializable transaction in
//! `queries::commit_paid_order`. Afterwards the first pipeline job is
//! enqueued fire-and-forget: the commit is durable, so a lost enqueue is
//! closed by the recovery sweep.

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{OrderStatus, PaymentNotification, Receipt};
use crate::queue::{self, Enqueue, RECEIPT_GENERATION};

pub const JOB_TYPE_RENDER: &str = "generate-receipt-pdf";
pub const JOB_TYPE_UPLOAD: &str = "upload-receipt-pdf";
pub const JOB_TYPE_EMAIL: &str = "send-receipt-email";
pub const JOB_TYPE_RECOVERY: &str = "recovery-scan";

/// What the commit path decided about a successful-payment notification.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Order promoted to PAID, receipt created, render job enqueued.
    Committed { receipt: Receipt },
    /// Another webhook already won this payment; nothing was re-enqueued.
    AlreadyProcessed { receipt_id: Option<String> },
    /// The notification amount does not match the order total. Security
    /// failure: the order is left untouched.
    AmountMismatch { expected_cents: i64, received_cents: i64 },
    /// Payment arrived for a cancelled order; the money needs to go back.
    OrderCancelled { order_id: String },
    OrderNotFound { order_id: String },
}

pub async fn commit_payment(
    state: &AppState,
    note: &PaymentNotification,
    webhook_log_id: &str,
    provider: &str,
) -> Result<CommitOutcome> {
    // Read-only validation outside the transaction.
    {
        let conn = state.db.get()?;
        let Some(order) = queries::get_order_by_id(&conn, &note.order_id)? else {
            return Ok(CommitOutcome::OrderNotFound {
                order_id: note.order_id.clone(),
            });
        };

        if order.status == OrderStatus::Paid {
            let receipt_id =
                queries::get_receipt_by_order_id(&conn, &order.id)?.map(|r| r.id);
            return Ok(CommitOutcome::AlreadyProcessed { receipt_id });
        }
        if order.status == OrderStatus::Cancelled {
            return Ok(CommitOutcome::OrderCancelled { order_id: order.id });
        }
        if order.total_cents != note.amount {
            return Ok(CommitOutcome::AmountMismatch {
                expected_cents: order.total_cents,
                received_cents: note.amount,
            });
        }

        // Idempotency anchor: one receipt per provider transaction.
        if let Some(receipt) = queries::get_receipt_by_transaction_id(&conn, &note.transaction_id)?
        {
            return Ok(CommitOutcome::AlreadyProcessed {
                receipt_id: Some(receipt.id),
            });
        }
    }

    let receipt = {
        let mut conn = state.db.get()?;
        match queries::commit_paid_order(&mut conn, provider, note, webhook_log_id) {
            Ok(receipt) => receipt,
            // A concurrent committer won the race inside the transaction.
            Err(AppError::Conflict(_)) => {
                let conn = state.db.get()?;
                let receipt_id =
                    queries::get_receipt_by_transaction_id(&conn, &note.transaction_id)?
                        .map(|r| r.id);
                return Ok(CommitOutcome::AlreadyProcessed { receipt_id });
            }
            Err(e) => return Err(e),
        }
    };

    // Fire-and-forget: the receipt row is durable, so if this enqueue is
    // lost the recovery sweep re-seeds the pipeline.
    if let Err(e) = enqueue_render(state, &receipt.id) {
        tracing::error!(
            receipt_id = %receipt.id,
            error = %e,
            "failed to enqueue receipt generation; recovery sweep will pick it up"
        );
    }

    tracing::info!(
        order_id = %receipt.order_id,
        receipt_id = %receipt.id,
        receipt_number = %receipt.receipt_number,
        transaction_id = %receipt.transaction_id,
        "payment committed"
    );

    Ok(CommitOutcome::Committed { receipt })
}

fn enqueue_render(state: &AppState, receipt_id: &str) -> Result<bool> {
    let conn = state.db.get()?;
    queue::enqueue(
        &conn,
        &RECEIPT_GENERATION,
        &Enqueue::for_receipt(&RECEIPT_GENERATION, JOB_TYPE_RENDER, receipt_id),
    )
}

/// Record a provider-reported payment failure: a FAILED transaction row plus
/// the order flipped to PAYMENT_FAILED (pending orders only).
pub fn record_failed_payment(
    state: &AppState,
    note: &PaymentNotification,
    webhook_log_id: &str,
    provider: &str,
) -> Result<()> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_id(&conn, &note.order_id)?;

    queries::record_failed_transaction(
        &conn,
        provider,
        note,
        webhook_log_id,
        order.as_ref(),
        "payment failed at provider",
    )?;

    if let Some(order) = order {
        if queries::set_order_payment_failed(&conn, &order.id)? {
            tracing::info!(order_id = %order.id, transaction_id = %note.transaction_id, "order marked payment_failed");
        }
    } else {
        tracing::warn!(
            order_id = %note.order_id,
            transaction_id = %note.transaction_id,
            "payment failure for unknown order; transaction recorded without order linkage"
        );
    }

    Ok(())
}
