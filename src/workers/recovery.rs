//! Recovery controller: the periodic sweep that closes holes left by
//! dropped enqueues, broker outages, and exhausted retry budgets.
//!
//! One pass scans up to 50 candidates per stage, re-enqueues each with
//! lower priority and `is_recovery` set, and reports receipts past their
//! attempt caps to the logger. It never touches a stage that already
//! completed, and it never mutates receipt state itself.

use serde::Serialize;

use crate::commit::{JOB_TYPE_EMAIL, JOB_TYPE_RENDER, JOB_TYPE_UPLOAD};
use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::Job;
use crate::queue::{self, Enqueue, QueueSpec, CLOUDINARY_UPLOAD, EMAIL_DELIVERY, RECEIPT_GENERATION};

/// How long a receipt may sit before its render is considered stuck.
const RENDER_STUCK_AFTER_SECS: i64 = 15 * 60;

/// How long a rendered receipt may sit before upload/email are considered
/// stuck.
const FULFILLMENT_STUCK_AFTER_SECS: i64 = 30 * 60;

/// Age threshold before a render past its attempt cap is escalated.
const RENDER_CRITICAL_AFTER_SECS: i64 = 60 * 60;

/// Age threshold before upload/email past their attempt caps are escalated.
const FULFILLMENT_CRITICAL_AFTER_SECS: i64 = 4 * 60 * 60;

/// Candidates scanned per stage per sweep.
const SCAN_LIMIT: i64 = 50;

/// Summary of one recovery sweep, recorded as the job result.
#[derive(Debug, Default, Serialize)]
pub struct SweepSummary {
    pub requeued_render: usize,
    pub requeued_upload: usize,
    pub requeued_email: usize,
    pub critical_failures: usize,
}

pub async fn run(state: &AppState, _job: &Job) -> Result<serde_json::Value> {
    let summary = run_sweep(state).await?;
    Ok(serde_json::to_value(summary)?)
}

/// One full recovery pass. Also callable inline via the `--recover-now`
/// operator command.
pub async fn run_sweep(state: &AppState) -> Result<SweepSummary> {
    let now = queries::now();
    let mut summary = SweepSummary::default();

    let conn = state.db.get()?;

    let stuck_render = queries::find_stuck_render(
        &conn,
        now - RENDER_STUCK_AFTER_SECS,
        RECEIPT_GENERATION.max_attempts,
        SCAN_LIMIT,
    )?;
    summary.requeued_render = requeue(
        &conn,
        &RECEIPT_GENERATION,
        JOB_TYPE_RENDER,
        &stuck_render,
        now,
    )?;

    let stuck_upload = queries::find_stuck_upload(
        &conn,
        now - FULFILLMENT_STUCK_AFTER_SECS,
        CLOUDINARY_UPLOAD.max_attempts,
        SCAN_LIMIT,
    )?;
    summary.requeued_upload =
        requeue(&conn, &CLOUDINARY_UPLOAD, JOB_TYPE_UPLOAD, &stuck_upload, now)?;

    let stuck_email = queries::find_stuck_email(
        &conn,
        now - FULFILLMENT_STUCK_AFTER_SECS,
        EMAIL_DELIVERY.max_attempts,
        SCAN_LIMIT,
    )?;
    summary.requeued_email = requeue(&conn, &EMAIL_DELIVERY, JOB_TYPE_EMAIL, &stuck_email, now)?;

    // Escalations: receipts past their attempt caps. Reported, not mutated;
    // they stay PENDING for the operator.
    let critical = [
        (
            "render",
            queries::find_critical_render(
                &conn,
                now - RENDER_CRITICAL_AFTER_SECS,
                RECEIPT_GENERATION.max_attempts,
                SCAN_LIMIT,
            )?,
        ),
        (
            "upload",
            queries::find_critical_upload(
                &conn,
                now - FULFILLMENT_CRITICAL_AFTER_SECS,
                CLOUDINARY_UPLOAD.max_attempts,
                SCAN_LIMIT,
            )?,
        ),
        (
            "email",
            queries::find_critical_email(
                &conn,
                now - FULFILLMENT_CRITICAL_AFTER_SECS,
                EMAIL_DELIVERY.max_attempts,
                SCAN_LIMIT,
            )?,
        ),
    ];

    for (stage, receipts) in critical {
        for receipt in &receipts {
            tracing::error!(
                receipt_id = %receipt.id,
                receipt_number = %receipt.receipt_number,
                stage,
                age_secs = now - receipt.created_at,
                "receipt requires operator attention: attempt budget exhausted"
            );
        }
        summary.critical_failures += receipts.len();
    }

    if summary.requeued_render + summary.requeued_upload + summary.requeued_email > 0
        || summary.critical_failures > 0
    {
        tracing::info!(
            requeued_render = summary.requeued_render,
            requeued_upload = summary.requeued_upload,
            requeued_email = summary.requeued_email,
            critical_failures = summary.critical_failures,
            "recovery sweep finished"
        );
    }

    Ok(summary)
}

fn requeue(
    conn: &rusqlite::Connection,
    spec: &QueueSpec,
    job_type: &str,
    receipts: &[crate::models::Receipt],
    sweep_at: i64,
) -> Result<usize> {
    let mut requeued = 0;
    for receipt in receipts {
        if queue::enqueue(
            conn,
            spec,
            &Enqueue::recovery_for_receipt(spec, job_type, &receipt.id, sweep_at),
        )? {
            tracing::warn!(
                receipt_id = %receipt.id,
                queue = spec.name,
                "stuck receipt re-enqueued by recovery sweep"
            );
            requeued += 1;
        }
    }
    Ok(requeued)
}
