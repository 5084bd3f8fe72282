//! Render worker: turn a receipt's frozen order snapshot into a local PDF,
//! then seed the upload and email stages.
//!
//! Upload and email are parallel and mutually independent, but neither may
//! fire before `pdf_generated` is true; this worker is the only producer of
//! those jobs and only enqueues them after the database update.

use crate::commit::{JOB_TYPE_EMAIL, JOB_TYPE_UPLOAD};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::Job;
use crate::pdf::{self, ReceiptData};
use crate::queue::{self, Enqueue, CLOUDINARY_UPLOAD, EMAIL_DELIVERY};

pub async fn run(state: &AppState, job: &Job) -> Result<serde_json::Value> {
    let receipt_id = job
        .receipt_id()
        .ok_or_else(|| AppError::Internal("render job without receipt_id".to_string()))?
        .to_string();

    match generate(state, &receipt_id).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Attempt accounting on the receipt survives broker state loss.
            if let Ok(conn) = state.db.get() {
                let _ = queries::increment_pdf_attempts(&conn, &receipt_id);
            }
            Err(e)
        }
    }
}

async fn generate(state: &AppState, receipt_id: &str) -> Result<serde_json::Value> {
    let (receipt, store_name) = {
        let conn = state.db.get()?;
        let receipt = queries::get_receipt_by_id(&conn, receipt_id)?
            .ok_or_else(|| AppError::NotFound(format!("Receipt {}", receipt_id)))?;
        let store_name = queries::get_store_by_id(&conn, &receipt.store_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| receipt.store_id.clone());
        (receipt, store_name)
    };

    if receipt.pdf_generated {
        // Re-seed downstream stages anyway: a crash between the update and
        // the enqueue below would otherwise leave them waiting on recovery.
        enqueue_downstream(state, receipt_id)?;
        return Ok(serde_json::json!({ "skipped": "already_generated" }));
    }

    let data = ReceiptData::from_receipt(&receipt, &store_name)?;
    let bytes = pdf::render_receipt(&data)?;

    tokio::fs::create_dir_all(&state.receipts_dir).await?;
    let path = state.receipts_dir.join(format!("{}.pdf", receipt.id));
    tokio::fs::write(&path, &bytes).await?;

    {
        let conn = state.db.get()?;
        queries::mark_pdf_generated(
            &conn,
            &receipt.id,
            &path.to_string_lossy(),
            bytes.len() as i64,
        )?;
    }

    enqueue_downstream(state, receipt_id)?;

    tracing::info!(
        receipt_id = %receipt.id,
        receipt_number = %receipt.receipt_number,
        size_bytes = bytes.len(),
        "receipt PDF generated"
    );

    Ok(serde_json::json!({
        "pdf_size_bytes": bytes.len(),
        "pdf_local_path": path.to_string_lossy(),
    }))
}

fn enqueue_downstream(state: &AppState, receipt_id: &str) -> Result<()> {
    let conn = state.db.get()?;
    queue::enqueue(
        &conn,
        &CLOUDINARY_UPLOAD,
        &Enqueue::for_receipt(&CLOUDINARY_UPLOAD, JOB_TYPE_UPLOAD, receipt_id),
    )?;
    queue::enqueue(
        &conn,
        &EMAIL_DELIVERY,
        &Enqueue::for_receipt(&EMAIL_DELIVERY, JOB_TYPE_EMAIL, receipt_id),
    )?;
    Ok(())
}
