//! Upload worker: push the locally rendered PDF into the artifact store as
//! an authenticated raw resource and record a signed download URL.

use std::path::Path;

use chrono::{Datelike, TimeZone, Utc};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{DeliveryStatus, Job};
use crate::storage::UploadOptions;

pub async fn run(state: &AppState, job: &Job) -> Result<serde_json::Value> {
    let receipt_id = job
        .receipt_id()
        .ok_or_else(|| AppError::Internal("upload job without receipt_id".to_string()))?
        .to_string();

    let receipt = {
        let conn = state.db.get()?;
        queries::get_receipt_by_id(&conn, &receipt_id)?
            .ok_or_else(|| AppError::NotFound(format!("Receipt {}", receipt_id)))?
    };

    if receipt.cloudinary_uploaded {
        return Ok(serde_json::json!({ "skipped": "already_uploaded" }));
    }

    // Render must have completed first; retrying via backoff gives it time.
    let local_path = match (receipt.pdf_generated, receipt.pdf_local_path.as_deref()) {
        (true, Some(path)) => path.to_string(),
        _ => {
            return Err(AppError::Validation(format!(
                "receipt {} has no generated PDF yet",
                receipt.id
            )));
        }
    };

    let year = Utc
        .timestamp_opt(receipt.paid_at, 0)
        .single()
        .map(|dt| dt.year())
        .unwrap_or_else(|| Utc::now().year());

    let options = UploadOptions {
        folder: format!("receipts/{}/{}", receipt.store_id, year),
        public_id: format!("receipt_{}", receipt.id),
        tags: vec![
            "receipt".to_string(),
            format!("user_{}", receipt.user_id),
            format!("order_{}", receipt.order_id),
        ],
    };

    match state.artifacts.upload(Path::new(&local_path), &options).await {
        Ok(artifact) => {
            let expires_at = queries::now() + state.signed_url_ttl_secs;
            let signed_url = match state.artifacts.signed_url(&artifact.public_id, expires_at).await
            {
                Ok(url) => Some(url),
                Err(e) => {
                    // The upload itself stuck; a missing signed URL is not
                    // worth failing the stage over.
                    tracing::warn!(receipt_id = %receipt.id, error = %e, "signed URL generation failed");
                    None
                }
            };

            let conn = state.db.get()?;
            queries::mark_uploaded(
                &conn,
                &receipt.id,
                &artifact.public_id,
                &artifact.secure_url,
                signed_url.as_deref(),
                signed_url.as_ref().map(|_| expires_at),
            )?;
            queries::insert_cloud_storage_log(
                &conn,
                &receipt.id,
                "upload",
                DeliveryStatus::Success,
                Some(&artifact.public_id),
                None,
            )?;
            queries::mark_completed_if_ready(&conn, &receipt.id)?;

            tracing::info!(
                receipt_id = %receipt.id,
                public_id = %artifact.public_id,
                "receipt PDF uploaded"
            );

            Ok(serde_json::json!({
                "public_id": artifact.public_id,
                "secure_url": artifact.secure_url,
            }))
        }
        Err(e) => {
            let error = e.to_string();
            let conn = state.db.get()?;
            queries::increment_upload_attempts(&conn, &receipt.id)?;
            queries::insert_cloud_storage_log(
                &conn,
                &receipt.id,
                "upload",
                DeliveryStatus::Failed,
                None,
                Some(&error),
            )?;
            Err(e)
        }
    }
}
