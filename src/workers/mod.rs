//! Worker pools consuming the fulfillment queues.
//!
//! Each queue gets a fixed number of tokio tasks (2 render / 5 upload /
//! 10 email / 1 recovery) that loop claim -> execute -> settle. `run_one` is
//! the single execution step, shared by the pools and by tests that drain
//! queues deterministically. Every execution writes a `job_logs` audit row.

pub mod email;
pub mod recovery;
pub mod render;
pub mod upload;

use std::time::Duration;

use crate::commit::{JOB_TYPE_EMAIL, JOB_TYPE_RECOVERY, JOB_TYPE_RENDER, JOB_TYPE_UPLOAD};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::Job;
use crate::queue::{self, FailDisposition, QueueSpec, ALL_QUEUES, COMPLETED_RETENTION};

/// How long a job may sit in `running` before the broker assumes the worker
/// died and requeues it.
pub const STALLED_AFTER_SECS: i64 = 300;

/// Idle poll interval for worker loops.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Broker/TTL maintenance cadence.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Recovery sweep cadence (every 15 minutes).
const RECOVERY_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Execute one claimed job by dispatching on its type.
async fn run_job(state: &AppState, job: &Job) -> Result<serde_json::Value> {
    match job.job_type.as_str() {
        JOB_TYPE_RENDER => render::run(state, job).await,
        JOB_TYPE_UPLOAD => upload::run(state, job).await,
        JOB_TYPE_EMAIL => email::run(state, job).await,
        JOB_TYPE_RECOVERY => recovery::run(state, job).await,
        other => Err(AppError::Internal(format!("unknown job type: {}", other))),
    }
}

/// Claim and execute at most one job from a queue, settling it and its audit
/// row. Returns None when the queue had nothing due.
pub async fn run_one(state: &AppState, spec: &QueueSpec) -> Result<Option<bool>> {
    let job = {
        let conn = state.db.get()?;
        queue::claim_next(&conn, spec.name)?
    };
    let Some(job) = job else {
        return Ok(None);
    };

    let log_id = {
        let conn = state.db.get()?;
        queries::insert_job_log_started(&conn, &job)?
    };

    tracing::debug!(
        queue = %job.queue,
        job_id = %job.job_id,
        attempt = job.attempts,
        is_recovery = job.is_recovery,
        "job claimed"
    );

    match run_job(state, &job).await {
        Ok(result) => {
            let conn = state.db.get()?;
            queue::complete(&conn, &job)?;
            queries::close_job_log(&conn, &log_id, Some(&result), None)?;
            tracing::debug!(queue = %job.queue, job_id = %job.job_id, "job completed");
            Ok(Some(true))
        }
        Err(e) => {
            let error = e.to_string();
            let conn = state.db.get()?;
            let disposition = queue::fail(&conn, &job, &error)?;
            queries::close_job_log(&conn, &log_id, None, Some(&error))?;
            match disposition {
                FailDisposition::Retried { run_at } => {
                    tracing::warn!(
                        queue = %job.queue,
                        job_id = %job.job_id,
                        attempt = job.attempts,
                        retry_at = run_at,
                        error = %error,
                        "job failed; will retry"
                    );
                }
                FailDisposition::Exhausted => {
                    tracing::error!(
                        queue = %job.queue,
                        job_id = %job.job_id,
                        attempts = job.attempts,
                        error = %error,
                        "job failed permanently; attempt budget exhausted"
                    );
                }
            }
            Ok(Some(false))
        }
    }
}

/// Spawn the fixed worker pools for every queue.
pub fn spawn_pools(state: &AppState) {
    for spec in ALL_QUEUES {
        for slot in 0..spec.concurrency {
            let state = state.clone();
            tokio::spawn(async move {
                worker_loop(state, spec, slot).await;
            });
        }
        tracing::info!(
            queue = spec.name,
            concurrency = spec.concurrency,
            "worker pool started"
        );
    }
}

async fn worker_loop(state: AppState, spec: &'static QueueSpec, slot: usize) {
    loop {
        match run_one(&state, spec).await {
            Ok(Some(_)) => {} // claim again immediately while work is due
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                tracing::warn!(queue = spec.name, slot, error = %e, "worker step failed");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Spawn the broker maintenance task: stalled-job requeue, completed-job
/// retention, and TTL purges for the audit tables.
pub fn spawn_maintenance(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(MAINTENANCE_INTERVAL).await;

            match state.db.get() {
                Ok(conn) => {
                    match queue::requeue_stalled(&conn, STALLED_AFTER_SECS) {
                        Ok(n) if n > 0 => tracing::warn!("requeued {} stalled jobs", n),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("stalled-job requeue failed: {}", e),
                    }
                    for spec in ALL_QUEUES {
                        if let Err(e) = queue::prune_completed(&conn, spec.name, COMPLETED_RETENTION)
                        {
                            tracing::warn!(queue = spec.name, "completed-job prune failed: {}", e);
                        }
                    }
                    match queries::purge_expired_webhook_logs(&conn) {
                        Ok(n) if n > 0 => tracing::debug!("purged {} expired webhook logs", n),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("webhook log purge failed: {}", e),
                    }
                    match queries::purge_expired_job_logs(&conn) {
                        Ok(n) if n > 0 => tracing::debug!("purged {} expired job logs", n),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("job log purge failed: {}", e),
                    }
                }
                Err(e) => tracing::warn!("maintenance could not get a connection: {}", e),
            }
        }
    });
    tracing::info!("broker maintenance task started (runs every 60 seconds)");
}

/// Spawn the recovery scheduler: enqueue one `recovery-scan` job every 15
/// minutes (single-concurrency; the job id carries the tick so a retained
/// completed row cannot shadow the next tick).
pub fn spawn_recovery_scheduler(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECOVERY_INTERVAL);
        loop {
            interval.tick().await;

            let enqueued = state.db.get().map_err(AppError::from).and_then(|conn| {
                let now = queries::now();
                queue::enqueue(
                    &conn,
                    &queue::RECOVERY_SCAN,
                    &queue::Enqueue {
                        job_id: format!("recovery-scan:{}", now),
                        job_type: JOB_TYPE_RECOVERY.to_string(),
                        data: serde_json::json!({}),
                        priority: queue::PRIORITY_NORMAL,
                        delay_secs: 0,
                        is_recovery: false,
                    },
                )
            });
            if let Err(e) = enqueued {
                tracing::warn!("failed to enqueue recovery scan: {}", e);
            }
        }
    });
    tracing::info!("recovery scheduler started (sweeps every 15 minutes)");
}
