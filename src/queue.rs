//! Durable job broker backed by the relational store.
//!
//! Jobs live in the `jobs` table: named queues, a reserved unique `job_id`
//! for de-duplication, per-job attempt counters, exponential backoff,
//! priority, and delayed execution via `run_at`. Claiming is a single
//! `UPDATE ... RETURNING` statement, which under SQLite's write lock
//! guarantees at-most-one active execution per job.
//!
//! Workers enqueue follow-up work through this module only; they never call
//! each other in-process.

use rusqlite::{params, Connection};

use crate::db::from_row::{FromRow, JOB_COLS};
use crate::error::Result;
use crate::id;
use crate::models::Job;

/// Normal priority for pipeline jobs seeded by the commit path.
pub const PRIORITY_NORMAL: i64 = 1;

/// Lower priority for jobs re-enqueued by the recovery sweep.
pub const PRIORITY_RECOVERY: i64 = 2;

/// Completed jobs retained per queue for inspection.
pub const COMPLETED_RETENTION: i64 = 100;

/// A named queue with its fixed retry policy and worker concurrency.
#[derive(Debug, Clone, Copy)]
pub struct QueueSpec {
    pub name: &'static str,
    pub max_attempts: i64,
    pub backoff_base_secs: i64,
    pub concurrency: usize,
}

pub const RECEIPT_GENERATION: QueueSpec = QueueSpec {
    name: "receipt-generation",
    max_attempts: 3,
    backoff_base_secs: 60,
    concurrency: 2,
};

pub const CLOUDINARY_UPLOAD: QueueSpec = QueueSpec {
    name: "cloudinary-upload",
    max_attempts: 5,
    backoff_base_secs: 120,
    concurrency: 5,
};

pub const EMAIL_DELIVERY: QueueSpec = QueueSpec {
    name: "email-delivery",
    max_attempts: 5,
    backoff_base_secs: 120,
    concurrency: 10,
};

pub const RECOVERY_SCAN: QueueSpec = QueueSpec {
    name: "recovery-scan",
    max_attempts: 1,
    backoff_base_secs: 60,
    concurrency: 1,
};

pub const ALL_QUEUES: &[QueueSpec] = &[
    RECEIPT_GENERATION,
    CLOUDINARY_UPLOAD,
    EMAIL_DELIVERY,
    RECOVERY_SCAN,
];

/// Exponential backoff delay before retry `attempt` (1-based):
/// `base * 2^(attempt - 1)`.
pub fn backoff_delay_secs(base_secs: i64, attempt: i64) -> i64 {
    base_secs.saturating_mul(1_i64 << (attempt - 1).clamp(0, 32))
}

/// A request to enqueue one job.
#[derive(Debug, Clone)]
pub struct Enqueue {
    /// Reserved dedup key; enqueueing an existing `job_id` is a no-op.
    pub job_id: String,
    pub job_type: String,
    pub data: serde_json::Value,
    pub priority: i64,
    pub delay_secs: i64,
    pub is_recovery: bool,
}

impl Enqueue {
    /// Pipeline job for a receipt, deduplicated per (queue, receipt).
    pub fn for_receipt(spec: &QueueSpec, job_type: &str, receipt_id: &str) -> Self {
        Self {
            job_id: format!("{}:{}", spec.name, receipt_id),
            job_type: job_type.to_string(),
            data: serde_json::json!({ "receipt_id": receipt_id }),
            priority: PRIORITY_NORMAL,
            delay_secs: 0,
            is_recovery: false,
        }
    }

    /// Recovery re-enqueue: lower priority, and a distinct `job_id` so a
    /// retained completed/failed row from the original run cannot shadow it.
    pub fn recovery_for_receipt(
        spec: &QueueSpec,
        job_type: &str,
        receipt_id: &str,
        sweep_at: i64,
    ) -> Self {
        Self {
            job_id: format!("{}:{}:recovery:{}", spec.name, receipt_id, sweep_at),
            job_type: job_type.to_string(),
            data: serde_json::json!({ "receipt_id": receipt_id }),
            priority: PRIORITY_RECOVERY,
            delay_secs: 0,
            is_recovery: true,
        }
    }
}

/// Enqueue a job. Returns false when the `job_id` was already reserved.
pub fn enqueue(conn: &Connection, spec: &QueueSpec, req: &Enqueue) -> Result<bool> {
    let id = id::job();
    let now = crate::db::queries::now();
    let data_json = serde_json::to_string(&req.data)?;

    let inserted = conn.execute(
        "INSERT INTO jobs (id, job_id, queue, job_type, data, status, priority, attempts, max_attempts, backoff_base_secs, run_at, is_recovery, queued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, 0, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(job_id) DO NOTHING",
        params![
            &id,
            &req.job_id,
            spec.name,
            &req.job_type,
            &data_json,
            req.priority,
            spec.max_attempts,
            spec.backoff_base_secs,
            now + req.delay_secs,
            req.is_recovery as i32,
            now,
        ],
    )?;
    Ok(inserted > 0)
}

/// Claim the next runnable job in a queue, incrementing its attempt counter.
/// Returns None when nothing is due.
pub fn claim_next(conn: &Connection, queue: &str) -> Result<Option<Job>> {
    let now = crate::db::queries::now();
    let sql = format!(
        "UPDATE jobs SET status = 'running', attempts = attempts + 1, started_at = ?1
         WHERE id = (
             SELECT id FROM jobs
             WHERE queue = ?2 AND status = 'queued' AND run_at <= ?1
             ORDER BY priority ASC, run_at ASC, queued_at ASC
             LIMIT 1
         )
         RETURNING {}",
        JOB_COLS
    );
    Job::fetch_optional(conn, &sql, &[&now, &queue])
}

pub fn complete(conn: &Connection, job: &Job) -> Result<()> {
    let now = crate::db::queries::now();
    conn.execute(
        "UPDATE jobs SET status = 'completed', finished_at = ?1 WHERE id = ?2",
        params![now, &job.id],
    )?;
    Ok(())
}

/// What happened to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Requeued with backoff; will run again at the given time.
    Retried { run_at: i64 },
    /// Attempt budget exhausted; retained as failed for audit.
    Exhausted,
}

/// Settle a failed execution: requeue with exponential backoff while the
/// attempt budget lasts, otherwise park the job as failed.
pub fn fail(conn: &Connection, job: &Job, error: &str) -> Result<FailDisposition> {
    let now = crate::db::queries::now();
    if job.attempts >= job.max_attempts {
        conn.execute(
            "UPDATE jobs SET status = 'failed', finished_at = ?1, last_error = ?2 WHERE id = ?3",
            params![now, error, &job.id],
        )?;
        return Ok(FailDisposition::Exhausted);
    }

    let run_at = now + backoff_delay_secs(job.backoff_base_secs, job.attempts);
    conn.execute(
        "UPDATE jobs SET status = 'queued', run_at = ?1, last_error = ?2 WHERE id = ?3",
        params![run_at, error, &job.id],
    )?;
    Ok(FailDisposition::Retried { run_at })
}

/// Requeue jobs stuck in `running` past the stall timeout (worker crashed or
/// the process restarted mid-execution). Jobs already out of attempt budget
/// are parked as failed instead.
pub fn requeue_stalled(conn: &Connection, stalled_after_secs: i64) -> Result<usize> {
    let now = crate::db::queries::now();
    let cutoff = now - stalled_after_secs;

    let exhausted = conn.execute(
        "UPDATE jobs SET status = 'failed', finished_at = ?1, last_error = 'stalled'
         WHERE status = 'running' AND started_at < ?2 AND attempts >= max_attempts",
        params![now, cutoff],
    )?;
    let requeued = conn.execute(
        "UPDATE jobs SET status = 'queued', run_at = ?1
         WHERE status = 'running' AND started_at < ?2",
        params![now, cutoff],
    )?;
    Ok(exhausted + requeued)
}

/// Delete completed jobs beyond the retention window for a queue. Failed
/// jobs are kept for audit.
pub fn prune_completed(conn: &Connection, queue: &str, keep: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM jobs WHERE queue = ?1 AND status = 'completed' AND id NOT IN (
             SELECT id FROM jobs WHERE queue = ?1 AND status = 'completed'
             ORDER BY finished_at DESC LIMIT ?2
         )",
        params![queue, keep],
    )?;
    Ok(deleted)
}

/// Jobs currently queued or running for a queue (backpressure signal).
pub fn queue_depth(conn: &Connection, queue: &str) -> Result<i64> {
    let depth: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND status IN ('queued', 'running')",
        params![queue],
        |row| row.get(0),
    )?;
    Ok(depth)
}

/// Look up a job by its reserved dedup key.
pub fn get_job_by_job_id(conn: &Connection, job_id: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLS);
    Job::fetch_optional(conn, &sql, &[&job_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::JobStatus;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        init_db(&conn).expect("schema");
        conn
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_secs(60, 1), 60);
        assert_eq!(backoff_delay_secs(60, 2), 120);
        assert_eq!(backoff_delay_secs(60, 3), 240);
        assert_eq!(backoff_delay_secs(120, 1), 120);
        assert_eq!(backoff_delay_secs(120, 4), 960);
    }

    #[test]
    fn enqueue_and_claim() {
        let conn = test_conn();
        let req = Enqueue::for_receipt(&RECEIPT_GENERATION, "generate-receipt-pdf", "rd_rcp_x");
        assert!(enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap());

        let job = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.receipt_id(), Some("rd_rcp_x"));

        // At-most-one active execution: nothing else to claim.
        assert!(claim_next(&conn, RECEIPT_GENERATION.name).unwrap().is_none());
    }

    #[test]
    fn job_id_is_a_dedup_gate() {
        let conn = test_conn();
        let req = Enqueue::for_receipt(&RECEIPT_GENERATION, "generate-receipt-pdf", "rd_rcp_x");
        assert!(enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap());
        assert!(!enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap());
        assert_eq!(queue_depth(&conn, RECEIPT_GENERATION.name).unwrap(), 1);
    }

    #[test]
    fn failed_job_requeues_with_backoff_until_exhausted() {
        let conn = test_conn();
        let req = Enqueue::for_receipt(&RECEIPT_GENERATION, "generate-receipt-pdf", "rd_rcp_x");
        enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap();

        // Attempts 1 and 2 retry with growing delay.
        for expected_attempt in 1..RECEIPT_GENERATION.max_attempts {
            // Make the job due regardless of backoff from the previous round.
            conn.execute("UPDATE jobs SET run_at = 0 WHERE status = 'queued'", [])
                .unwrap();
            let job = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();
            assert_eq!(job.attempts, expected_attempt);
            let disp = fail(&conn, &job, "boom").unwrap();
            match disp {
                FailDisposition::Retried { run_at } => {
                    let expected_delay =
                        backoff_delay_secs(RECEIPT_GENERATION.backoff_base_secs, job.attempts);
                    assert!(run_at >= crate::db::queries::now() + expected_delay - 2);
                }
                FailDisposition::Exhausted => panic!("exhausted too early"),
            }
        }

        // Final attempt parks the job as failed.
        conn.execute("UPDATE jobs SET run_at = 0 WHERE status = 'queued'", [])
            .unwrap();
        let job = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();
        assert_eq!(job.attempts, RECEIPT_GENERATION.max_attempts);
        assert_eq!(fail(&conn, &job, "boom").unwrap(), FailDisposition::Exhausted);

        let parked = get_job_by_job_id(&conn, &req.job_id).unwrap().unwrap();
        assert_eq!(parked.status, JobStatus::Failed);
        assert_eq!(parked.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn delayed_job_is_not_claimable_early() {
        let conn = test_conn();
        let mut req = Enqueue::for_receipt(&EMAIL_DELIVERY, "send-receipt-email", "rd_rcp_x");
        req.delay_secs = 3600;
        enqueue(&conn, &EMAIL_DELIVERY, &req).unwrap();
        assert!(claim_next(&conn, EMAIL_DELIVERY.name).unwrap().is_none());
    }

    #[test]
    fn priority_orders_claims() {
        let conn = test_conn();
        let mut recovery =
            Enqueue::recovery_for_receipt(&CLOUDINARY_UPLOAD, "upload-receipt-pdf", "rd_rcp_a", 1);
        recovery.delay_secs = 0;
        enqueue(&conn, &CLOUDINARY_UPLOAD, &recovery).unwrap();
        let normal = Enqueue::for_receipt(&CLOUDINARY_UPLOAD, "upload-receipt-pdf", "rd_rcp_b");
        enqueue(&conn, &CLOUDINARY_UPLOAD, &normal).unwrap();

        // Normal-priority work drains before recovery work.
        let first = claim_next(&conn, CLOUDINARY_UPLOAD.name).unwrap().unwrap();
        assert_eq!(first.receipt_id(), Some("rd_rcp_b"));
        let second = claim_next(&conn, CLOUDINARY_UPLOAD.name).unwrap().unwrap();
        assert_eq!(second.receipt_id(), Some("rd_rcp_a"));
        assert!(second.is_recovery);
    }

    #[test]
    fn stalled_running_jobs_are_requeued() {
        let conn = test_conn();
        let req = Enqueue::for_receipt(&RECEIPT_GENERATION, "generate-receipt-pdf", "rd_rcp_x");
        enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap();
        let job = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();

        // Backdate the claim so it looks stalled.
        conn.execute(
            "UPDATE jobs SET started_at = started_at - 900 WHERE id = ?1",
            params![&job.id],
        )
        .unwrap();
        assert_eq!(requeue_stalled(&conn, 300).unwrap(), 1);

        let requeued = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();
        assert_eq!(requeued.attempts, 2);
    }

    #[test]
    fn prune_keeps_recent_completed_jobs() {
        let conn = test_conn();
        for i in 0..5 {
            let req = Enqueue::for_receipt(
                &RECEIPT_GENERATION,
                "generate-receipt-pdf",
                &format!("rd_rcp_{}", i),
            );
            enqueue(&conn, &RECEIPT_GENERATION, &req).unwrap();
            let job = claim_next(&conn, RECEIPT_GENERATION.name).unwrap().unwrap();
            complete(&conn, &job).unwrap();
        }
        assert_eq!(prune_completed(&conn, RECEIPT_GENERATION.name, 3).unwrap(), 2);
    }
}
