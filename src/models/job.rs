use serde::{Deserialize, Serialize};

/// A row in the durable job broker.
///
/// `job_id` is the caller-reserved dedup key: enqueueing the same `job_id`
/// twice is a no-op while the first row exists. The broker guarantees
/// at-most-one active execution per job because claiming is a single UPDATE
/// under SQLite's write lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_id: String,
    pub queue: String,
    pub job_type: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    /// 1 = normal, 2 = recovery (drained after fresh work).
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub backoff_base_secs: i64,
    /// Not eligible for claiming before this time (delay / backoff).
    pub run_at: i64,
    pub is_recovery: bool,
    pub last_error: Option<String>,
    pub queued_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl Job {
    /// The `receipt_id` field of the job payload, if present.
    pub fn receipt_id(&self) -> Option<&str> {
        self.data.get("receipt_id").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record of one worker execution. Rows expire after 30
/// days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: String,
    pub job_id: String,
    pub queue: String,
    pub job_type: String,
    pub receipt_id: Option<String>,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub data: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub is_recovery: bool,
    pub queued_at: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub expires_at: i64,
}

/// Per-attempt record of an email provider call. Audit only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: String,
    pub receipt_id: String,
    pub recipient: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// Per-attempt record of an artifact store call. Audit only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudStorageLog {
    pub id: String,
    pub receipt_id: String,
    pub action: String,
    pub status: DeliveryStatus,
    pub public_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
