use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const METHOD_LIST: &str = "missionControl.list";
pub const METHOD_GET: &str = "missionControl.get";
pub const METHOD_UPDATE_STATUS: &str = "missionControl.updateStatus";
pub const METHOD_DELETE: &str = "missionControl.delete";
pub const METHOD_CREATE: &str = "missionControl.create";
pub const METHOD_SPAWN: &str = "missionControl.spawn";

pub const DEFAULT_JOB_TYPE: &str = "task";
pub const LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Review,
    Revising,
    Done,
    Failed,
    Success,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    pub const SETTABLE: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Review,
        JobStatus::Revising,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Review => "review",
            JobStatus::Revising => "revising",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Success => "success",
        }
    }

    /// Whether `updateStatus` may move a job into this status. `success` is
    /// written by the verifier directly and never through that path.
    pub fn is_settable(&self) -> bool {
        !matches!(self, JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "review" => Ok(JobStatus::Review),
            "revising" => Ok(JobStatus::Revising),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "success" => Ok(JobStatus::Success),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

/// Columns written by a status update. `started_at` and `finished_at` are
/// only touched when the new status calls for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusStamp {
    pub status: JobStatus,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl StatusStamp {
    pub fn for_status(status: JobStatus, now_ms: i64) -> Self {
        let started_at = (status == JobStatus::Running).then_some(now_ms);
        let finished_at =
            matches!(status, JobStatus::Done | JobStatus::Failed).then_some(now_ms);
        Self {
            status,
            updated_at: now_ms,
            started_at,
            finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub priority: i64,
    pub agent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
    pub tags: Option<String>,
    pub session_key: Option<String>,
    pub fail_count: i64,
    pub verifier_last_confidence: Option<f64>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub revision_count: i64,
}

/// Caller-supplied fields of a job about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: String,
    pub job_type: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: i64,
    pub agent_id: Option<String>,
    pub tags: Option<String>,
    pub created_at: i64,
}

impl NewJob {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            job_type: DEFAULT_JOB_TYPE.to_string(),
            title: String::new(),
            description: None,
            priority: 0,
            agent_id: None,
            tags: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    InternalError,
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for OperationError {}
