use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::backoff::BackoffStrategy;

/// The caller-supplied, globally unique identifier of a job.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct JobId(String);

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single unit of work: one shell command and its execution record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    /// Whether another execution attempt is permitted after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Transition after a successful execution: `processing -> completed`.
    ///
    /// The execution still counts as an attempt.
    pub fn record_success(&mut self) {
        self.attempts += 1;
        self.state = JobState::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Transition after a failed execution.
    ///
    /// Increments the attempt count and either schedules a retry
    /// (`processing -> failed` with a backoff delay) or, once the attempt
    /// ceiling is reached, moves the job to the dead letter queue
    /// (`processing -> dead`).
    pub fn record_failure(&mut self, message: String, backoff: &BackoffStrategy) {
        self.attempts += 1;
        self.error_message = Some(message);
        if self.should_retry() {
            self.state = JobState::Failed;
            self.next_retry_at = Some(backoff.next_retry_at(self.attempts));
        } else {
            self.state = JobState::Dead;
            self.next_retry_at = None;
        }
    }
}

/// The lifecycle state of a [`Job`].
///
/// `Pending` and `Failed` jobs whose backoff delay has elapsed are ready for
/// acquisition. `Completed` and `Dead` are terminal; `Dead` jobs can only
/// leave via an explicit DLQ reset.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(UnknownJobState(other.to_owned())),
        }
    }
}

/// Error returned when parsing an unrecognised job state string.
#[derive(Debug, thiserror::Error)]
#[error("unknown job state `{0}`")]
pub struct UnknownJobState(String);
