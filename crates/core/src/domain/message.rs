// Message Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Workflow submission request
///
/// Field names match the payloads the platform services already exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    pub user: String,
    pub workflow_id_or_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Higher number = dequeued earlier
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub min_job_memory: u64,
}

impl WorkflowSubmission {
    pub fn new(user: impl Into<String>, workflow_id_or_name: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            workflow_id_or_name: workflow_id_or_name.into(),
            parameters: serde_json::Value::Object(Default::default()),
            priority: 0,
            min_job_memory: 0,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_min_job_memory(mut self, bytes: u64) -> Self {
        self.min_job_memory = bytes;
        self
    }
}

/// Workflow / job lifecycle status
///
/// Travels on the wire as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WorkflowStatus {
    Created,
    Running,
    Finished,
    Failed,
    Deleted,
    Stopped,
    Queued,
    Pending,
}

impl WorkflowStatus {
    /// Stable numeric code shared with the platform database
    pub fn code(&self) -> u8 {
        match self {
            WorkflowStatus::Created => 0,
            WorkflowStatus::Running => 1,
            WorkflowStatus::Finished => 2,
            WorkflowStatus::Failed => 3,
            WorkflowStatus::Deleted => 4,
            WorkflowStatus::Stopped => 5,
            WorkflowStatus::Queued => 6,
            WorkflowStatus::Pending => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => WorkflowStatus::Created,
            1 => WorkflowStatus::Running,
            2 => WorkflowStatus::Finished,
            3 => WorkflowStatus::Failed,
            4 => WorkflowStatus::Deleted,
            5 => WorkflowStatus::Stopped,
            6 => WorkflowStatus::Queued,
            7 => WorkflowStatus::Pending,
            _ => return None,
        })
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Finished
                | WorkflowStatus::Failed
                | WorkflowStatus::Deleted
                | WorkflowStatus::Stopped
        )
    }
}

impl From<WorkflowStatus> for u8 {
    fn from(status: WorkflowStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for WorkflowStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        WorkflowStatus::from_code(code).ok_or_else(|| format!("unknown workflow status code {}", code))
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Finished => "finished",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Deleted => "deleted",
            WorkflowStatus::Stopped => "stopped",
            WorkflowStatus::Queued => "queued",
            WorkflowStatus::Pending => "pending",
        };
        write!(f, "{}", s)
    }
}

/// Job status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub workflow_uuid: String,
    pub status: WorkflowStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Free-form metadata such as workflow progress
    ///
    /// An absent field is `None`; an explicit JSON `null` is `Some(Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub message: Option<serde_json::Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Kind of record carried by a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    WorkflowSubmission,
    JobStatus,
    /// Caller-defined JSON payload
    Raw,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::WorkflowSubmission => write!(f, "workflow-submission"),
            MessageKind::JobStatus => write!(f, "job-status"),
            MessageKind::Raw => write!(f, "raw"),
        }
    }
}

/// In-memory message record exchanged between publisher and consumer
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    WorkflowSubmission(WorkflowSubmission),
    JobStatus(JobStatus),
    Raw(serde_json::Value),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::WorkflowSubmission(_) => MessageKind::WorkflowSubmission,
            Message::JobStatus(_) => MessageKind::JobStatus,
            Message::Raw(_) => MessageKind::Raw,
        }
    }

    pub fn as_workflow_submission(&self) -> Option<&WorkflowSubmission> {
        match self {
            Message::WorkflowSubmission(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_job_status(&self) -> Option<&JobStatus> {
        match self {
            Message::JobStatus(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&serde_json::Value> {
        match self {
            Message::Raw(v) => Some(v),
            _ => None,
        }
    }
}

impl From<WorkflowSubmission> for Message {
    fn from(value: WorkflowSubmission) -> Self {
        Message::WorkflowSubmission(value)
    }
}

impl From<JobStatus> for Message {
    fn from(value: JobStatus) -> Self {
        Message::JobStatus(value)
    }
}

impl From<serde_json::Value> for Message {
    fn from(value: serde_json::Value) -> Self {
        Message::Raw(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        for code in 0..=7u8 {
            let status = WorkflowStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(WorkflowStatus::from_code(8), None);
        assert_eq!(WorkflowStatus::Queued.code(), 6);
    }

    #[test]
    fn test_status_serializes_as_code() {
        let json = serde_json::to_string(&WorkflowStatus::Finished).unwrap();
        assert_eq!(json, "2");
        assert_eq!(serde_json::from_str::<WorkflowStatus>("6").unwrap(), WorkflowStatus::Queued);
        let err = serde_json::from_str::<WorkflowStatus>("9").unwrap_err();
        assert!(err.to_string().contains("unknown workflow status code 9"), "{}", err);
        assert!(serde_json::from_str::<WorkflowStatus>("\"finished\"").is_err());
        assert!(WorkflowStatus::Finished.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn test_submission_defaults_when_fields_absent() {
        let json = r#"{"user": "u1", "workflow_id_or_name": "wf.1"}"#;
        let submission: WorkflowSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.priority, 0);
        assert_eq!(submission.min_job_memory, 0);
        assert!(submission.parameters.is_null());
    }
}
