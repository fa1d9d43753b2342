use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::task::{TaskId, TaskState};
use crate::errors::ErrorInfo;

/// Notifications emitted by the coordinator, in order, on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploaderEvent {
    /// Aggregate progress over all active uploads, 0-100.
    Progress { aggregate: u8 },
    Completed {
        task_id: TaskId,
        file_path: PathBuf,
        url: String,
        delete_token: String,
    },
    Failed {
        task_id: TaskId,
        file_path: PathBuf,
        error: ErrorInfo,
    },
    /// A stored session was refreshed after an authentication failure.
    AuthRefreshed { service_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub file_path: PathBuf,
    pub service_id: String,
    pub state: TaskState,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}
