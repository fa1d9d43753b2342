use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{is_auth_status, AppError, AppResult, ErrorInfo, ErrorKind};
use crate::security::InputValidator;
use crate::services::{ServiceAdapter, UploadResult};
use crate::transport::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    file_path: PathBuf,
    service_id: String,
}

impl UploadRequest {
    pub fn new(file_path: impl Into<PathBuf>, service_id: &str) -> AppResult<Self> {
        let file_path = file_path.into();
        InputValidator::validate_upload_path(&file_path)?;
        InputValidator::validate_service_id(service_id)?;

        Ok(Self {
            file_path,
            service_id: service_id.to_string(),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Sending,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// How a task ended, as reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(UploadResult),
    Failed(ErrorInfo),
}

/// One upload driven through a single transport request.
///
/// Transitions only move forward: Pending → Sending → Succeeded | Failed |
/// Cancelled. A Pending task may also fail (request could not be built) or be
/// cancelled. Calls that do not apply to the current state are ignored.
#[derive(Debug)]
pub struct UploadTask {
    id: TaskId,
    request: UploadRequest,
    state: TaskState,
    request_id: Option<RequestId>,
    bytes_sent: u64,
    bytes_total: u64,
    result: Option<UploadResult>,
    error: Option<ErrorInfo>,
}

impl UploadTask {
    pub fn new(id: TaskId, request: UploadRequest) -> Self {
        Self {
            id,
            request,
            state: TaskState::Pending,
            request_id: None,
            bytes_sent: 0,
            bytes_total: 0,
            result: None,
            error: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn result(&self) -> Option<&UploadResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Fraction of the body sent, in [0, 1]; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.bytes_total as f64).clamp(0.0, 1.0)
    }

    /// Pending → Sending. Returns false (and changes nothing) in any other state.
    pub fn start(&mut self, request_id: RequestId) -> bool {
        if self.state != TaskState::Pending {
            log::debug!("Ignoring start for task {} in state {:?}", self.id, self.state);
            return false;
        }

        self.state = TaskState::Sending;
        self.request_id = Some(request_id);
        true
    }

    pub fn on_progress(&mut self, sent: u64, total: u64) -> bool {
        if self.state != TaskState::Sending {
            return false;
        }

        self.bytes_sent = sent;
        self.bytes_total = total;
        true
    }

    /// Transport finished; the adapter decides whether the upload succeeded.
    pub fn on_complete(
        &mut self,
        adapter: &dyn ServiceAdapter,
        status: u16,
        body: &[u8],
    ) -> Option<TaskOutcome> {
        if self.state != TaskState::Sending {
            return None;
        }

        let parsed = if is_auth_status(status) {
            Err(AppError::authentication_required(self.request.service_id()))
        } else {
            adapter.parse_response(body, status)
        };

        match parsed {
            Ok(result) => {
                self.state = TaskState::Succeeded;
                self.result = Some(result.clone());
                Some(TaskOutcome::Succeeded(result))
            }
            Err(e) => {
                let info = ErrorInfo::from(&e).with_status(status);
                self.fail(info.clone());
                Some(TaskOutcome::Failed(info))
            }
        }
    }

    pub fn on_error(&mut self, error: ErrorInfo) -> Option<TaskOutcome> {
        if self.state != TaskState::Sending {
            return None;
        }

        let error = if error.http_status.map(is_auth_status).unwrap_or(false) {
            ErrorInfo {
                kind: ErrorKind::AuthenticationRequired,
                ..error
            }
        } else {
            error
        };

        self.fail(error.clone());
        Some(TaskOutcome::Failed(error))
    }

    /// The request could not be built or handed to the transport.
    pub fn on_dispatch_failed(&mut self, error: ErrorInfo) -> Option<TaskOutcome> {
        if self.state != TaskState::Pending {
            return None;
        }

        self.fail(error.clone());
        Some(TaskOutcome::Failed(error))
    }

    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        self.state = TaskState::Cancelled;
        true
    }

    fn fail(&mut self, error: ErrorInfo) {
        self.state = TaskState::Failed;
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PomfConfig;
    use crate::services::PomfAdapter;

    const POMF_OK: &[u8] = br#"{"success":true,"files":[{"url":"https://pomf.test/a.png"}]}"#;

    fn task() -> UploadTask {
        UploadTask::new(
            TaskId::new(),
            UploadRequest::new("/tmp/shot.png", "pomf").unwrap(),
        )
    }

    fn adapter() -> PomfAdapter {
        PomfAdapter::new(&PomfConfig::default())
    }

    #[test]
    fn test_upload_request_validation() {
        assert!(UploadRequest::new("", "pomf").is_err());
        assert!(matches!(
            UploadRequest::new("/tmp/a.png", "No Such Service"),
            Err(AppError::UnknownService { .. })
        ));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut task = task();
        let first = RequestId::new();

        assert!(task.start(first));
        assert_eq!(task.state(), TaskState::Sending);

        assert!(!task.start(RequestId::new()));
        assert_eq!(task.state(), TaskState::Sending);
        assert_eq!(task.request_id(), Some(first));
    }

    #[test]
    fn test_progress_only_counts_while_sending() {
        let mut task = task();
        assert!(!task.on_progress(10, 100));
        assert_eq!(task.fraction(), 0.0);

        task.start(RequestId::new());
        assert!(task.on_progress(25, 100));
        assert_eq!(task.fraction(), 0.25);

        // Overshoot from the transport is clamped
        task.on_progress(150, 100);
        assert_eq!(task.fraction(), 1.0);

        // Unknown total contributes nothing
        task.on_progress(50, 0);
        assert_eq!(task.fraction(), 0.0);
    }

    #[test]
    fn test_complete_with_valid_payload_succeeds() {
        let mut task = task();
        task.start(RequestId::new());

        let outcome = task.on_complete(&adapter(), 200, POMF_OK);

        assert!(matches!(outcome, Some(TaskOutcome::Succeeded(_))));
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.result().unwrap().url, "https://pomf.test/a.png");
    }

    #[test]
    fn test_http_success_with_bad_payload_fails() {
        let mut task = task();
        task.start(RequestId::new());

        let outcome = task.on_complete(&adapter(), 200, br#"{"success":false}"#);

        match outcome {
            Some(TaskOutcome::Failed(info)) => {
                assert_eq!(info.kind, ErrorKind::AdapterParse);
                assert_eq!(info.http_status, Some(200));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn test_auth_status_is_authentication_required() {
        let mut task = task();
        task.start(RequestId::new());

        match task.on_complete(&adapter(), 401, b"") {
            Some(TaskOutcome::Failed(info)) => {
                assert_eq!(info.kind, ErrorKind::AuthenticationRequired)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = task();
        task.start(RequestId::new());
        task.on_error(ErrorInfo::new(ErrorKind::Transport, "connection reset"));
        assert_eq!(task.state(), TaskState::Failed);

        assert!(!task.cancel());
        assert!(task.on_complete(&adapter(), 200, POMF_OK).is_none());
        assert!(!task.on_progress(1, 1));
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn test_cancelled_task_ignores_completion() {
        let mut task = task();
        task.start(RequestId::new());
        assert!(task.cancel());

        assert!(task.on_complete(&adapter(), 200, POMF_OK).is_none());
        assert!(task
            .on_error(ErrorInfo::new(ErrorKind::Transport, "late"))
            .is_none());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.result().is_none());
    }

    #[test]
    fn test_pending_task_can_be_cancelled() {
        let mut task = task();

        assert!(task.cancel());
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.request_id().is_none());

        // A request built after cancellation is never started
        assert!(!task.start(RequestId::new()));
        assert!(task
            .on_dispatch_failed(ErrorInfo::new(ErrorKind::UnsupportedFile, "late"))
            .is_none());
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_pending_task_can_fail_before_dispatch() {
        let mut task = task();
        let outcome =
            task.on_dispatch_failed(ErrorInfo::new(ErrorKind::UnsupportedFile, "unreadable"));

        assert!(matches!(outcome, Some(TaskOutcome::Failed(_))));
        assert_eq!(task.state(), TaskState::Failed);
        assert!(!task.start(RequestId::new()));
    }
}
