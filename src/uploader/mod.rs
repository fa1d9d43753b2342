// Upload orchestration
//
// The coordinator owns every in-flight task and turns transport events into
// task transitions, aggregate progress and notifications.

pub mod coordinator;
pub mod events;
pub mod progress_tracker;
pub mod task;

pub use coordinator::UploadCoordinator;
pub use events::{TaskSummary, UploaderEvent};
pub use task::{TaskId, TaskState};
