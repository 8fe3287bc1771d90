//! Download task lifecycle.
//!
//! Tasks are referenced from the outside by [`TaskId`] only; the [`TaskManager`]
//! registry owns their state.

mod manager;
mod state;

pub use manager::{DownloadResult, TaskManager, TaskManagerConfig, TaskProgress, TaskSnapshot};
pub use state::{TaskEvent, TaskId, TaskState};
