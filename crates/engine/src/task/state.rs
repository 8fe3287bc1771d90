use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a download task, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created, not yet started.
    Pending,
    /// The pipeline is running.
    Running,
    /// Cancellation was requested while running; waiting for the pipeline to stop.
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

/// Inputs of the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Start,
    CancelRequested,
    Succeeded,
    Failed,
    /// The pipeline stopped because of cancellation.
    Aborted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// State after `event`. Events without a transition leave the state unchanged.
    pub fn on(self, event: TaskEvent) -> TaskState {
        use TaskEvent as E;
        use TaskState as S;

        match (self, event) {
            (S::Pending, E::Start) => S::Running,
            (S::Pending, E::CancelRequested) => S::Cancelled,

            (S::Running, E::CancelRequested) => S::Cancelling,
            (S::Running, E::Succeeded) => S::Completed,
            (S::Running, E::Failed) => S::Failed,
            (S::Running, E::Aborted) => S::Cancelled,

            // The output was already committed when success arrives here.
            (S::Cancelling, E::Succeeded) => S::Completed,
            (S::Cancelling, E::Failed | E::Aborted) => S::Cancelled,

            (state, _) => state,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(a.to_string(), format!("task-{}", a.as_u64()));
    }

    #[test]
    fn happy_path() {
        let state = TaskState::Pending.on(TaskEvent::Start);
        assert_eq!(state, TaskState::Running);
        assert_eq!(state.on(TaskEvent::Succeeded), TaskState::Completed);
        assert_eq!(state.on(TaskEvent::Failed), TaskState::Failed);
    }

    #[test]
    fn cancellation_paths() {
        assert_eq!(
            TaskState::Pending.on(TaskEvent::CancelRequested),
            TaskState::Cancelled
        );
        let cancelling = TaskState::Running.on(TaskEvent::CancelRequested);
        assert_eq!(cancelling, TaskState::Cancelling);
        assert_eq!(cancelling.on(TaskEvent::Aborted), TaskState::Cancelled);
        assert_eq!(cancelling.on(TaskEvent::Failed), TaskState::Cancelled);
        assert_eq!(cancelling.on(TaskEvent::Succeeded), TaskState::Completed);
        assert_eq!(
            cancelling.on(TaskEvent::CancelRequested),
            TaskState::Cancelling
        );
    }

    #[test]
    fn terminal_states_ignore_events() {
        for state in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(state.is_terminal());
            for event in [
                TaskEvent::Start,
                TaskEvent::CancelRequested,
                TaskEvent::Succeeded,
                TaskEvent::Failed,
                TaskEvent::Aborted,
            ] {
                assert_eq!(state.on(event), state);
            }
        }
        assert_eq!(TaskState::Pending.on(TaskEvent::Succeeded), TaskState::Pending);
    }
}
