//! Task registry.
//!
//! The registry is the only state shared between callers. Every state change
//! happens under its lock, so concurrent cancel and finish calls for the same
//! task agree on exactly one terminal state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DownloadError, ProcessingError};
use crate::hls::{DownloadEvent, DownloadSummary, ProgressSink};
use crate::report::{ErrorReport, ErrorReporter, TracingErrorReporter};
use crate::source::DownloadSource;
use crate::task::state::{TaskEvent, TaskId, TaskState};

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// How long terminal tasks stay queryable.
    pub retention: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60),
        }
    }
}

/// Progress counters of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub segments_total: usize,
    pub segments_completed: usize,
    pub segments_skipped: usize,
    pub bytes_written: u64,
    pub retries: u64,
}

/// Terminal summary of a task.
#[derive(Debug, Clone)]
pub enum DownloadResult {
    Success {
        output: PathBuf,
        bytes_written: u64,
        segments_merged: usize,
        /// Sequence numbers left out under the skip gap policy.
        missing: Vec<u64>,
    },
    Failure {
        error: DownloadError,
        report: ErrorReport,
        /// Segments fetched before the task failed.
        segments_completed: usize,
    },
}

impl DownloadResult {
    fn failure(error: DownloadError, segments_completed: usize) -> Self {
        Self::Failure {
            report: ErrorReport::from(&error),
            error,
            segments_completed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Output was produced but some segments are missing.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Success { missing, .. } if !missing.is_empty())
    }

    pub fn error(&self) -> Option<&DownloadError> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }
}

impl From<DownloadSummary> for DownloadResult {
    fn from(summary: DownloadSummary) -> Self {
        Self::Success {
            output: summary.output,
            bytes_written: summary.bytes_written,
            segments_merged: summary.segments_merged,
            missing: summary.missing,
        }
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub source: DownloadSource,
    pub destination: PathBuf,
    pub progress: TaskProgress,
    /// Set once the task is terminal.
    pub result: Option<DownloadResult>,
}

struct TaskRecord {
    id: TaskId,
    state: TaskState,
    source: DownloadSource,
    destination: PathBuf,
    token: CancellationToken,
    progress: TaskProgress,
    result: Option<DownloadResult>,
    finished_at: Option<Instant>,
    updates: watch::Sender<TaskSnapshot>,
}

impl TaskRecord {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            state: self.state,
            source: self.source.clone(),
            destination: self.destination.clone(),
            progress: self.progress.clone(),
            result: self.result.clone(),
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }

    /// Apply `event`; returns whether the state changed.
    fn apply(&mut self, event: TaskEvent) -> bool {
        let next = self.state.on(event);
        if next == self.state {
            return false;
        }
        debug!(task_id = %self.id, from = %self.state, to = %next, "Task transition");
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        true
    }

    fn is_expired(&self, retention: Duration, now: Instant) -> bool {
        self.finished_at
            .is_some_and(|finished| now.duration_since(finished) >= retention)
    }
}

/// Owns every download task: creation, state transitions, progress, cancellation
/// and eviction.
pub struct TaskManager {
    config: TaskManagerConfig,
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(TaskManagerConfig::default())
    }
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            reporter: Arc::new(TracingErrorReporter),
        }
    }

    /// Reporter that receives a structured report for every failed task.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Register a new `Pending` task.
    pub fn create(&self, source: DownloadSource, destination: impl AsRef<Path>) -> TaskId {
        let id = TaskId::next();
        let destination = destination.as_ref().to_path_buf();
        let mut tasks = self.tasks.lock();
        self.purge_locked(&mut tasks);

        let snapshot = TaskSnapshot {
            id,
            state: TaskState::Pending,
            source: source.clone(),
            destination: destination.clone(),
            progress: TaskProgress::default(),
            result: None,
        };
        let (updates, _) = watch::channel(snapshot);
        tasks.insert(
            id,
            TaskRecord {
                id,
                state: TaskState::Pending,
                source,
                destination,
                token: CancellationToken::new(),
                progress: TaskProgress::default(),
                result: None,
                finished_at: None,
                updates,
            },
        );
        info!(task_id = %id, "Task created");
        id
    }

    /// Request cancellation. A pending task is cancelled immediately, a running
    /// one moves to `Cancelling` until its pipeline stops. Terminal tasks are left
    /// alone. Returns the state after the request.
    pub fn cancel(&self, id: TaskId) -> Result<TaskState, DownloadError> {
        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(&id).ok_or_else(|| task_not_found(id))?;

        if record.apply(TaskEvent::CancelRequested) {
            record.token.cancel();
            if record.state == TaskState::Cancelled {
                record.result = Some(DownloadResult::failure(
                    DownloadError::cancelled(),
                    record.progress.segments_completed,
                ));
            }
            record.publish();
            info!(task_id = %id, state = %record.state, "Task cancellation requested");
        }
        Ok(record.state)
    }

    pub fn status(&self, id: TaskId) -> Result<TaskSnapshot, DownloadError> {
        let mut tasks = self.tasks.lock();
        self.purge_locked(&mut tasks);
        tasks
            .get(&id)
            .map(TaskRecord::snapshot)
            .ok_or_else(|| task_not_found(id))
    }

    /// Receiver that sees every state and progress change of the task.
    pub fn subscribe(&self, id: TaskId) -> Result<watch::Receiver<TaskSnapshot>, DownloadError> {
        let tasks = self.tasks.lock();
        tasks
            .get(&id)
            .map(|record| record.updates.subscribe())
            .ok_or_else(|| task_not_found(id))
    }

    /// Wait for the task to reach a terminal state and return its result.
    pub async fn wait(&self, id: TaskId) -> Result<DownloadResult, DownloadError> {
        let mut updates = self.subscribe(id)?;
        let result = {
            let snapshot = updates
                .wait_for(|snapshot| snapshot.state.is_terminal())
                .await
                .map_err(|_| task_not_found(id))?;
            snapshot.result.clone()
        };
        result.ok_or_else(|| task_not_found(id))
    }

    /// Snapshots of all live tasks, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut tasks = self.tasks.lock();
        self.purge_locked(&mut tasks);
        let mut snapshots: Vec<_> = tasks.values().map(TaskRecord::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Evict terminal tasks older than the retention period. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut tasks = self.tasks.lock();
        self.purge_locked(&mut tasks)
    }

    fn purge_locked(&self, tasks: &mut HashMap<TaskId, TaskRecord>) -> usize {
        let now = Instant::now();
        let before = tasks.len();
        tasks.retain(|_, record| !record.is_expired(self.config.retention, now));
        let purged = before - tasks.len();
        if purged > 0 {
            debug!(purged, "Evicted expired tasks");
        }
        purged
    }

    /// Move a pending task to `Running`. Returns its cancellation token, or
    /// `None` when the task is unknown or no longer pending.
    pub(crate) fn start(&self, id: TaskId) -> Option<CancellationToken> {
        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(&id)?;
        if record.state != TaskState::Pending || !record.apply(TaskEvent::Start) {
            return None;
        }
        record.publish();
        info!(task_id = %id, source = %record.source, "Task started");
        Some(record.token.clone())
    }

    /// Record the pipeline outcome and move the task to its terminal state.
    pub(crate) fn finish(&self, id: TaskId, outcome: Result<DownloadSummary, DownloadError>) {
        let mut tasks = self.tasks.lock();
        let Some(record) = tasks.get_mut(&id) else {
            return;
        };

        let event = match &outcome {
            Ok(_) => TaskEvent::Succeeded,
            Err(e) if e.is_cancelled() => TaskEvent::Aborted,
            Err(_) => TaskEvent::Failed,
        };
        if !record.apply(event) {
            return;
        }

        let completed = record.progress.segments_completed;
        let mut failure_report = None;
        let result = match (record.state, outcome) {
            (TaskState::Completed, Ok(summary)) => {
                record.progress.bytes_written = summary.bytes_written;
                info!(
                    task_id = %id,
                    output = %summary.output.display(),
                    bytes = summary.bytes_written,
                    missing = summary.missing.len(),
                    "Task completed"
                );
                DownloadResult::from(summary)
            }
            (TaskState::Failed, Err(error)) => {
                let result = DownloadResult::failure(error, completed);
                if let DownloadResult::Failure { report, .. } = &result {
                    failure_report = Some(report.clone());
                }
                info!(task_id = %id, segments_completed = completed, "Task failed");
                result
            }
            _ => {
                info!(task_id = %id, segments_completed = completed, "Task cancelled");
                DownloadResult::failure(DownloadError::cancelled(), completed)
            }
        };
        record.result = Some(result);
        record.publish();
        drop(tasks);

        // Reporters may query the manager, so they run outside the registry lock.
        if let Some(report) = failure_report {
            self.reporter.report(&report);
        }
    }

    /// Progress sink that feeds pipeline events into the task's counters.
    pub fn progress_sink(self: &Arc<Self>, id: TaskId) -> Arc<dyn ProgressSink> {
        Arc::new(TaskProgressSink {
            manager: Arc::clone(self),
            id,
        })
    }

    fn update_progress(&self, id: TaskId, update: impl FnOnce(&mut TaskProgress)) {
        let mut tasks = self.tasks.lock();
        if let Some(record) = tasks.get_mut(&id) {
            if record.state.is_terminal() {
                return;
            }
            update(&mut record.progress);
            record.publish();
        }
    }
}

fn task_not_found(id: TaskId) -> DownloadError {
    ProcessingError::TaskNotFound { id }.into()
}

struct TaskProgressSink {
    manager: Arc<TaskManager>,
    id: TaskId,
}

impl ProgressSink for TaskProgressSink {
    fn on_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::PlaylistResolved { total_segments, .. } => {
                let total = *total_segments;
                self.manager
                    .update_progress(self.id, |p| p.segments_total = total);
            }
            DownloadEvent::SegmentDownloaded {
                sequence, retries, ..
            } => {
                let is_media = sequence.is_some();
                let retries = u64::from(*retries);
                self.manager.update_progress(self.id, |p| {
                    if is_media {
                        p.segments_completed += 1;
                    }
                    p.retries += retries;
                });
            }
            DownloadEvent::SegmentSkipped { .. } => {
                self.manager
                    .update_progress(self.id, |p| p.segments_skipped += 1);
            }
            DownloadEvent::BytesWritten { total } => {
                let total = *total;
                self.manager
                    .update_progress(self.id, |p| p.bytes_written = total);
            }
            DownloadEvent::Finalizing | DownloadEvent::OutputCommitted { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;

    fn source() -> DownloadSource {
        DownloadSource::parse("https://cdn.test/vod/index.m3u8").unwrap()
    }

    fn summary() -> DownloadSummary {
        DownloadSummary {
            output: PathBuf::from("/tmp/out.ts"),
            bytes_written: 42,
            total_segments: 3,
            segments_merged: 3,
            missing: Vec::new(),
            retries: 0,
        }
    }

    #[derive(Default)]
    struct CollectingReporter(Mutex<Vec<ErrorReport>>);

    impl ErrorReporter for CollectingReporter {
        fn report(&self, report: &ErrorReport) {
            self.0.lock().push(report.clone());
        }
    }

    #[test]
    fn lifecycle_to_completed() {
        let manager = TaskManager::default();
        let id = manager.create(source(), "/tmp/out.ts");
        assert_eq!(manager.status(id).unwrap().state, TaskState::Pending);

        let token = manager.start(id).unwrap();
        assert!(!token.is_cancelled());
        assert_eq!(manager.status(id).unwrap().state, TaskState::Running);
        assert!(manager.start(id).is_none());

        manager.finish(id, Ok(summary()));
        let snapshot = manager.status(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Completed);
        assert!(snapshot.result.unwrap().is_success());
    }

    #[test]
    fn cancel_before_start() {
        let manager = TaskManager::default();
        let id = manager.create(source(), "/tmp/out.ts");
        assert_eq!(manager.cancel(id).unwrap(), TaskState::Cancelled);
        assert!(manager.start(id).is_none());

        let result = manager.status(id).unwrap().result.unwrap();
        assert!(result.error().unwrap().is_cancelled());
    }

    #[test]
    fn cancel_running_then_pipeline_aborts() {
        let manager = TaskManager::default();
        let id = manager.create(source(), "/tmp/out.ts");
        let token = manager.start(id).unwrap();

        assert_eq!(manager.cancel(id).unwrap(), TaskState::Cancelling);
        assert!(token.is_cancelled());

        manager.finish(id, Err(DownloadError::malformed_playlist("truncated")));
        assert_eq!(manager.status(id).unwrap().state, TaskState::Cancelled);
    }

    #[test]
    fn success_while_cancelling_completes() {
        let manager = TaskManager::default();
        let id = manager.create(source(), "/tmp/out.ts");
        manager.start(id).unwrap();
        manager.cancel(id).unwrap();

        manager.finish(id, Ok(summary()));
        assert_eq!(manager.status(id).unwrap().state, TaskState::Completed);
        assert_eq!(manager.cancel(id).unwrap(), TaskState::Completed);
    }

    #[test]
    fn failure_is_reported_and_keeps_progress() {
        let reporter = Arc::new(CollectingReporter::default());
        let manager = Arc::new(TaskManager::default().with_reporter(reporter.clone()));
        let id = manager.create(source(), "/tmp/out.ts");
        manager.start(id).unwrap();

        let sink = manager.progress_sink(id);
        sink.on_event(&DownloadEvent::PlaylistResolved {
            total_segments: 4,
            encrypted: false,
            duration_secs: 40.0,
        });
        for sequence in 0..2 {
            sink.on_event(&DownloadEvent::SegmentDownloaded {
                sequence: Some(sequence),
                size: 10,
                retries: 1,
            });
        }

        manager.finish(id, Err(ProcessingError::NoValidSegments.into()));
        let snapshot = manager.status(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.progress.segments_total, 4);
        assert_eq!(snapshot.progress.retries, 2);
        match snapshot.result.unwrap() {
            DownloadResult::Failure {
                segments_completed,
                report,
                ..
            } => {
                assert_eq!(segments_completed, 2);
                assert_eq!(report.code, "no_valid_segments");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(reporter.0.lock().len(), 1);
    }

    /// Reporter that reads the registry back while handling a report.
    #[derive(Default)]
    struct QueryingReporter {
        manager: Mutex<Weak<TaskManager>>,
        seen: Mutex<Vec<TaskState>>,
    }

    impl ErrorReporter for QueryingReporter {
        fn report(&self, _report: &ErrorReport) {
            let Some(manager) = self.manager.lock().upgrade() else {
                return;
            };
            let states = manager.list().into_iter().map(|snapshot| snapshot.state);
            self.seen.lock().extend(states);
        }
    }

    #[test]
    fn reporter_can_query_the_manager() {
        let reporter = Arc::new(QueryingReporter::default());
        let manager = Arc::new(TaskManager::default().with_reporter(reporter.clone()));
        *reporter.manager.lock() = Arc::downgrade(&manager);

        let id = manager.create(source(), "/tmp/out.ts");
        manager.start(id).unwrap();
        manager.finish(id, Err(ProcessingError::NoValidSegments.into()));

        assert_eq!(*reporter.seen.lock(), vec![TaskState::Failed]);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let manager = TaskManager::default();
        let id = TaskId::next();
        assert_eq!(manager.cancel(id).unwrap_err().code(), "task_not_found");
        assert!(manager.status(id).is_err());
        assert!(manager.subscribe(id).is_err());
    }

    #[test]
    fn expired_tasks_are_purged() {
        let manager = TaskManager::new(TaskManagerConfig {
            retention: Duration::ZERO,
        });
        let done = manager.create(source(), "/tmp/a.ts");
        let live = manager.create(source(), "/tmp/b.ts");
        manager.cancel(done).unwrap();

        assert_eq!(manager.purge_expired(), 1);
        assert!(manager.status(done).is_err());
        let ids: Vec<_> = manager.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![live]);
    }

    #[tokio::test]
    async fn wait_returns_terminal_result() {
        let manager = Arc::new(TaskManager::default());
        let id = manager.create(source(), "/tmp/out.ts");
        manager.start(id).unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait(id).await })
        };
        tokio::task::yield_now().await;
        manager.finish(id, Ok(summary()));

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_success());
        assert!(!result.is_partial());
    }
}
