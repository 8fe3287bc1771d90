use std::time::Duration;

use hlsgrab_engine::{TaskSnapshot, TaskState};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Renders the progress of one task from its snapshot updates.
pub struct ProgressManager {
    bar: Option<ProgressBar>,
}

impl ProgressManager {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(download_style());
        bar.enable_steady_tick(Duration::from_millis(500));
        Self { bar: Some(bar) }
    }

    pub fn new_disabled() -> Self {
        Self { bar: None }
    }

    /// Follow `updates` until the task is terminal.
    pub fn track(self, mut updates: watch::Receiver<TaskSnapshot>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let snapshot = updates.borrow_and_update().clone();
                self.render(&snapshot);
                if snapshot.state.is_terminal() {
                    self.finish(&snapshot);
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn render(&self, snapshot: &TaskSnapshot) {
        let Some(bar) = &self.bar else {
            return;
        };
        let progress = &snapshot.progress;
        bar.set_length(progress.segments_total as u64);
        bar.set_position((progress.segments_completed + progress.segments_skipped) as u64);

        let mut message = format!(
            "{} {}, {} written",
            snapshot.state,
            snapshot.destination.display(),
            HumanBytes(progress.bytes_written)
        );
        if progress.segments_skipped > 0 {
            message.push_str(&format!(", {} skipped", progress.segments_skipped));
        }
        if progress.retries > 0 {
            message.push_str(&format!(", {} retries", progress.retries));
        }
        bar.set_message(message);
    }

    fn finish(&self, snapshot: &TaskSnapshot) {
        let Some(bar) = &self.bar else {
            return;
        };
        match snapshot.state {
            TaskState::Completed => bar.finish_with_message(format!(
                "Finished {} ({})",
                snapshot.destination.display(),
                HumanBytes(snapshot.progress.bytes_written)
            )),
            _ => bar.abandon_with_message(format!("Download {}", snapshot.state)),
        }
    }
}
