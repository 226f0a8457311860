//! Progress bars for version downloads

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use lodestone_types::{DownloadProgress, TaskStatus};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    status: TaskStatus,
    downloaded: u64,
    size: u64,
}

/// Aggregates task progress into a file bar and a byte bar
pub struct VersionProgress {
    multi: MultiProgress,
    files: ProgressBar,
    bytes: ProgressBar,
    tasks: HashMap<Uuid, TaskEntry>,
    downloaded: u64,
    total: u64,
    completed: u64,
}

impl VersionProgress {
    pub fn new(version_id: &str, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let multi = MultiProgress::with_draw_target(target);

        let files = multi.add(ProgressBar::new(0));
        files.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg:12} [{bar:40.cyan/blue}] {pos}/{len} files")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        files.set_message(version_id.to_string());
        files.enable_steady_tick(Duration::from_millis(120));

        let bytes = multi.add(ProgressBar::new(0));
        bytes.set_style(
            ProgressStyle::with_template("  {bytes:>12}/{total_bytes:12} {bytes_per_sec:>12} {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        Self {
            multi,
            files,
            bytes,
            tasks: HashMap::new(),
            downloaded: 0,
            total: 0,
            completed: 0,
        }
    }

    /// Fold one progress event into the bars
    pub fn update(&mut self, progress: &DownloadProgress) {
        let task = &progress.task;
        let next = TaskEntry {
            status: task.status,
            downloaded: progress.downloaded_bytes,
            size: task.size.unwrap_or(0),
        };
        let previous = self.tasks.insert(task.id, next);

        match previous {
            Some(prev) => {
                self.downloaded = self.downloaded - prev.downloaded + next.downloaded;
                self.total = self.total - prev.size + next.size;
                if prev.status == TaskStatus::Completed {
                    self.completed -= 1;
                }
            }
            None => {
                self.downloaded += next.downloaded;
                self.total += next.size;
                self.files.set_length(self.tasks.len() as u64);
            }
        }
        if next.status == TaskStatus::Completed {
            self.completed += 1;
        }

        self.files.set_position(self.completed);
        self.bytes.set_length(self.total);
        self.bytes.set_position(self.downloaded);

        match task.status {
            TaskStatus::Failed => {
                let reason = progress
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("Unknown error");
                let _ = self.multi.println(format!(
                    "{} {}: {}",
                    style("✗").red().bold(),
                    task.origin_url,
                    reason
                ));
            }
            TaskStatus::Paused => self.files.set_message(format!("{} Paused", style("⏸").yellow())),
            _ => {}
        }
    }

    pub fn finish(&self) {
        self.files.finish_and_clear();
        self.bytes.finish_and_clear();
    }

    pub fn abandon(&self, message: &str) {
        self.files.abandon_with_message(message.to_string());
        self.bytes.abandon();
    }
}
