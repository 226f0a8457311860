//! Download orchestrator - runs version downloads on a shared worker pool
//!
//! Each `start_download` creates a run: the version's task list after
//! reconciliation against the disk. Runs share one priority queue and a
//! bounded set of workers; pause, resume and cancel act on one run or all.

use crate::builder::{BuildOptions, DownloadTaskBuilder, FeatureSet, Platform};
use crate::descriptor::{
    detect_loader, resolve_version, AssetIndex, LocalVersionResolver, ResolvedVersion,
    VersionResolver,
};
use crate::engine::mirror::MirrorPolicy;
use crate::engine::queue::TaskQueue;
use crate::engine::source::{FileSource, HttpFileSource};
use crate::engine::transfer::Transfer;
use crate::engine::verify;
use crate::error::DownloadError;
use crate::layout::StorageLayout;
use chrono::Utc;
use futures::StreamExt;
use lodestone_types::{
    CompletedResult, DownloadCategory, DownloadEvent, DownloadProgress, DownloadSettings,
    DownloadTask, FailedTask, Settings, StorageOptions, TaskPriority, TaskStatus,
    VersionInfoDetail,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Engine options
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Number of concurrent transfers
    pub parallelism: usize,
    /// Attempts per task
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Minimum gap between progress events of one task
    pub progress_interval: Duration,
    pub build: BuildOptions,
    pub platform: Platform,
    pub features: FeatureSet,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_settings(&DownloadSettings::default())
    }
}

impl DownloadOptions {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            parallelism: settings.parallelism.max(1),
            max_retries: settings.max_retries.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            build: BuildOptions {
                storage: StorageOptions {
                    isolate: settings.isolate_versions,
                },
                asset_base_url: settings.asset_base_url.clone(),
                include_log_config: true,
            },
            platform: Platform::current(),
            features: FeatureSet::new(),
        }
    }
}

/// Events buffered per subscriber before the slowest one starts lagging
pub const EVENT_CAPACITY: usize = 8192;

/// Runs version downloads and reports them through a broadcast channel
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl DownloadOrchestrator {
    pub fn new(
        layout: StorageLayout,
        source: Arc<dyn FileSource>,
        resolver: Arc<dyn VersionResolver>,
        options: DownloadOptions,
        mirror: MirrorPolicy,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                options,
                layout,
                source,
                resolver,
                mirror,
                queue: Mutex::new(TaskQueue::new()),
                wake: Notify::new(),
                runs: RwLock::new(HashMap::new()),
                event_tx,
                workers_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// HTTP source, descriptors read from the game directory
    pub fn from_settings(settings: &Settings) -> Result<Self, DownloadError> {
        let download = &settings.download;
        let layout = StorageLayout::new(settings.game_dir.clone());
        let source = HttpFileSource::new(
            Duration::from_secs(download.connect_timeout_secs),
            Duration::from_secs(download.timeout_secs),
        )?;
        let mirror = match &download.mirror_base {
            Some(base) => MirrorPolicy::with_base(base, download.origin_fallback),
            None => MirrorPolicy::none(),
        };
        Ok(Self::new(
            layout.clone(),
            Arc::new(source),
            Arc::new(LocalVersionResolver::new(layout)),
            DownloadOptions::from_settings(download),
            mirror,
        ))
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    /// Subscribe to progress and completion events.
    ///
    /// Progress events are best effort: a receiver that falls more than
    /// `EVENT_CAPACITY` events behind gets `RecvError::Lagged` and misses the
    /// skipped ones, including `Failed` transitions. The `DownloadCompleted`
    /// result always lists every failed task with its error.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start downloading `version_id`, installed as `custom_name` when given.
    ///
    /// Returns `false` when a run with the same install id is already
    /// active. A paused run is resumed instead of restarted.
    pub async fn start_download(
        &self,
        version_id: &str,
        custom_name: Option<&str>,
        storage: Option<StorageOptions>,
    ) -> Result<bool, DownloadError> {
        let inner = &self.inner;
        let install_id = custom_name.unwrap_or(version_id).to_string();

        if let Some(run) = inner.run(&install_id) {
            if run.state() == RunState::Paused {
                return Ok(self.resume(Some(&install_id)));
            }
            info!("Version {} is already downloading", install_id);
            return Ok(false);
        }
        inner.ensure_workers();

        let resolved = resolve_version(inner.resolver.as_ref(), version_id).await?;
        let storage = storage.unwrap_or(inner.options.build.storage);
        let builder = DownloadTaskBuilder::new(
            inner.layout.clone(),
            BuildOptions {
                storage,
                ..inner.options.build.clone()
            },
        );
        let tasks = builder.build_tasks(
            &install_id,
            &resolved.descriptor,
            &inner.options.platform,
            &inner.options.features,
        );
        let detail = version_detail(&inner.layout, &install_id, &resolved, storage);

        let run = Arc::new(Run::new(
            install_id.clone(),
            builder,
            detail,
            inner.shutdown.child_token(),
        ));
        {
            let mut runs = inner.runs.write();
            if runs.contains_key(&install_id) {
                return Ok(false);
            }
            runs.insert(install_id.clone(), Arc::clone(&run));
        }

        info!(
            "Starting download of {} ({} files before assets)",
            install_id,
            tasks.len()
        );
        inner.admit(&run, tasks).await;
        inner.finish_if_done(&run);
        Ok(true)
    }

    /// Pause one run, or all runs when `version_id` is `None`.
    /// Partial files and queue entries are kept.
    pub fn pause(&self, version_id: Option<&str>) -> bool {
        let mut paused = false;
        for run in self.inner.scoped_runs(version_id) {
            if !run.pause() {
                continue;
            }
            paused = true;
            info!("Paused download of {}", run.id);
            for slot in run.slots() {
                if let Some(progress) = slot.transition(TaskStatus::Pending, TaskStatus::Paused) {
                    self.inner.emit_progress(progress);
                }
            }
        }
        paused
    }

    /// Resume paused runs
    pub fn resume(&self, version_id: Option<&str>) -> bool {
        let mut resumed = false;
        for run in self.inner.scoped_runs(version_id) {
            if !run.resume(self.inner.shutdown.child_token()) {
                continue;
            }
            resumed = true;
            info!("Resumed download of {}", run.id);
            for slot in run.slots() {
                if let Some(progress) = slot.transition(TaskStatus::Paused, TaskStatus::Pending) {
                    self.inner.emit_progress(progress);
                }
            }
        }
        if resumed {
            self.inner.wake.notify_waiters();
        }
        resumed
    }

    /// Cancel one run, or all runs when `version_id` is `None`.
    ///
    /// Waits until no transfer of the affected runs is in flight, then
    /// removes the partial and destination files the run produced. Files
    /// that were already valid before the run started are left alone.
    pub async fn cancel(&self, version_id: Option<&str>) -> bool {
        let inner = &self.inner;
        let mut cancelled = false;

        for run in inner.scoped_runs(version_id) {
            if !run.cancel() {
                continue;
            }
            cancelled = true;
            let dropped = inner.queue.lock().remove_version(&run.id);
            debug!("Dropped {} queued tasks of {}", dropped.len(), run.id);

            run.wait_idle().await;

            for slot in run.slots() {
                let snapshot = slot.snapshot();
                remove_if_exists(&snapshot.task.partial_path()).await;
                if slot.is_preexisting() {
                    continue;
                }
                remove_if_exists(&snapshot.task.destination).await;
                if snapshot.task.status != TaskStatus::Failed
                    && snapshot.task.status != TaskStatus::Cancelled
                {
                    let progress = slot.update(|p| p.task.set_status(TaskStatus::Cancelled));
                    inner.emit_progress(progress);
                }
            }

            info!("Cancelled download of {}", run.id);
            inner.finalize(&run);
        }
        cancelled
    }

    /// Snapshots of every task of an unfinished run
    pub fn progress(&self, version_id: &str) -> Vec<DownloadProgress> {
        match self.inner.run(version_id) {
            Some(run) => run.slots().iter().map(|slot| slot.snapshot()).collect(),
            None => Vec::new(),
        }
    }

    /// Number of queued tasks of a run
    pub fn queued(&self, version_id: &str) -> usize {
        self.inner.queue.lock().len_for(version_id)
    }

    pub fn is_running(&self, version_id: &str) -> bool {
        self.inner.run(version_id).is_some()
    }

    /// Stop the workers. In-flight transfers are interrupted and keep
    /// their partial files.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for DownloadOrchestrator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

struct Inner {
    options: DownloadOptions,
    layout: StorageLayout,
    source: Arc<dyn FileSource>,
    resolver: Arc<dyn VersionResolver>,
    mirror: MirrorPolicy,
    queue: Mutex<TaskQueue>,
    wake: Notify,
    runs: RwLock<HashMap<String, Arc<Run>>>,
    event_tx: broadcast::Sender<DownloadEvent>,
    workers_started: AtomicBool,
    shutdown: CancellationToken,
}

impl Inner {
    fn run(&self, version_id: &str) -> Option<Arc<Run>> {
        self.runs.read().get(version_id).cloned()
    }

    fn scoped_runs(&self, version_id: Option<&str>) -> Vec<Arc<Run>> {
        let runs = self.runs.read();
        match version_id {
            Some(id) => runs.get(id).cloned().into_iter().collect(),
            None => runs.values().cloned().collect(),
        }
    }

    fn emit_progress(&self, progress: DownloadProgress) {
        let error = progress.error.clone();
        let _ = self
            .event_tx
            .send(DownloadEvent::ProgressChanged { progress, error });
    }

    fn ensure_workers(self: &Arc<Self>) {
        if self.workers_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let count = self.options.parallelism.max(1);
        info!("Starting {} download workers", count);
        for index in 0..count {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                worker_loop(inner, index).await;
            });
        }
    }

    /// Apply engine-wide settings to freshly built tasks
    fn prepare(&self, tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
        tasks
            .into_iter()
            .map(|mut task| {
                task.max_retries = self.options.max_retries.max(1);
                task.download_url = self.mirror.rewrite(&task.origin_url);
                task
            })
            .collect()
    }

    /// Mark tasks whose destination is already valid as completed
    async fn reconcile(&self, tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
        futures::stream::iter(tasks)
            .map(|mut task| async move {
                if verify::is_valid(&task.destination, task.size, task.sha1.as_deref()).await {
                    debug!("Already present: {:?}", task.destination);
                    task.set_status(TaskStatus::Completed);
                }
                task
            })
            .buffered(self.options.parallelism.max(1))
            .collect()
            .await
    }

    /// Add tasks to a run and queue the ones that still need a transfer
    async fn admit(&self, run: &Arc<Run>, tasks: Vec<DownloadTask>) {
        let tasks = self.reconcile(self.prepare(tasks)).await;
        let ready_index = tasks
            .iter()
            .find(|t| t.category == DownloadCategory::AssetIndex && t.status == TaskStatus::Completed)
            .cloned();

        let mut pending = Vec::new();
        for task in tasks {
            if task.status == TaskStatus::Pending {
                pending.push((task.id, task.priority));
            }
            run.insert(task);
        }

        if let Some(index) = ready_index {
            if let Err(e) = self.expand_assets(run, &index).await {
                warn!("Asset index {:?} is unusable, downloading it again: {}", index.destination, e);
                remove_if_exists(&index.destination).await;
                if let Some(slot) = run.slot(index.id) {
                    slot.reset();
                }
                pending.push((index.id, index.priority));
            }
        }

        self.enqueue(run, pending);
    }

    /// Parse a completed asset index and add its objects to the run
    async fn expand_assets(&self, run: &Arc<Run>, index: &DownloadTask) -> Result<usize, DownloadError> {
        let text = tokio::fs::read_to_string(&index.destination).await?;
        let parsed: AssetIndex = serde_json::from_str(&text)?;
        let tasks = run.builder.build_asset_tasks(&run.id, &parsed);
        let tasks = self.reconcile(self.prepare(tasks)).await;

        let total = tasks.len();
        let mut pending = Vec::new();
        for task in tasks {
            if task.status == TaskStatus::Pending {
                pending.push((task.id, task.priority));
            }
            run.insert(task);
        }
        info!(
            "Asset index of {} lists {} objects, {} to download",
            run.id,
            total,
            pending.len()
        );
        self.enqueue(run, pending);
        Ok(total)
    }

    fn enqueue(&self, run: &Run, tasks: Vec<(Uuid, TaskPriority)>) {
        if tasks.is_empty() {
            return;
        }
        {
            let mut queue = self.queue.lock();
            // Checked under the queue lock so nothing is queued after a
            // cancel has drained the run's entries
            if run.state() == RunState::Cancelled {
                return;
            }
            for (task_id, priority) in tasks {
                queue.push(&run.id, task_id, priority);
            }
        }
        self.wake.notify_waiters();
    }

    /// Pop the next task of an active run and mark it in flight
    fn next_entry(&self) -> Option<(Arc<Run>, Arc<TaskSlot>, CancellationToken)> {
        let mut queue = self.queue.lock();
        let runs = self.runs.read();
        loop {
            let entry = queue.pop_where(|version| {
                runs.get(version)
                    .map(|run| run.state() == RunState::Active)
                    .unwrap_or(false)
            })?;
            let Some(run) = runs.get(&entry.version_id) else {
                continue;
            };
            if let Some(slot) = run.slot(entry.task_id) {
                let token = run.begin();
                return Some((Arc::clone(run), slot, token));
            }
        }
    }

    async fn process(&self, run: &Arc<Run>, slot: &Arc<TaskSlot>, token: CancellationToken) {
        if token.is_cancelled() {
            self.interrupted(run, slot);
            return;
        }

        let progress = slot.update(|p| {
            p.task.set_status(TaskStatus::Downloading);
            if p.started_at.is_none() {
                p.started_at = Some(Utc::now());
            }
        });
        let task = progress.task.clone();
        self.emit_progress(progress);

        let attempt = task.retry_count + 1;
        let url = self.mirror.url_for_attempt(&task, attempt).to_string();
        debug!("Downloading {} (attempt {}/{})", url, attempt, task.max_retries);

        match self.download(run, slot, &task, &url, &token).await {
            Ok(()) => {}
            Err(_) if token.is_cancelled() => self.interrupted(run, slot),
            Err(e) => self.attempt_failed(run, slot, &url, e, &token).await,
        }
    }

    async fn download(
        &self,
        run: &Arc<Run>,
        slot: &Arc<TaskSlot>,
        task: &DownloadTask,
        url: &str,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let partial = task.partial_path();
        Transfer {
            source: self.source.as_ref(),
            url,
            partial: &partial,
            expected_size: task.size,
            cancel: token,
            progress_interval: self.options.progress_interval,
        }
        .run(|bytes| {
            let progress = slot.update(|p| p.set_downloaded(bytes));
            self.emit_progress(progress);
        })
        .await?;

        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let progress = slot.update(|p| p.task.set_status(TaskStatus::Verifying));
        self.emit_progress(progress);

        if let Err(e) = verify::verify_file(&partial, task.size, task.sha1.as_deref()).await {
            if e.is_integrity() {
                remove_if_exists(&partial).await;
            }
            return Err(e);
        }

        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        remove_if_exists(&task.destination).await;
        tokio::fs::rename(&partial, &task.destination).await?;

        // The index stays in Verifying until its assets joined the run, so
        // the run cannot look finished in between
        if task.category == DownloadCategory::AssetIndex {
            self.expand_assets(run, task).await?;
        }

        let progress = slot.update(|p| {
            let size = p.task.size.unwrap_or(p.downloaded_bytes);
            p.set_downloaded(size);
            p.percentage = 100.0;
            p.error = None;
            p.task.set_status(TaskStatus::Completed);
        });
        debug!("Completed {:?}", progress.task.destination);
        self.emit_progress(progress);
        Ok(())
    }

    /// A transfer stopped because its run was paused, cancelled or the
    /// engine is shutting down
    fn interrupted(&self, run: &Arc<Run>, slot: &Arc<TaskSlot>) {
        match run.state() {
            RunState::Cancelled => {
                let progress = slot.update(|p| p.task.set_status(TaskStatus::Cancelled));
                self.emit_progress(progress);
            }
            RunState::Paused => {
                let progress = slot.update(|p| p.task.set_status(TaskStatus::Paused));
                let (id, priority) = (progress.task.id, progress.task.priority);
                self.emit_progress(progress);
                self.enqueue(run, vec![(id, priority)]);
            }
            RunState::Active => {
                let progress = slot.update(|p| p.task.set_status(TaskStatus::Pending));
                let (id, priority) = (progress.task.id, progress.task.priority);
                self.emit_progress(progress);
                self.enqueue(run, vec![(id, priority)]);
            }
        }
    }

    async fn attempt_failed(
        &self,
        run: &Arc<Run>,
        slot: &Arc<TaskSlot>,
        url: &str,
        error: DownloadError,
        token: &CancellationToken,
    ) {
        let task_error = error.to_task_error();
        let progress = slot.update(|p| {
            p.task.retry_count += 1;
            p.error = Some(task_error.clone());
        });

        let retry = error.is_retryable() && progress.task.retry_count < progress.task.max_retries;
        if !retry {
            let progress = slot.update(|p| p.task.set_status(TaskStatus::Failed));
            error!(
                "Failed to download {} after {} attempts: {}",
                progress.task.origin_url, progress.task.retry_count, error
            );
            self.emit_progress(progress);
            return;
        }

        warn!(
            "Attempt {}/{} for {} failed: {}",
            progress.task.retry_count, progress.task.max_retries, url, error
        );
        let progress = slot.update(|p| p.task.set_status(TaskStatus::Pending));
        let (id, priority) = (progress.task.id, progress.task.priority);
        self.emit_progress(progress);

        let interrupted = tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(self.options.retry_delay) => false,
        };
        if interrupted {
            self.interrupted(run, slot);
        } else {
            self.enqueue(run, vec![(id, priority)]);
        }
    }

    fn finish_if_done(&self, run: &Arc<Run>) {
        // Cancel finalizes on its own once the files are gone
        if run.state() == RunState::Cancelled || !run.all_terminal() {
            return;
        }
        self.finalize(run);
    }

    fn finalize(&self, run: &Arc<Run>) {
        if run.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.runs.write().remove(&run.id);

        let result = run.result();
        let success = result.is_success();
        info!(
            "Download of {} finished: {} completed, {} failed, {} cancelled",
            run.id,
            result.success.len(),
            result.failed.len(),
            result.cancelled.len()
        );
        let _ = self.event_tx.send(DownloadEvent::DownloadCompleted(result));
        if success {
            let _ = self
                .event_tx
                .send(DownloadEvent::CompletedInfo(run.detail.clone()));
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, index: usize) {
    debug!("Download worker {} started", index);
    loop {
        let notified = inner.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some((run, slot, token)) = inner.next_entry() {
            inner.process(&run, &slot, token).await;
            run.end();
            inner.finish_if_done(&run);
            continue;
        }

        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = &mut notified => {}
        }
    }
    debug!("Download worker {} stopped", index);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Active,
    Paused,
    Cancelled,
}

struct RunControl {
    state: RunState,
    token: CancellationToken,
}

#[derive(Default)]
struct RunTasks {
    order: Vec<Uuid>,
    slots: HashMap<Uuid, Arc<TaskSlot>>,
}

/// One version's download
struct Run {
    id: String,
    builder: DownloadTaskBuilder,
    detail: VersionInfoDetail,
    tasks: RwLock<RunTasks>,
    control: Mutex<RunControl>,
    in_flight: watch::Sender<usize>,
    finished: AtomicBool,
}

impl Run {
    fn new(
        id: String,
        builder: DownloadTaskBuilder,
        detail: VersionInfoDetail,
        token: CancellationToken,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            id,
            builder,
            detail,
            tasks: RwLock::new(RunTasks::default()),
            control: Mutex::new(RunControl {
                state: RunState::Active,
                token,
            }),
            in_flight,
            finished: AtomicBool::new(false),
        }
    }

    fn state(&self) -> RunState {
        self.control.lock().state
    }

    fn pause(&self) -> bool {
        let mut control = self.control.lock();
        if control.state != RunState::Active {
            return false;
        }
        control.state = RunState::Paused;
        control.token.cancel();
        true
    }

    fn resume(&self, token: CancellationToken) -> bool {
        let mut control = self.control.lock();
        if control.state != RunState::Paused {
            return false;
        }
        control.state = RunState::Active;
        control.token = token;
        true
    }

    fn cancel(&self) -> bool {
        let mut control = self.control.lock();
        if control.state == RunState::Cancelled {
            return false;
        }
        control.state = RunState::Cancelled;
        control.token.cancel();
        true
    }

    /// Mark one task in flight, returning the token that interrupts it
    fn begin(&self) -> CancellationToken {
        let token = self.control.lock().token.clone();
        self.in_flight.send_modify(|n| *n += 1);
        token
    }

    fn end(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn insert(&self, task: DownloadTask) {
        let preexisting = task.status == TaskStatus::Completed;
        let mut progress = DownloadProgress::new(task);
        if preexisting {
            let size = progress.task.size.unwrap_or(0);
            progress.set_downloaded(size);
            progress.percentage = 100.0;
        }
        let id = progress.task.id;
        let slot = Arc::new(TaskSlot {
            progress: RwLock::new(progress),
            preexisting: AtomicBool::new(preexisting),
        });

        let mut tasks = self.tasks.write();
        tasks.order.push(id);
        tasks.slots.insert(id, slot);
    }

    fn slot(&self, id: Uuid) -> Option<Arc<TaskSlot>> {
        self.tasks.read().slots.get(&id).cloned()
    }

    fn slots(&self) -> Vec<Arc<TaskSlot>> {
        let tasks = self.tasks.read();
        tasks
            .order
            .iter()
            .filter_map(|id| tasks.slots.get(id).cloned())
            .collect()
    }

    fn all_terminal(&self) -> bool {
        self.tasks
            .read()
            .slots
            .values()
            .all(|slot| slot.progress.read().task.status.is_terminal())
    }

    fn result(&self) -> CompletedResult {
        let mut result = CompletedResult {
            version_id: self.id.clone(),
            success: Vec::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
        };
        for slot in self.slots() {
            let progress = slot.snapshot();
            match progress.task.status {
                TaskStatus::Completed => result.success.push(progress.task),
                TaskStatus::Failed => result.failed.push(FailedTask {
                    task: progress.task,
                    error: progress.error,
                }),
                _ => result.cancelled.push(progress.task),
            }
        }
        result
    }
}

/// Progress of one task behind its own lock
struct TaskSlot {
    progress: RwLock<DownloadProgress>,
    /// Valid on disk before the run started
    preexisting: AtomicBool,
}

impl TaskSlot {
    fn snapshot(&self) -> DownloadProgress {
        self.progress.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut DownloadProgress)) -> DownloadProgress {
        let mut progress = self.progress.write();
        f(&mut progress);
        progress.clone()
    }

    /// Move from `from` to `to`, returning the new state if it changed
    fn transition(&self, from: TaskStatus, to: TaskStatus) -> Option<DownloadProgress> {
        let mut progress = self.progress.write();
        if progress.task.status != from {
            return None;
        }
        progress.task.set_status(to);
        Some(progress.clone())
    }

    fn is_preexisting(&self) -> bool {
        self.preexisting.load(Ordering::SeqCst)
    }

    /// Back to a fresh pending task
    fn reset(&self) {
        self.preexisting.store(false, Ordering::SeqCst);
        let mut progress = self.progress.write();
        progress.set_downloaded(0);
        progress.task.set_status(TaskStatus::Pending);
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}

fn version_detail(
    layout: &StorageLayout,
    install_id: &str,
    resolved: &ResolvedVersion,
    storage: StorageOptions,
) -> VersionInfoDetail {
    let descriptor = &resolved.descriptor;
    VersionInfoDetail {
        id: install_id.to_string(),
        name: descriptor.id.clone(),
        inherits_from: resolved.root().map(str::to_string),
        version_dir: layout.version_dir(install_id),
        assets_dir: layout.assets_dir(),
        libraries_dir: layout.libraries_dir(install_id, storage),
        natives_dir: layout.natives_dir(install_id),
        release_time: descriptor.release_time,
        java_version: descriptor.java_version.as_ref().map(Into::into),
        main_class: descriptor.main_class.clone(),
        loader: detect_loader(descriptor),
    }
}
