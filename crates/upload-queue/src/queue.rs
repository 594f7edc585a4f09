//! Upload queue manager.
//!
//! Fans out one transport session per task and keeps an ordered view
//! (most recent first) for the UI. Tasks are keyed by `task_id`
//! everywhere: in the registry, in events and in listener updates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use filmup_protocol::constants::HEADER_UPLOAD_ID;
use filmup_protocol::{FileRef, TaskState};
use filmup_transfer::{
    Completion, CreateOptions, ProgressCounter, SessionObserver, SessionRegistry, SessionState,
    TransportError, TransportSession, UploadRequest,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::UploadError;
use crate::journal::{JournalEntry, UploadJournal};
use crate::policy::{ErrorClass, check_completion, classify};
use crate::types::{QueueConfig, UploadTask};

/// Called with the full task list after every change.
pub type QueueListener = Box<dyn Fn(&[UploadTask]) + Send + Sync>;

/// Called once per task when it leaves the queue: with the server resource
/// on success, with `None` on cancel.
pub type TerminalCallback = Box<dyn Fn(&str, Option<&serde_json::Value>) + Send + Sync>;

/// Queue of concurrent uploads bound to one UI context.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    registry: Arc<SessionRegistry>,
    config: QueueConfig,
    tasks: Mutex<Vec<UploadTask>>,
    /// Bumped under the `tasks` lock on every change.
    version: AtomicU64,
    /// Version of the last snapshot handed to listeners.
    delivered: Mutex<u64>,
    listeners: RwLock<Vec<QueueListener>>,
    terminal: RwLock<Vec<TerminalCallback>>,
    journal: RwLock<Option<Arc<UploadJournal>>>,
}

/// Routes one session's events to its task.
struct TaskObserver {
    queue: Weak<QueueInner>,
}

impl SessionObserver for TaskObserver {
    fn on_state_changed(&self, key: &str, state: SessionState) {
        if let Some(queue) = self.queue.upgrade() {
            queue.session_state(key, state);
        }
    }

    fn on_progress(&self, key: &str, progress: ProgressCounter) {
        if let Some(queue) = self.queue.upgrade() {
            queue.update(key, |task| {
                task.progress = progress.percent();
                task.bytes_sent = progress.sent();
                if progress.total() > 0 {
                    task.bytes_total = progress.total();
                }
            });
        }
    }

    fn on_success(&self, key: &str, completion: &Completion) {
        if let Some(queue) = self.queue.upgrade() {
            queue.task_finished(key, completion);
        }
    }

    fn on_error(&self, key: &str, error: &TransportError) {
        if let Some(queue) = self.queue.upgrade() {
            queue.task_failed(key, UploadError::from_transport(error));
        }
    }
}

impl QueueInner {
    fn lock_tasks(&self) -> MutexGuard<'_, Vec<UploadTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal(&self) -> Option<Arc<UploadJournal>> {
        self.journal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshots the list and hands it to listeners once `tasks` is unlocked.
    fn publish(&self, tasks: MutexGuard<'_, Vec<UploadTask>>) {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = tasks.clone();
        drop(tasks);
        self.notify(version, &snapshot);
    }

    /// Delivers snapshots in version order. A snapshot overtaken by a newer
    /// one is dropped so listeners never end on a stale view.
    fn notify(&self, version: u64, snapshot: &[UploadTask]) {
        let mut delivered = self.delivered.lock().unwrap_or_else(PoisonError::into_inner);
        if version <= *delivered {
            debug!(version, latest = *delivered, "dropping overtaken queue snapshot");
            return;
        }
        *delivered = version;
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(snapshot);
        }
    }

    fn notify_terminal(&self, task_id: &str, resource: Option<&serde_json::Value>) {
        let callbacks = self.terminal.read().unwrap_or_else(PoisonError::into_inner);
        for cb in callbacks.iter() {
            cb(task_id, resource);
        }
    }

    /// Applies `f` to the task and notifies listeners. Unknown ids are ignored.
    fn update<F>(&self, task_id: &str, f: F) -> Option<UploadTask>
    where
        F: FnOnce(&mut UploadTask),
    {
        let mut tasks = self.lock_tasks();
        let task = tasks.iter_mut().find(|t| t.task_id == task_id)?;
        f(task);
        let task = task.clone();
        self.publish(tasks);
        Some(task)
    }

    fn remove(&self, task_id: &str) -> Option<UploadTask> {
        let mut tasks = self.lock_tasks();
        let index = tasks.iter().position(|t| t.task_id == task_id)?;
        let removed = tasks.remove(index);
        self.publish(tasks);
        Some(removed)
    }

    fn record(&self, task: &UploadTask) {
        if let Some(journal) = self.journal()
            && let Err(e) = journal.upsert(JournalEntry::from(task))
        {
            warn!(task = %task.task_id, error = %e, "failed to write upload journal");
        }
    }

    fn forget(&self, task_id: &str) {
        if let Some(journal) = self.journal()
            && let Err(e) = journal.forget(task_id)
        {
            warn!(task = %task_id, error = %e, "failed to write upload journal");
        }
    }

    fn session_state(&self, task_id: &str, state: SessionState) {
        let task_state = match state {
            SessionState::Idle => TaskState::Queued,
            SessionState::Creating => TaskState::Creating,
            SessionState::Uploading => TaskState::Uploading,
            SessionState::Paused => TaskState::Paused,
            // Terminal outcomes arrive through on_success / on_error / cancel.
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled => return,
        };

        let remote_id = self
            .registry
            .get_session(task_id)
            .and_then(|s| s.remote_upload_id());
        let updated = self.update(task_id, |task| {
            task.state = task_state;
            if task_state == TaskState::Creating {
                task.remote_upload_id = None;
            } else if remote_id.is_some() {
                task.remote_upload_id = remote_id.clone();
            }
            if task_state != TaskState::Paused {
                task.last_error = None;
                task.error_class = None;
            }
        });

        if task_state == TaskState::Uploading
            && let Some(task) = updated
        {
            self.record(&task);
        }
    }

    fn task_finished(&self, task_id: &str, completion: &Completion) {
        let resource = match check_completion(completion) {
            Ok(resource) => resource,
            Err(UploadError::MissingResource)
                if !self.config.expect_resource && completion.body.is_none() =>
            {
                serde_json::json!({ "location": completion.location })
            }
            Err(e) => {
                self.task_failed(task_id, e);
                return;
            }
        };

        self.registry.remove_session(task_id);
        self.forget(task_id);
        self.update(task_id, |task| {
            task.state = TaskState::Completed;
            task.progress = 100;
            task.bytes_sent = task.bytes_total;
        });
        if self.remove(task_id).is_none() {
            debug!(task = %task_id, "finished task already removed");
            return;
        }
        info!(
            context = %self.config.context,
            task = %task_id,
            location = %completion.location,
            "upload completed"
        );
        self.notify_terminal(task_id, Some(&resource));
    }

    fn task_failed(&self, task_id: &str, error: UploadError) {
        let class = classify(&error);
        warn!(
            context = %self.config.context,
            task = %task_id,
            class = ?class,
            error = %error,
            "upload failed"
        );
        self.update(task_id, |task| {
            task.state = TaskState::Failed;
            task.last_error = Some(error.to_string());
            task.error_class = Some(class);
        });
    }

    fn request_for(&self, task: &UploadTask) -> UploadRequest {
        let mut headers = self.config.headers.clone();
        headers.insert(HEADER_UPLOAD_ID.to_string(), task.task_id.clone());
        UploadRequest::new(
            task.file.clone(),
            CreateOptions {
                endpoint: task.endpoint.clone(),
                metadata: task.params.clone(),
                headers,
            },
        )
    }

    /// Registers (or finds) the task's session with this queue as observer.
    /// A fresh session picks up the task's remote upload, if any.
    fn attach(self: &Arc<Self>, task: &UploadTask) -> Arc<TransportSession> {
        let session = self.registry.add_session(&task.task_id);
        session.set_observer(Arc::new(TaskObserver {
            queue: Arc::downgrade(self),
        }));
        if !session.has_file() {
            session.init(self.request_for(task));
            if let Some(remote_id) = &task.remote_upload_id {
                session.restore_remote_id(remote_id.clone());
            }
        }
        session
    }
}

impl UploadQueue {
    pub fn new(registry: Arc<SessionRegistry>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                registry,
                config,
                tasks: Mutex::new(Vec::new()),
                version: AtomicU64::new(0),
                delivered: Mutex::new(0),
                listeners: RwLock::new(Vec::new()),
                terminal: RwLock::new(Vec::new()),
                journal: RwLock::new(None),
            }),
        }
    }

    /// Persists unfinished tasks to `journal` from now on.
    pub fn with_journal(self, journal: Arc<UploadJournal>) -> Self {
        *self
            .inner
            .journal
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(journal);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Prepends a task for `file` and starts uploading it.
    ///
    /// `endpoint` defaults to the configured endpoint for the queue's content
    /// kind. Returns once the transfer is under way; failures end up on the
    /// task, not in the return value.
    pub async fn enqueue(
        &self,
        file: FileRef,
        params: BTreeMap<String, String>,
        endpoint: Option<String>,
    ) -> String {
        let task_id = Uuid::new_v4().to_string();
        let endpoint = endpoint
            .or_else(|| self.inner.config.endpoints.resolve(self.inner.config.kind))
            .unwrap_or_default();
        let task = UploadTask::new(task_id.clone(), file, params, endpoint);

        {
            let mut tasks = self.inner.lock_tasks();
            tasks.insert(0, task.clone());
            self.inner.publish(tasks);
        }
        self.inner.record(&task);
        debug!(
            context = %self.inner.config.context,
            task = %task_id,
            file = %task.file.name,
            "upload enqueued"
        );

        let session = self.inner.attach(&task);
        session.start().await;
        task_id
    }

    /// Restarts a failed or paused task, reusing its remote upload if any.
    pub async fn retry(&self, task_id: &str) -> Result<(), UploadError> {
        let task = self
            .get(task_id)
            .ok_or_else(|| UploadError::UnknownTask(task_id.to_string()))?;
        let allowed = match task.state {
            TaskState::Paused => true,
            TaskState::Failed => task.error_class != Some(ErrorClass::Fatal),
            _ => false,
        };
        if !allowed {
            return Err(UploadError::NotRetryable(task_id.to_string()));
        }

        let session = self.inner.attach(&task);
        if session.state() == SessionState::Completed {
            // Finished without a usable resource: upload again from scratch.
            session.reset();
        }
        self.inner.update(task_id, |t| {
            t.state = TaskState::Retryable;
            t.last_error = None;
            t.error_class = None;
        });
        info!(task = %task_id, "retrying upload");
        session.start().await;
        Ok(())
    }

    /// Aborts the transfer but keeps the task and its remote upload.
    pub async fn pause(&self, task_id: &str) -> Result<bool, UploadError> {
        if self.get(task_id).is_none() {
            return Err(UploadError::UnknownTask(task_id.to_string()));
        }
        Ok(self.inner.registry.pause(task_id).await)
    }

    /// Aborts the transfer, drops the task and reports `None` to terminal
    /// callbacks.
    pub async fn cancel(&self, task_id: &str) -> Result<(), UploadError> {
        if self.get(task_id).is_none() {
            return Err(UploadError::UnknownTask(task_id.to_string()));
        }

        if let Some(session) = self.inner.registry.get_session(task_id) {
            session.clear_observer();
            if let Err(e) = session.cancel().await {
                debug!(task = %task_id, error = %e, "abort on cancel failed");
            }
        }
        self.inner.registry.remove_session(task_id);
        self.inner.forget(task_id);
        self.inner.update(task_id, |task| task.state = TaskState::Cancelled);
        self.inner.remove(task_id);

        info!(context = %self.inner.config.context, task = %task_id, "upload cancelled");
        self.inner.notify_terminal(task_id, None);
        Ok(())
    }

    /// Registers a listener fired on every enqueue, progress and terminal
    /// transition. Snapshots arrive in the order the changes happened.
    ///
    /// Listeners run one at a time and must not mutate the queue.
    pub fn subscribe(&self, listener: QueueListener) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn on_terminal(&self, callback: TerminalCallback) {
        self.inner
            .terminal
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Current tasks, most recent first.
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.inner.lock_tasks().clone()
    }

    pub fn get(&self, task_id: &str) -> Option<UploadTask> {
        self.inner
            .lock_tasks()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-registers every journaled task not already queued and resumes it
    /// through its remote upload id. Returns the number of restored tasks.
    pub async fn restore(&self) -> Result<usize, UploadError> {
        let Some(journal) = self.inner.journal() else {
            return Ok(0);
        };

        let restored = {
            let mut tasks = self.inner.lock_tasks();
            let mut restored = Vec::new();
            // Journal order is newest first; append keeps it.
            for entry in journal.entries() {
                if tasks.iter().any(|t| t.task_id == entry.task_id) {
                    continue;
                }
                let mut task = UploadTask::new(
                    entry.task_id,
                    entry.file,
                    entry.params,
                    entry.endpoint,
                );
                task.state = TaskState::Paused;
                task.remote_upload_id = entry.remote_upload_id;
                tasks.push(task.clone());
                restored.push(task);
            }
            if !restored.is_empty() {
                self.inner.publish(tasks);
            }
            restored
        };
        if restored.is_empty() {
            return Ok(0);
        }

        for task in &restored {
            let session = self.inner.attach(task);
            info!(task = %task.task_id, remote = ?task.remote_upload_id, "restoring upload");
            session.start().await;
        }
        Ok(restored.len())
    }

    /// Pauses every running transfer and detaches all sessions. Tasks keep
    /// their remote upload, so `retry` resumes them; journaled tasks stay in
    /// the journal for a later `restore`.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .snapshot()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        for task_id in &ids {
            if let Some(session) = self.inner.registry.get_session(task_id) {
                session.clear_observer();
                if session.state().is_running() {
                    if let Err(e) = session.abort().await {
                        debug!(task = %task_id, error = %e, "abort on shutdown failed");
                    }
                    let remote_id = session.remote_upload_id();
                    self.inner.update(task_id, |task| {
                        task.state = TaskState::Paused;
                        if remote_id.is_some() {
                            task.remote_upload_id = remote_id;
                        }
                    });
                }
            }
            self.inner.registry.remove_session(task_id);
        }
        debug!(context = %self.inner.config.context, tasks = ids.len(), "queue shut down");
    }
}
