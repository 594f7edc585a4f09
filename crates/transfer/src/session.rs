//! Per-file transport session state machine.
//!
//! ```text
//! Idle -(create)-> Creating -(ack)-> Uploading -(abort)-> Paused -(resume)-> Uploading
//!                                    Uploading -(stream ends)-> Completed
//! ```
//!
//! Any failure while creating or uploading moves the session to `Failed`.
//! Every resume cycle gets its own [`EventSink`]; aborting or reaching a
//! terminal event retires the cycle, so late events are discarded and at
//! most one of `on_success`/`on_error` fires per cycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::progress::ProgressCounter;
use crate::transport::{EventTarget, TransportEvent};
use crate::validation::validate_request;
use crate::{Completion, EventSink, Transport, TransportError, UploadRequest};

/// Lifecycle state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Creating,
    Uploading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Completed and cancelled sessions are never resumed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Creating | Self::Uploading)
    }
}

/// Receives the events of one session.
///
/// Called without any session lock held, so implementations may call back
/// into the session.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _key: &str, _state: SessionState) {}

    fn on_progress(&self, key: &str, progress: ProgressCounter);

    fn on_success(&self, key: &str, completion: &Completion);

    fn on_error(&self, key: &str, error: &TransportError);
}

struct Shared {
    key: String,
    inner: Mutex<Inner>,
}

struct Inner {
    state: SessionState,
    request: Option<UploadRequest>,
    remote_id: Option<String>,
    progress: ProgressCounter,
    generation: u64,
    observer: Option<Arc<dyn SessionObserver>>,
    location: Option<String>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.lock().observer.clone()
    }

    fn emit_state(&self, state: SessionState) {
        if let Some(observer) = self.observer() {
            observer.on_state_changed(&self.key, state);
        }
    }

    /// Moves to `state` and notifies if it changed.
    fn transition(&self, state: SessionState) {
        let changed = {
            let mut inner = self.lock();
            let changed = inner.state != state;
            inner.state = state;
            changed
        };
        if changed {
            self.emit_state(state);
        }
    }
}

impl EventTarget for Shared {
    fn deliver(&self, generation: u64, event: TransportEvent) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(session = %self.key, generation, "dropping event from retired cycle");
            return;
        }

        match event {
            TransportEvent::Progress { written, total } => {
                if !inner.progress.advance(written, total) {
                    return;
                }
                let progress = inner.progress;
                let observer = inner.observer.clone();
                drop(inner);

                if let Some(observer) = observer {
                    observer.on_progress(&self.key, progress);
                }
            }
            TransportEvent::Success(completion) => {
                inner.generation += 1;
                inner.state = SessionState::Completed;
                let total = inner.progress.total();
                inner.progress.advance(total, total);
                inner.location = Some(completion.location.clone());
                let observer = inner.observer.clone();
                drop(inner);

                info!(session = %self.key, location = %completion.location, "transfer finished");
                if let Some(observer) = observer {
                    observer.on_state_changed(&self.key, SessionState::Completed);
                    observer.on_success(&self.key, &completion);
                }
            }
            TransportEvent::Error(error) => {
                inner.generation += 1;
                inner.state = SessionState::Failed;
                let observer = inner.observer.clone();
                drop(inner);

                warn!(session = %self.key, error = %error, "transfer failed");
                if let Some(observer) = observer {
                    observer.on_state_changed(&self.key, SessionState::Failed);
                    observer.on_error(&self.key, &error);
                }
            }
        }
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }
}

/// One physical upload of one file through a [`Transport`].
pub struct TransportSession {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl TransportSession {
    pub fn new(key: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                key: key.into(),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    request: None,
                    remote_id: None,
                    progress: ProgressCounter::default(),
                    generation: 0,
                    observer: None,
                    location: None,
                }),
            }),
            transport,
        }
    }

    /// Binds the file and create options this session uploads.
    pub fn init(&self, request: UploadRequest) {
        let mut inner = self.shared.lock();
        if inner.remote_id.is_none() {
            inner.progress.reset(request.file.size);
        }
        inner.request = Some(request);
    }

    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.shared.lock().observer = Some(observer);
    }

    pub fn clear_observer(&self) {
        self.shared.lock().observer = None;
    }

    /// Negotiates a new remote upload. Progress returns to 0.
    pub async fn create(&self) -> Result<String, TransportError> {
        let request = self.request().ok_or(TransportError::NoFileProvided)?;
        if let Err(e) = validate_request(&request) {
            self.shared.transition(SessionState::Failed);
            return Err(e);
        }

        let (progress, observer) = {
            let mut inner = self.shared.lock();
            inner.state = SessionState::Creating;
            inner.remote_id = None;
            inner.location = None;
            inner.progress.reset(request.file.size);
            (inner.progress, inner.observer.clone())
        };
        if let Some(observer) = observer {
            observer.on_state_changed(self.key(), SessionState::Creating);
            observer.on_progress(self.key(), progress);
        }

        match self.transport.create_upload(&request).await {
            Ok(upload_id) => {
                let proceed = {
                    let mut inner = self.shared.lock();
                    inner.remote_id = Some(upload_id.clone());
                    inner.state == SessionState::Creating
                };
                info!(session = %self.key(), upload = %upload_id, "remote upload created");
                if proceed {
                    self.shared.transition(SessionState::Uploading);
                }
                Ok(upload_id)
            }
            Err(e) => {
                if self.state() == SessionState::Creating {
                    self.shared.transition(SessionState::Failed);
                }
                Err(e)
            }
        }
    }

    /// Continues the remote upload from the last acknowledged offset.
    ///
    /// Progress is kept; the transport reports from the server's offset on.
    pub async fn resume(&self) -> Result<(), TransportError> {
        let (upload_id, request, generation) = {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                debug!(session = %self.shared.key, state = ?inner.state, "resume ignored");
                return Ok(());
            }
            let Some(upload_id) = inner.remote_id.clone() else {
                return Err(TransportError::ResumeFailed(
                    "no remote upload to resume".into(),
                ));
            };
            let Some(request) = inner.request.clone() else {
                return Err(TransportError::NoFileProvided);
            };
            inner.generation += 1;
            (upload_id, request, inner.generation)
        };
        self.shared.transition(SessionState::Uploading);

        let target: Arc<dyn EventTarget> = self.shared.clone();
        let sink = EventSink::new(target, generation);
        let error = match self.transport.resume(&upload_id, &request, sink).await {
            Ok(true) => {
                debug!(session = %self.key(), upload = %upload_id, "resume acknowledged");
                return Ok(());
            }
            Ok(false) => TransportError::ResumeFailed(format!(
                "transport did not acknowledge {upload_id}"
            )),
            Err(e) => e,
        };

        let retired = {
            let mut inner = self.shared.lock();
            if inner.generation == generation {
                inner.generation += 1;
                true
            } else {
                false
            }
        };
        if retired {
            self.shared.transition(SessionState::Failed);
        }
        Err(error)
    }

    /// Creates the remote upload if needed, then resumes it.
    ///
    /// Never fails: errors go to the observer's `on_error`. A resume the
    /// server rejects as expired falls back to one fresh create.
    pub async fn start(&self) {
        let (state, has_remote) = {
            let inner = self.shared.lock();
            (inner.state, inner.remote_id.is_some())
        };
        if state.is_terminal() || state.is_running() {
            debug!(session = %self.key(), ?state, "start ignored");
            return;
        }

        if !has_remote && !self.create_for_start().await {
            return;
        }

        match self.resume().await {
            Ok(()) => {}
            Err(e) if e.is_expired() => {
                warn!(
                    session = %self.key(),
                    error = %e,
                    "remote upload expired, creating a new one"
                );
                self.shared.lock().remote_id = None;
                if !self.create_for_start().await {
                    return;
                }
                if let Err(e) = self.resume().await {
                    self.report(e);
                }
            }
            Err(e) => self.report(e),
        }
    }

    /// Runs `create` on behalf of `start`; `true` when chunks should follow.
    async fn create_for_start(&self) -> bool {
        if let Err(e) = self.create().await {
            self.report(e);
            return false;
        }
        self.state() == SessionState::Uploading
    }

    fn report(&self, error: TransportError) {
        let observer = {
            let mut inner = self.shared.lock();
            if matches!(inner.state, SessionState::Paused | SessionState::Cancelled) {
                debug!(session = %self.shared.key, error = %error, "error after abort ignored");
                return;
            }
            inner.state = SessionState::Failed;
            inner.observer.clone()
        };
        warn!(session = %self.key(), error = %error, "upload attempt failed");
        if let Some(observer) = observer {
            observer.on_error(self.key(), &error);
        }
    }

    /// Stops the in-flight transfer. The remote upload id is kept so a
    /// later `resume` continues the same upload.
    pub async fn abort(&self) -> Result<bool, TransportError> {
        let (upload_id, paused) = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            (inner.remote_id.clone(), inner.state.is_running())
        };
        if paused {
            self.shared.transition(SessionState::Paused);
        }

        let Some(upload_id) = upload_id else {
            return Ok(false);
        };
        let ack = self.transport.abort(&upload_id).await?;
        debug!(session = %self.key(), upload = %upload_id, ack, "abort requested");
        Ok(ack)
    }

    /// Aborts and marks the session cancelled. It will not start again.
    pub async fn cancel(&self) -> Result<bool, TransportError> {
        let (upload_id, running) = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Completed {
                return Ok(false);
            }
            inner.generation += 1;
            (inner.remote_id.clone(), inner.state.is_running())
        };
        self.shared.transition(SessionState::Cancelled);

        match upload_id {
            Some(upload_id) if running => self.transport.abort(&upload_id).await,
            _ => Ok(false),
        }
    }

    /// Forgets the remote upload so the next `start` creates a new one.
    pub fn reset(&self) {
        {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.remote_id = None;
            inner.location = None;
            let total = inner.request.as_ref().map_or(0, |r| r.file.size);
            inner.progress.reset(total);
        }
        self.shared.transition(SessionState::Idle);
    }

    /// Reattaches a remote upload id persisted by a previous run.
    pub fn restore_remote_id(&self, upload_id: impl Into<String>) {
        self.shared.lock().remote_id = Some(upload_id.into());
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn remote_upload_id(&self) -> Option<String> {
        self.shared.lock().remote_id.clone()
    }

    pub fn progress(&self) -> ProgressCounter {
        self.shared.lock().progress
    }

    /// `true` once a non-empty file reference is bound.
    pub fn has_file(&self) -> bool {
        self.shared
            .lock()
            .request
            .as_ref()
            .is_some_and(|r| !r.file.is_empty())
    }

    /// Location of the finished upload, once completed.
    pub fn location(&self) -> Option<String> {
        self.shared.lock().location.clone()
    }

    pub fn request(&self) -> Option<UploadRequest> {
        self.shared.lock().request.clone()
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("TransportSession")
            .field("key", &self.shared.key)
            .field("state", &inner.state)
            .field("remote_id", &inner.remote_id)
            .field("progress", &inner.progress)
            .finish()
    }
}
