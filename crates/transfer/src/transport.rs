//! Contract between a transport session and the engine that moves bytes.
//!
//! A [`Transport`] negotiates remote uploads and streams chunks. Events for a
//! transfer cycle are reported through the [`EventSink`] handed to
//! [`Transport::resume`]; each sink is bound to exactly one session and one
//! cycle, so late events from an aborted cycle are dropped by the session.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use filmup_protocol::FileRef;

use crate::TransportError;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Where and how to create a remote upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Absolute upload URL. Empty means "not configured".
    pub endpoint: String,
    /// Sent to the server alongside the file.
    pub metadata: BTreeMap<String, String>,
    /// Extra request headers (auth, client upload id).
    pub headers: BTreeMap<String, String>,
}

/// One file plus the options used to upload it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: FileRef,
    pub options: CreateOptions,
}

impl UploadRequest {
    pub fn new(file: FileRef, options: CreateOptions) -> Self {
        Self { file, options }
    }
}

/// Final outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// URL of the finished remote upload.
    pub location: String,
    /// HTTP status of the final request.
    pub status: u16,
    /// Response body of the final request, if it was JSON.
    pub body: Option<serde_json::Value>,
}

/// Engine that moves bytes for transport sessions.
///
/// Implemented over HTTP by [`TusTransport`](crate::TusTransport); tests
/// provide scripted stubs.
pub trait Transport: Send + Sync {
    /// Negotiates a new remote upload and returns its identifier.
    fn create_upload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a, String>;

    /// Continues sending `request.file` from the last offset the server
    /// acknowledged. Returns the ack once streaming has begun; the transfer
    /// itself reports through `sink`.
    fn resume<'a>(
        &'a self,
        upload_id: &'a str,
        request: &'a UploadRequest,
        sink: EventSink,
    ) -> TransportFuture<'a, bool>;

    /// Stops sending chunks for `upload_id`. The remote upload is kept.
    fn abort<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, bool>;
}

/// Event emitted during one transfer cycle.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Progress { written: u64, total: u64 },
    Success(Completion),
    Error(TransportError),
}

/// Receiver of sink events; implemented by the session state.
pub(crate) trait EventTarget: Send + Sync {
    fn deliver(&self, generation: u64, event: TransportEvent);
    fn generation(&self) -> u64;
}

/// Delivery handle for one session's transfer cycle.
#[derive(Clone)]
pub struct EventSink {
    target: Arc<dyn EventTarget>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(target: Arc<dyn EventTarget>, generation: u64) -> Self {
        Self { target, generation }
    }

    /// Reports bytes acknowledged by the server so far.
    pub fn progress(&self, written: u64, total: u64) {
        self.target
            .deliver(self.generation, TransportEvent::Progress { written, total });
    }

    /// Reports that the whole file was accepted. Ends the cycle.
    pub fn success(&self, completion: Completion) {
        self.target
            .deliver(self.generation, TransportEvent::Success(completion));
    }

    /// Reports a transfer failure. Ends the cycle.
    pub fn error(&self, error: TransportError) {
        self.target
            .deliver(self.generation, TransportEvent::Error(error));
    }

    /// `false` once the cycle was aborted or already ended.
    pub fn is_current(&self) -> bool {
        self.target.generation() == self.generation
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTarget;
    use super::*;

    #[test]
    fn sink_goes_stale_after_generation_bump() {
        let target = Arc::new(RecordingTarget::default());
        let sink = target.sink();
        assert!(sink.is_current());

        sink.progress(10, 100);
        target.bump();
        assert!(!sink.is_current());
        sink.progress(20, 100);

        let events = target.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TransportEvent::Progress {
                written: 10,
                total: 100
            }
        ));
    }

    #[test]
    fn create_options_default_is_unconfigured() {
        let opts = CreateOptions::default();
        assert!(opts.endpoint.is_empty());
        assert!(opts.metadata.is_empty());
        assert!(opts.headers.is_empty());
    }
}
