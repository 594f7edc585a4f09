//! Resumable chunked transfer: per-file transport sessions, the session
//! registry, and a tus 1.0 HTTP transport.
//!
//! A [`TransportSession`] drives one file through a [`Transport`]. Sessions
//! are looked up by a caller-chosen key through an explicitly constructed
//! [`SessionRegistry`], so an in-flight upload outlives whatever UI owned it.

mod chunked;
mod progress;
mod registry;
mod session;
mod transport;
mod tus;
mod validation;

pub use chunked::{Chunk, ChunkReader, checksum_bytes};
pub use progress::{ProgressCounter, SpeedCalculator, format_bytes, percent_of};
pub use registry::SessionRegistry;
pub use session::{SessionObserver, SessionState, TransportSession};
pub use transport::{
    Completion, CreateOptions, EventSink, Transport, TransportFuture, UploadRequest,
};
pub use tus::{TusConfig, TusTransport};
pub use validation::validate_request;

/// Default chunk size: 4 MiB.
///
/// Small enough that a dropped mobile connection loses little progress.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by transports and transport sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("tus: no endpoint provided")]
    EndpointMissing,

    #[error("tus: no file or stream to upload provided")]
    NoFileProvided,

    #[error("error while resuming the upload: {0}")]
    ResumeFailed(String),

    #[error("remote upload expired: {0}")]
    SessionExpired(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    /// `true` when the server no longer recognizes the remote upload.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }

    /// `true` for missing endpoint or file, which no retry can fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::EndpointMissing | Self::NoFileProvided)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Self::Network(e.to_string()),
        }
    }
}
