//! Upload error types.

use filmup_transfer::TransportError;

/// Errors surfaced by the upload queue.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No endpoint, no file, or a request the server can never accept.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    /// The server no longer knows the remote upload.
    #[error("remote upload expired: {0}")]
    SessionExpired(String),

    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transfer finished but the server confirmed no resource.
    #[error("server did not confirm the uploaded resource")]
    MissingResource,

    #[error("cancelled")]
    Cancelled,

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task {0} cannot be retried")]
    NotRetryable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Converts a borrowed transport error, as delivered to session observers.
    pub fn from_transport(error: &TransportError) -> Self {
        match error {
            TransportError::EndpointMissing
            | TransportError::NoFileProvided
            | TransportError::InvalidHeader(_) => Self::Configuration(error.to_string()),
            TransportError::SessionExpired(id) => Self::SessionExpired(id.clone()),
            TransportError::Http { status, body } => Self::Rejected {
                status: *status,
                message: body.clone(),
            },
            TransportError::ResumeFailed(msg)
            | TransportError::Network(msg)
            | TransportError::Protocol(msg) => Self::Network(msg.clone()),
            TransportError::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<TransportError> for UploadError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Io(e) => Self::Io(e),
            other => Self::from_transport(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_map_to_configuration() {
        let err = UploadError::from(TransportError::EndpointMissing);
        assert!(matches!(err, UploadError::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "configuration error: tus: no endpoint provided"
        );
    }

    #[test]
    fn http_status_is_kept() {
        let err = UploadError::from_transport(&TransportError::Http {
            status: 422,
            body: "bad film id".into(),
        });
        assert!(matches!(err, UploadError::Rejected { status: 422, .. }));
    }

    #[test]
    fn io_error_keeps_kind() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = UploadError::from_transport(&TransportError::Io(source));
        match err {
            UploadError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected {other:?}"),
        }
    }
}
