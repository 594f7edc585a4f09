use crate::{TransportError, UploadRequest};

/// Checks that a request names both an endpoint and a readable file.
///
/// Rejects:
/// - An empty endpoint (`EndpointMissing`)
/// - An empty file path, or a path that is not a regular file (`NoFileProvided`)
pub fn validate_request(request: &UploadRequest) -> Result<(), TransportError> {
    if request.options.endpoint.trim().is_empty() {
        return Err(TransportError::EndpointMissing);
    }

    if request.file.is_empty() {
        return Err(TransportError::NoFileProvided);
    }

    match std::fs::metadata(&request.file.path) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(TransportError::NoFileProvided),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CreateOptions;
    use filmup_protocol::FileRef;

    fn request(path: &std::path::Path, endpoint: &str) -> UploadRequest {
        UploadRequest::new(
            FileRef::new(path, "image/jpeg", "a.jpg", 3),
            CreateOptions {
                endpoint: endpoint.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn rejects_missing_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"abc").unwrap();

        let err = validate_request(&request(&path, "  ")).unwrap_err();
        assert!(matches!(err, TransportError::EndpointMissing));
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_empty_file_reference() {
        let req = request(std::path::Path::new(""), "https://api.test/tus");
        assert!(matches!(
            validate_request(&req),
            Err(TransportError::NoFileProvided)
        ));
    }

    #[test]
    fn rejects_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(&dir.path().join("gone.jpg"), "https://api.test/tus");
        assert!(matches!(
            validate_request(&req),
            Err(TransportError::NoFileProvided)
        ));

        // A directory is not an uploadable file either.
        let req = request(dir.path(), "https://api.test/tus");
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn accepts_existing_file_and_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"abc").unwrap();

        assert!(validate_request(&request(&path, "https://api.test/tus")).is_ok());
    }
}
