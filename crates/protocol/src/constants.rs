use std::time::Duration;

/// tus protocol version sent in every request.
pub const TUS_VERSION: &str = "1.0.0";

// tus headers. Must stay lowercase for `HeaderName::from_static`.
pub const HEADER_TUS_RESUMABLE: &str = "tus-resumable";
pub const HEADER_UPLOAD_OFFSET: &str = "upload-offset";
pub const HEADER_UPLOAD_LENGTH: &str = "upload-length";
pub const HEADER_UPLOAD_METADATA: &str = "upload-metadata";
pub const HEADER_UPLOAD_CHECKSUM: &str = "upload-checksum";

/// Client-side upload key, echoed to the backend so it can correlate the
/// tus upload with the record it was created for.
pub const HEADER_UPLOAD_ID: &str = "x-upload-id";

/// Content type required on every `PATCH` request.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Route of the tus endpoint relative to the API base URL.
pub const TUS_ROUTE: &str = "tus";

/// Default per-request timeout applied by the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata key carrying the declared file name.
pub const META_FILENAME: &str = "filename";

/// Metadata key carrying the declared MIME type.
pub const META_FILETYPE: &str = "filetype";
