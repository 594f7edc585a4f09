pub mod constants;
pub mod envelope;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::ApiEnvelope;
pub use types::{ContentKind, FileRef, TaskState, UploadProgress, detect_content_type};
