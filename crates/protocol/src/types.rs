use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{META_FILENAME, META_FILETYPE};

/// Reference to a local file selected for upload.
///
/// Name, MIME type and size are what the picker declared; they are sent to
/// the server as upload metadata and are not re-validated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub path: PathBuf,
    pub mime_type: String,
    pub name: String,
    pub size: u64,
}

impl FileRef {
    /// Creates a file reference from declared values.
    pub fn new(
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        name: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            name: name.into(),
            size,
        }
    }

    /// Builds a reference from a file on disk, detecting MIME type by extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = detect_content_type(&name).unwrap_or("application/octet-stream");
        Ok(Self::new(path, mime_type, name, metadata.len()))
    }

    /// Returns `true` if no path was provided.
    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Upload metadata describing the file itself.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        if !self.name.is_empty() {
            meta.insert(META_FILENAME.to_string(), self.name.clone());
        }
        if !self.mime_type.is_empty() {
            meta.insert(META_FILETYPE.to_string(), self.mime_type.clone());
        }
        meta
    }
}

/// Detects the MIME type of a media file by its extension.
pub fn detect_content_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("heic") => Some("image/heic"),
        Some("mp4" | "m4v") => Some("video/mp4"),
        Some("mov") => Some("video/quicktime"),
        Some("mkv") => Some("video/x-matroska"),
        Some("webm") => Some("video/webm"),
        _ => None,
    }
}

/// Kind of media being uploaded; selects the default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Photo,
    FilmPhoto,
    Avatar,
    Cover,
    FilmVideo,
}

impl ContentKind {
    /// Backend route relative to the API base URL.
    pub fn route(&self) -> &'static str {
        match self {
            Self::Photo => "photo/upload_photo",
            Self::FilmPhoto => "film/upload_film_photo",
            Self::Avatar => "account/upload_avatar",
            Self::Cover => "account/upload_cover",
            Self::FilmVideo => crate::constants::TUS_ROUTE,
        }
    }

    /// Parses the snake_case name used in config files and flags.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(Self::Photo),
            "film_photo" | "film-photo" => Some(Self::FilmPhoto),
            "avatar" => Some(Self::Avatar),
            "cover" => Some(Self::Cover),
            "film_video" | "film-video" => Some(Self::FilmVideo),
            _ => None,
        }
    }
}

/// Lifecycle state of a user-visible upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Enqueued, transport session not started yet.
    Queued,
    /// Negotiating the remote upload.
    Creating,
    /// Chunks are being sent.
    Uploading,
    /// Transfer aborted by the user; resumable.
    Paused,
    /// Retry requested; the session is being restarted.
    Retryable,
    Cancelled,
    Completed,
    /// Last attempt failed; see the task's error class for whether retry is offered.
    Failed,
}

impl TaskState {
    /// `Completed` and `Cancelled` tasks are never resumed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a transfer is currently in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Creating | Self::Uploading | Self::Retryable
        )
    }

    /// Short status label shown next to the progress bar.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Queued => "Waiting",
            Self::Creating | Self::Uploading | Self::Retryable => "Uploading",
            Self::Paused => "Paused",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
            Self::Failed => "Retry",
        }
    }
}

/// Progress snapshot of one task, keyed by its client task id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub task_id: String,
    pub state: TaskState,
    pub percent: u8,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl UploadProgress {
    /// Returns the fraction transferred in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.bytes_total as f64).min(1.0)
    }
}
