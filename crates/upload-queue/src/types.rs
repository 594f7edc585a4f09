//! Data types for the upload queue.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use filmup_protocol::{ContentKind, FileRef, TaskState, UploadProgress};
use filmup_transfer::format_bytes;
use serde::Serialize;

use crate::endpoints::EndpointDefaults;
use crate::policy::{Affordances, ErrorClass, affordances};

/// Settings of one queue instance.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Label of the UI context the queue serves, used in logs.
    pub context: String,
    /// Content kind used to pick the default endpoint.
    pub kind: ContentKind,
    pub endpoints: EndpointDefaults,
    /// Headers sent with every request (auth).
    pub headers: BTreeMap<String, String>,
    /// Whether a finished upload must return a resource envelope. Plain tus
    /// endpoints answer the last chunk with an empty body.
    pub expect_resource: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            context: "uploads".into(),
            kind: ContentKind::Photo,
            endpoints: EndpointDefaults::default(),
            headers: BTreeMap::new(),
            expect_resource: true,
        }
    }
}

impl QueueConfig {
    /// Config for uploads of `kind`. Film videos go to the bare tus route,
    /// which returns no resource.
    pub fn for_kind(kind: ContentKind, endpoints: EndpointDefaults) -> Self {
        Self {
            kind,
            endpoints,
            expect_resource: kind != ContentKind::FilmVideo,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// One user-intended upload, as shown in the queue view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub task_id: String,
    pub file: FileRef,
    pub params: BTreeMap<String, String>,
    pub endpoint: String,
    pub state: TaskState,
    /// Percent 0-100.
    pub progress: u8,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_upload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    pub enqueued_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(
        task_id: impl Into<String>,
        file: FileRef,
        params: BTreeMap<String, String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let bytes_total = file.size;
        Self {
            task_id: task_id.into(),
            file,
            params,
            endpoint: endpoint.into(),
            state: TaskState::Queued,
            progress: 0,
            bytes_sent: 0,
            bytes_total,
            remote_upload_id: None,
            last_error: None,
            error_class: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn affordances(&self) -> Affordances {
        affordances(self.state, self.error_class)
    }

    /// Status label, e.g. "Uploading" or "Retry".
    pub fn status_text(&self) -> &'static str {
        self.state.status_text()
    }

    /// e.g. "Uploaded 1.5 MB of 10 MB".
    pub fn progress_note(&self) -> String {
        format!(
            "Uploaded {} of {}",
            format_bytes(self.bytes_sent),
            format_bytes(self.bytes_total)
        )
    }

    pub fn to_progress(&self) -> UploadProgress {
        UploadProgress {
            task_id: self.task_id.clone(),
            state: self.state,
            percent: self.progress,
            bytes_sent: self.bytes_sent,
            bytes_total: self.bytes_total,
        }
    }
}
