//! Upload queue for many concurrent resumable uploads.
//!
//! An [`UploadQueue`] belongs to one UI context (for example "photos of
//! film 42"). Every enqueued file becomes an [`UploadTask`] and starts
//! transferring immediately through its own transport session; the queue
//! keeps a live, most-recent-first view for the UI and decides what a
//! failure means through the retry [`policy`].
//!
//! # Lifecycle
//!
//! 1. **Enqueue**: the task is prepended and its session started
//! 2. **Progress**: session events update the task, listeners re-render
//! 3. **Success**: the task is removed and `on_terminal` receives the resource
//! 4. **Failure**: the task stays visible as `Failed` with retry/cancel
//! 5. **Cancel**: the transfer is aborted and `on_terminal` receives nothing

pub mod endpoints;
pub mod error;
pub mod journal;
pub mod policy;
pub mod queue;
pub mod types;

pub use endpoints::EndpointDefaults;
pub use error::UploadError;
pub use journal::{JournalEntry, UploadJournal};
pub use policy::{Affordances, ErrorClass, affordances, check_completion, classify};
pub use queue::{QueueListener, TerminalCallback, UploadQueue};
pub use types::{QueueConfig, UploadTask};
