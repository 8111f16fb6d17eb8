//! Durable at-least-once job queue.
//!
//! Jobs are persisted to append-only journal files; a sliding
//! acknowledgement window bounds in-flight state; a single-owner loop
//! multiplexes push/get/done over the non-threadsafe persister. Every
//! pushed job is delivered at least once; duplicates are possible after a
//! crash.

use std::path::PathBuf;

use thiserror::Error;

mod job;
mod journal;
mod owner;
mod persister;
mod window;

pub use job::Job;
pub use owner::JobQueue;
pub use persister::JournalPersister;
pub use window::AckWindow;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("partial record in journal {path:?}")]
    PartialRecord { path: PathBuf },
    #[error("job record truncated ({got} bytes, need at least 8)")]
    JobTruncated { got: usize },
    #[error("queue owner loop is not running")]
    NotRunning,
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QueueError::Io {
            path: Some(path.into()),
            source,
        }
    }
}
