use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Result flavor used inside task attempts. The driver decides whether a
/// [`TaskError`] is retried or escalated into an [`Error`].
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Fatal, job-level failures. Recoverable conditions (unreadable side-input
/// files, malformed records under the skip policy, task errors with attempts
/// remaining) are handled where they occur and never reach this enum.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The output location already exists. Raised before any task runs so a
    /// conflicting job leaves the existing data untouched.
    #[error("output location {} already exists", .0.display())]
    OutputConflict(PathBuf),

    /// A task kept failing until its attempt budget ran out, or hit an error
    /// that retrying cannot fix.
    #[error("{task} failed after {attempts} attempt(s)")]
    JobFailed {
        task: String,
        attempts: usize,
        #[source]
        source: TaskError,
    },

    #[error("job cancelled")]
    Cancelled,

    /// The driver itself could not set up or enumerate the job: listing
    /// inputs, creating the output or scratch directories.
    #[error("job setup failed: {context}")]
    Setup {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn setup(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Setup { context: context.into(), source }
    }
}

/// Failures raised by one task attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    /// An input record that cannot be decoded as UTF-8 text. Deterministic,
    /// so never retried; the malformed-record policy decides whether it
    /// fails the job at all.
    #[error("malformed record in {} at byte offset {offset}", path.display())]
    Malformed { path: PathBuf, offset: u64 },

    /// Environmental failure: an I/O error or a corrupt intermediate file.
    /// Recomputing the attempt may succeed, so these are retried.
    #[error("{context}")]
    Exec {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The job's cancel token was set while the attempt was running.
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn exec(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TaskError::Exec { context: context.into(), source: Some(source.into()) }
    }

    /// An execution error with no underlying cause to chain, e.g. a framing
    /// violation found while scanning an intermediate file.
    pub fn corrupt(context: impl Into<String>) -> Self {
        TaskError::Exec { context: context.into(), source: None }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Exec { .. })
    }
}
