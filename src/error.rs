use crate::step::StepCode;
use std::any::Any;
use std::backtrace::Backtrace;
use thiserror::Error;

/// Errors produced by user code: step functions, task initialization and
/// task-level business state.
///
/// A panic inside a step or inside [`Task::init`](crate::Task::init) never
/// unwinds through the runner; it is recovered and turned into
/// [`StepError::Panicked`] carrying the panic message and a backtrace.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    /// The step reported a failure.
    #[error("{details}")]
    Failed {
        /// Details about the failure
        details: String,
    },

    /// The step panicked and the panic was recovered.
    ///
    /// The backtrace is captured after unwinding, where the runner catches
    /// the panic, so it shows the recovery frames rather than the panicking
    /// ones. Use `RUST_BACKTRACE=1` and the panic hook output for the
    /// original location.
    #[error("recovered from panic: {message}, backtrace: {backtrace}")]
    Panicked {
        /// The panic payload rendered as text
        message: String,
        /// Backtrace captured where the panic was recovered
        backtrace: String,
    },

    /// Any other error raised by user code.
    #[error(transparent)]
    Source(Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    /// Creates a [`StepError::Failed`] from a message.
    pub fn failed(details: impl Into<String>) -> Self {
        StepError::Failed {
            details: details.into(),
        }
    }

    /// Wraps an arbitrary error.
    pub fn from_source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StepError::Source(Box::new(err))
    }

    /// Returns `true` if this error came from a recovered panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, StepError::Panicked { .. })
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        StepError::Panicked {
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }
}

impl From<String> for StepError {
    fn from(details: String) -> Self {
        StepError::Failed { details }
    }
}

impl From<&str> for StepError {
    fn from(details: &str) -> Self {
        StepError::failed(details)
    }
}

/// The error side of a step's result.
///
/// `code` decides what the runner does with the failure:
///
/// - `None` marks an unclassified, possibly transient failure. The runner
///   retries it according to the step's [`RetryPolicy`](crate::RetryPolicy)
///   and falls back to [`StepCode::FAILURE`] once retries are exhausted.
/// - `Some(code)` marks a classified failure. The code is routed as-is and
///   no retry happens, even if the policy allows retries.
///
/// # Examples
///
/// ```
/// use taskflow::{StepCode, StepFailure};
///
/// let transient = StepFailure::retryable("connection reset");
/// assert!(transient.code.is_none());
///
/// let classified = StepFailure::with_code("INVALID", "bad payload");
/// assert_eq!(classified.code, Some(StepCode::new("INVALID")));
/// ```
#[derive(Debug)]
pub struct StepFailure {
    /// Routing code for a classified failure, `None` for a retryable one
    pub code: Option<StepCode>,
    /// What went wrong
    pub error: StepError,
}

impl StepFailure {
    /// An unclassified failure that the runner may retry.
    pub fn retryable(error: impl Into<StepError>) -> Self {
        Self {
            code: None,
            error: error.into(),
        }
    }

    /// A classified failure routed on `code` without retrying.
    pub fn with_code(code: impl Into<StepCode>, error: impl Into<StepError>) -> Self {
        let code = code.into();
        Self {
            code: if code.is_empty() { None } else { Some(code) },
            error: error.into(),
        }
    }
}

impl From<StepError> for StepFailure {
    fn from(error: StepError) -> Self {
        Self::retryable(error)
    }
}

impl From<String> for StepFailure {
    fn from(details: String) -> Self {
        Self::retryable(details)
    }
}

impl From<&str> for StepFailure {
    fn from(details: &str) -> Self {
        Self::retryable(details)
    }
}

/// Errors returned by the runner and the graph renderer.
///
/// Step failures are not part of this enum: they are routed through the
/// step's route table and recorded in the run trace. Only driver-level
/// problems surface here.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]`; always include a wildcard arm:
///
/// ```
/// use taskflow::TaskflowError;
///
/// fn handle_error(error: TaskflowError) {
///     match error {
///         TaskflowError::Init { task, source } => {
///             eprintln!("Task {} could not start: {}", task, source);
///         }
///         TaskflowError::DecodeRunSteps(e) => {
///             eprintln!("Bad run steps: {}", e);
///         }
///         _ => eprintln!("Error: {}", error),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TaskflowError {
    /// `Task::init` returned an error or panicked. No step was executed.
    #[error("Task '{task}' init failed: {source}")]
    Init {
        /// The name of the task
        task: String,
        /// What init reported
        #[source]
        source: StepError,
    },

    /// A serialized run trace could not be decoded.
    #[error("Invalid run steps JSON: {0}")]
    DecodeRunSteps(#[source] serde_json::Error),

    /// A run trace could not be serialized.
    #[error("Failed to encode run steps: {0}")]
    EncodeRunSteps(#[source] serde_json::Error),
}
