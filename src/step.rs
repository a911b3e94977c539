use crate::error::{StepError, StepFailure};
use crate::task::Task;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Type-safe step key wrapper.
///
/// Identifies a step inside a task's step configuration map and is used as
/// a routing target.
///
/// # Examples
///
/// ```
/// use taskflow::StepKey;
///
/// let key = StepKey::new("validate");
/// assert_eq!(key.as_str(), "validate");
///
/// // From trait for ergonomic conversion
/// let key: StepKey = "persist".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(String);

impl StepKey {
    /// Creates a new StepKey
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the step key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty key, which routes to the end of the run
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Result code returned by a step.
///
/// Codes are opaque to the runner except for [`StepCode::FAILURE`], which
/// the runner produces itself when a step panics or exhausts its retries.
///
/// # Examples
///
/// ```
/// use taskflow::StepCode;
///
/// assert_eq!(StepCode::SUCCESS.as_str(), "SUCCESS");
/// assert_eq!(StepCode::new("CUSTOM"), StepCode::from("CUSTOM"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepCode(Cow<'static, str>);

impl StepCode {
    /// The step did its work.
    pub const SUCCESS: StepCode = StepCode::from_static("SUCCESS");
    /// The step failed without a more specific code, or panicked.
    pub const FAILURE: StepCode = StepCode::from_static("FAILURE");
    /// Caller-defined jump codes.
    pub const JUMP1: StepCode = StepCode::from_static("JUMP1");
    pub const JUMP2: StepCode = StepCode::from_static("JUMP2");
    pub const JUMP3: StepCode = StepCode::from_static("JUMP3");

    /// Creates a code from an owned or borrowed string
    pub fn new(code: impl Into<String>) -> Self {
        Self(Cow::Owned(code.into()))
    }

    /// Creates a code from a static string, usable in `const` items
    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty code
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StepCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepCode {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl AsRef<str> for StepCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How often, and after which pause, an unclassified step failure is tried
/// again.
///
/// Only failures without a code are retried; the first attempt is not
/// counted, so `max_retries` is the number of extra attempts. When they run
/// out the step's code becomes [`StepCode::FAILURE`].
///
/// ```
/// use taskflow::RetryPolicy;
/// use std::time::Duration;
///
/// assert_eq!(RetryPolicy::default(), RetryPolicy::None);
///
/// let flaky_api = RetryPolicy::fixed(2, Duration::from_millis(250));
/// assert_eq!(flaky_api.max_retries(), 2);
///
/// let busy_db = RetryPolicy::exponential(4, Duration::from_millis(20));
/// assert_eq!(busy_db.delay_for_attempt(3), Some(Duration::from_millis(160)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail with `FAILURE` on the first unclassified error.
    #[default]
    None,
    /// Same pause before every retry.
    Fixed { max_retries: u32, delay: Duration },
    /// Pause grows by `multiplier` per retry, capped at `max_delay`.
    ExponentialBackoff {
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    },
}

/// Rejected [`RetryPolicy::exponential_backoff`] settings.
///
/// ```
/// use taskflow::RetryPolicy;
/// use std::time::Duration;
///
/// let err = RetryPolicy::exponential_backoff(
///     3,
///     Duration::from_secs(5),
///     Duration::from_secs(1),
///     2,
/// )
/// .unwrap_err();
/// assert_eq!(err.to_string(), "max_delay must be >= initial_delay");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RetryPolicyError(pub &'static str);

impl RetryPolicy {
    /// `max_retries` retries, each after `delay`.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Doubling backoff from `initial_delay`, capped at one minute.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Backoff with explicit cap and growth factor.
    ///
    /// # Errors
    ///
    /// [`RetryPolicyError`] when `multiplier` is outside `1..=10` or
    /// `max_delay` is shorter than `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        match multiplier {
            0 => Err(RetryPolicyError("multiplier must be greater than 0")),
            11.. => Err(RetryPolicyError("multiplier must be 10 or less")),
            _ if max_delay < initial_delay => {
                Err(RetryPolicyError("max_delay must be >= initial_delay"))
            }
            _ => Ok(RetryPolicy::ExponentialBackoff {
                max_retries,
                initial_delay,
                max_delay,
                multiplier,
            }),
        }
    }

    /// The retry count; `0` means a single attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. }
            | RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Pause before retry number `attempt + 1`; `None` when the policy
    /// never retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.saturating_pow(attempt);
                Some(initial_delay.saturating_mul(factor).min(*max_delay))
            }
        }
    }
}

/// What a step returns: the code to route on, or a failure.
pub type StepResult = Result<StepCode, StepFailure>;

/// A unit of work inside a task.
///
/// The step receives the task itself, so it can read the task's input and
/// write its output or internal state, plus the context carrier the runner
/// was given.
///
/// # Examples
///
/// ```
/// use taskflow::prelude::*;
/// use async_trait::async_trait;
/// # struct Greeter { greeting: String }
/// # impl Task for Greeter {
/// #     type Input = ();
/// #     type Output = ();
/// #     type Context = Context;
/// #     fn name(&self) -> &str { "greeter" }
/// #     fn init(&mut self, _: (), _: ()) -> Result<(), StepError> { Ok(()) }
/// #     fn step_config_map(&self) -> StepConfigMap<Self> { StepConfigMap::new() }
/// #     fn first_step_key(&self) -> StepKey { "greet".into() }
/// # }
///
/// define_step!(GreetStep);
///
/// #[async_trait]
/// impl Step<Greeter> for GreetStep {
///     async fn execute(&self, task: &mut Greeter, ctx: &mut Context) -> StepResult {
///         task.greeting = "hello".to_string();
///         ctx.set_metadata("greeted", "yes".to_string());
///         Ok(StepCode::SUCCESS)
///     }
/// }
/// ```
#[async_trait]
pub trait Step<T: Task>: Send + Sync {
    /// Executes the step.
    ///
    /// # Returns
    ///
    /// - `Ok(code)` - Route on `code`
    /// - `Err(failure)` with a code - Route on that code without retrying
    /// - `Err(failure)` without a code - Retry per policy, then `FAILURE`
    async fn execute(&self, task: &mut T, ctx: &mut T::Context) -> StepResult;
}

/// Adapts a synchronous function or method into a [`Step`].
///
/// Created by [`StepConfig::from_fn`].
pub struct FnStep<F>(F);

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<T, F> Step<T> for FnStep<F>
where
    T: Task,
    F: Fn(&mut T, &mut T::Context) -> StepResult + Send + Sync,
{
    async fn execute(&self, task: &mut T, ctx: &mut T::Context) -> StepResult {
        (self.0)(task, ctx)
    }
}

/// Hook invoked when a step ends with [`StepCode::FAILURE`].
///
/// The error is `None` when the step itself returned `Ok(FAILURE)`.
pub type StepFailedFn<T> = Arc<dyn Fn(&mut T, &StepKey, Option<&StepError>) + Send + Sync>;

/// Configuration for a single step.
///
/// Holds the step itself, its retry policy, an optional failure hook and
/// the routing table from result code to the next step. A route to `None`
/// ends the run. Routes keep their insertion order.
///
/// # Examples
///
/// ```
/// use taskflow::prelude::*;
/// use std::time::Duration;
/// # struct Import;
/// # impl Task for Import {
/// #     type Input = ();
/// #     type Output = ();
/// #     type Context = Context;
/// #     fn name(&self) -> &str { "import" }
/// #     fn init(&mut self, _: (), _: ()) -> Result<(), StepError> { Ok(()) }
/// #     fn step_config_map(&self) -> StepConfigMap<Self> { StepConfigMap::new() }
/// #     fn first_step_key(&self) -> StepKey { "fetch".into() }
/// # }
/// # impl Import {
/// #     fn fetch(&mut self, _ctx: &mut Context) -> StepResult { Ok(StepCode::SUCCESS) }
/// # }
///
/// let config = StepConfig::<Import>::from_fn(Import::fetch)
///     .retry(RetryPolicy::fixed(3, Duration::from_secs(1)))
///     .route(StepCode::SUCCESS, "store")
///     .route(StepCode::FAILURE, "cleanup")
///     .finish_on(StepCode::JUMP1);
///
/// assert_eq!(config.next_step(&StepCode::SUCCESS), Some(&StepKey::new("store")));
/// assert_eq!(config.next_step(&StepCode::JUMP1), None);
/// ```
pub struct StepConfig<T: Task> {
    /// Retry policy for unclassified failures. Default: no retry.
    pub retry_policy: RetryPolicy,
    /// The work to run
    pub step: Arc<dyn Step<T>>,
    /// Called with the last error when the step ends with `FAILURE`
    pub on_failed: Option<StepFailedFn<T>>,
    /// Result code to next step, `None` or an empty key ends the run
    pub routes: IndexMap<StepCode, Option<StepKey>>,
}

impl<T: Task> StepConfig<T> {
    /// Creates a configuration around a [`Step`] implementation.
    pub fn new(step: impl Step<T> + 'static) -> Self {
        Self {
            retry_policy: RetryPolicy::None,
            step: Arc::new(step),
            on_failed: None,
            routes: IndexMap::new(),
        }
    }

    /// Creates a configuration around a synchronous function, typically a
    /// method of the task.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut T, &mut T::Context) -> StepResult + Send + Sync + 'static,
    {
        Self::new(FnStep::new(f))
    }

    /// Sets the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the hook invoked when the step ends with `FAILURE`.
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T, &StepKey, Option<&StepError>) + Send + Sync + 'static,
    {
        self.on_failed = Some(Arc::new(f));
        self
    }

    /// Routes `code` to `next`. An empty `next` ends the run.
    pub fn route(mut self, code: impl Into<StepCode>, next: impl Into<StepKey>) -> Self {
        let next = next.into();
        let next = if next.is_empty() { None } else { Some(next) };
        self.routes.insert(code.into(), next);
        self
    }

    /// Routes `code` to the end of the run.
    pub fn finish_on(mut self, code: impl Into<StepCode>) -> Self {
        self.routes.insert(code.into(), None);
        self
    }

    /// Returns the step routed to by `code`, if any. An empty key counts as
    /// the end of the run.
    pub fn next_step(&self, code: &StepCode) -> Option<&StepKey> {
        self.routes
            .get(code)
            .and_then(Option::as_ref)
            .filter(|next| !next.is_empty())
    }
}

impl<T: Task> Clone for StepConfig<T> {
    fn clone(&self) -> Self {
        Self {
            retry_policy: self.retry_policy.clone(),
            step: Arc::clone(&self.step),
            on_failed: self.on_failed.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<T: Task> fmt::Debug for StepConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepConfig")
            .field("retry_policy", &self.retry_policy)
            .field("on_failed", &self.on_failed.is_some())
            .field("routes", &self.routes)
            .finish()
    }
}
