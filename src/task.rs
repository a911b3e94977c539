use crate::error::StepError;
use crate::step::{StepConfig, StepKey};
use indexmap::IndexMap;

/// Step configurations of a task, keyed by step key.
///
/// Iteration follows insertion order, which is also the order the graph
/// renderer emits steps in.
pub type StepConfigMap<T> = IndexMap<StepKey, StepConfig<T>>;

/// A workflow definition driven by a [`Runner`](crate::Runner).
///
/// A task owns all business data for a run: its input, its output carrier
/// and whatever intermediate state its steps keep. The runner only reads the
/// step configuration map and calls the hooks around every step.
///
/// `Output` is usually a mutable borrow of a caller-owned value, so the task
/// can write results into it during the run:
///
/// ```
/// use taskflow::prelude::*;
///
/// struct Report { lines: usize }
///
/// struct CountLines<'a> {
///     text: String,
///     report: Option<&'a mut Report>,
/// }
///
/// impl<'a> Task for CountLines<'a> {
///     type Input = String;
///     type Output = &'a mut Report;
///     type Context = Context;
///
///     fn name(&self) -> &str {
///         "count-lines"
///     }
///
///     fn init(&mut self, input: String, output: &'a mut Report) -> Result<(), StepError> {
///         if input.is_empty() {
///             return Err(StepError::failed("nothing to count"));
///         }
///         self.text = input;
///         self.report = Some(output);
///         Ok(())
///     }
///
///     fn step_config_map(&self) -> StepConfigMap<Self> {
///         let mut map = StepConfigMap::new();
///         map.insert(
///             "count".into(),
///             StepConfig::from_fn(Self::count).finish_on(StepCode::SUCCESS),
///         );
///         map
///     }
///
///     fn first_step_key(&self) -> StepKey {
///         "count".into()
///     }
/// }
///
/// impl<'a> CountLines<'a> {
///     fn count(&mut self, _ctx: &mut Context) -> StepResult {
///         let lines = self.text.lines().count();
///         let report = self.report.as_deref_mut().ok_or("init was not called")?;
///         report.lines = lines;
///         Ok(StepCode::SUCCESS)
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut report = Report { lines: 0 };
/// let mut task = CountLines { text: String::new(), report: None };
/// let mut runner = Runner::new();
/// runner
///     .run_task(&mut Context::new(), &mut task, "a\nb\nc".to_string(), &mut report)
///     .await
///     .expect("task runs");
/// drop(task);
/// assert_eq!(report.lines, 3);
/// # }
/// ```
pub trait Task: Send {
    /// What the caller hands in.
    type Input;
    /// Where the task writes its results.
    type Output;
    /// The carrier passed to every step, see [`Context`](crate::Context).
    type Context: Send;

    /// Human-readable task name, used in logs and errors.
    fn name(&self) -> &str;

    /// Binds input and output before the first step runs.
    ///
    /// Returning an error, or panicking, aborts the run with
    /// [`TaskflowError::Init`](crate::TaskflowError::Init).
    fn init(&mut self, input: Self::Input, output: Self::Output) -> Result<(), StepError>;

    /// The full step graph. Called once per run, and by the graph renderer.
    fn step_config_map(&self) -> StepConfigMap<Self>
    where
        Self: Sized;

    /// The step the run starts with.
    fn first_step_key(&self) -> StepKey;

    /// Called before every step.
    fn before_step(&mut self, _step_key: &StepKey) {}

    /// Called after every step, whatever its outcome.
    fn after_step(&mut self, _step_key: &StepKey) {}

    /// Task-level error state, inspected by the caller after the run.
    fn error(&self) -> Option<&StepError> {
        None
    }
}
