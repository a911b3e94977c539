//! # taskflow
//!
//! A step-routed task engine for Rust.
//!
//! A task is a graph of named steps. Each step does some work and returns a
//! result code; the step's route table maps that code to the next step. The
//! [`Runner`] starts at the task's first step and keeps following routes
//! until a code leads nowhere.
//!
//! ## Features
//!
//! - **Code routing**: failures are just codes, so cleanup and fallback paths
//!   are edges in the graph
//! - **Retry Support**: unclassified failures are retried with fixed or
//!   exponential delays, classified ones are routed immediately
//! - **Panic recovery**: a panicking step or `init` becomes a `FAILURE`
//!   code (or an init error), never a crashed process
//! - **Run traces**: every executed `(step, code)` pair is recorded and can
//!   be serialized to JSON
//! - **Mermaid graphs**: render the route table, optionally highlighting the
//!   path a run took
//! - **Tracing**: structured logs through `tracing`, plus a pluggable span
//!   tracer around every step attempt
//!
//! ## Quick Start
//!
//! ```rust
//! use taskflow::prelude::*;
//!
//! #[derive(Default)]
//! struct Signup {
//!     email: String,
//!     welcomed: bool,
//! }
//!
//! impl Signup {
//!     fn validate(&mut self, _ctx: &mut Context) -> StepResult {
//!         if self.email.contains('@') {
//!             Ok(StepCode::SUCCESS)
//!         } else {
//!             Err(StepFailure::with_code("INVALID", "not an email address"))
//!         }
//!     }
//!
//!     fn welcome(&mut self, _ctx: &mut Context) -> StepResult {
//!         self.welcomed = true;
//!         Ok(StepCode::SUCCESS)
//!     }
//! }
//!
//! impl Task for Signup {
//!     type Input = String;
//!     type Output = ();
//!     type Context = Context;
//!
//!     fn name(&self) -> &str {
//!         "signup"
//!     }
//!
//!     fn init(&mut self, input: String, _output: ()) -> Result<(), StepError> {
//!         self.email = input;
//!         Ok(())
//!     }
//!
//!     fn step_config_map(&self) -> StepConfigMap<Self> {
//!         let mut map = StepConfigMap::new();
//!         map.insert(
//!             "validate".into(),
//!             StepConfig::<Self>::from_fn(Self::validate)
//!                 .route(StepCode::SUCCESS, "welcome")
//!                 .finish_on("INVALID"),
//!         );
//!         map.insert(
//!             "welcome".into(),
//!             StepConfig::<Self>::from_fn(Self::welcome).finish_on(StepCode::SUCCESS),
//!         );
//!         map
//!     }
//!
//!     fn first_step_key(&self) -> StepKey {
//!         "validate".into()
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut runner = Runner::new();
//! let mut task = Signup::default();
//! runner
//!     .run_task(&mut Context::new(), &mut task, "ada@example.com".to_string(), ())
//!     .await
//!     .expect("init succeeds");
//!
//! assert!(task.welcomed);
//! assert_eq!(
//!     runner.run_steps(),
//!     &[
//!         RunStep::new("validate", StepCode::SUCCESS),
//!         RunStep::new("welcome", StepCode::SUCCESS),
//!     ]
//! );
//!
//! // Render the graph with the path the run took
//! let graph = runner.task_graph_run_steps(&task, runner.run_steps(), &[]);
//! assert!(graph.contains("validate ==SUCCESS==> welcome"));
//! assert!(graph.contains("validate -.INVALID.-> finish"));
//! # }
//! ```
//!
//! ## Retry Policies
//!
//! A step failing with [`StepFailure::retryable`] (or through `?`) is retried
//! according to its policy; after the last retry its code becomes
//! [`StepCode::FAILURE`]:
//!
//! ```rust
//! use taskflow::prelude::*;
//! use std::time::Duration;
//! # struct Mirror;
//! # impl Mirror {
//! #     fn push(&mut self, _ctx: &mut Context) -> StepResult { Ok(StepCode::SUCCESS) }
//! #     fn report(&mut self, _key: &StepKey, _err: Option<&StepError>) {}
//! # }
//! # impl Task for Mirror {
//! #     type Input = ();
//! #     type Output = ();
//! #     type Context = Context;
//! #     fn name(&self) -> &str { "mirror" }
//! #     fn init(&mut self, _: (), _: ()) -> Result<(), StepError> { Ok(()) }
//! #     fn step_config_map(&self) -> StepConfigMap<Self> { StepConfigMap::new() }
//! #     fn first_step_key(&self) -> StepKey { "push".into() }
//! # }
//!
//! let config = StepConfig::<Mirror>::from_fn(Mirror::push)
//!     .retry(RetryPolicy::exponential(5, Duration::from_millis(100)))
//!     .on_failed(Mirror::report)
//!     .route(StepCode::SUCCESS, "")
//!     .route(StepCode::FAILURE, "rollback");
//! ```

mod context;
mod error;
mod graph;
mod run_step;
mod runner;
mod step;
mod task;
mod tracer;

pub mod prelude;

pub use context::Context;
pub use error::{StepError, StepFailure, TaskflowError};
pub use graph::GraphConfig;
pub use run_step::{run_steps_from_json, run_steps_to_json, RunStep};
pub use runner::Runner;
pub use step::{
    FnStep, RetryPolicy, RetryPolicyError, Step, StepCode, StepConfig, StepFailedFn, StepKey,
    StepResult,
};
pub use task::{StepConfigMap, Task};
pub use tracer::{NoopTracer, StartTrace, TraceSpan, TracingTracer};

/// Declares a unit struct for a step implemented through [`Step`].
///
/// Method steps registered with [`StepConfig::from_fn`] need no type of
/// their own; use this for steps that live outside the task, such as shared
/// validation. The generated `NAME` constant is the struct name and makes a
/// convenient [`StepKey`] so the route table and the step type cannot drift
/// apart. The struct also derives `Debug` and implements `Default`.
///
/// ```rust
/// use taskflow::prelude::*;
/// # struct Checkout;
/// # impl Task for Checkout {
/// #     type Input = ();
/// #     type Output = ();
/// #     type Context = Context;
/// #     fn name(&self) -> &str { "checkout" }
/// #     fn init(&mut self, _: (), _: ()) -> Result<(), StepError> { Ok(()) }
/// #     fn step_config_map(&self) -> StepConfigMap<Self> { StepConfigMap::new() }
/// #     fn first_step_key(&self) -> StepKey { ChargeCard::NAME.into() }
/// # }
///
/// define_step!(ChargeCard);
///
/// #[async_trait::async_trait]
/// impl Step<Checkout> for ChargeCard {
///     async fn execute(&self, _task: &mut Checkout, _ctx: &mut Context) -> StepResult {
///         Ok(StepCode::SUCCESS)
///     }
/// }
///
/// let mut map = StepConfigMap::<Checkout>::new();
/// map.insert(
///     ChargeCard::NAME.into(),
///     StepConfig::new(ChargeCard)
///         .route(StepCode::SUCCESS, "ship")
///         .route(StepCode::FAILURE, "refund"),
/// );
/// assert!(map.contains_key(&StepKey::new("ChargeCard")));
/// ```
#[macro_export]
macro_rules! define_step {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name;

        impl $name {
            /// Struct name, for use as the step key
            #[allow(dead_code)]
            pub const NAME: &'static str = stringify!($name);
        }

        impl Default for $name {
            fn default() -> Self {
                Self
            }
        }
    };
}
