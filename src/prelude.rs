//! Commonly used types and traits

pub use crate::context::Context;
pub use crate::define_step;
pub use crate::error::{StepError, StepFailure, TaskflowError};
pub use crate::run_step::RunStep;
pub use crate::runner::Runner;
pub use crate::step::{RetryPolicy, Step, StepCode, StepConfig, StepKey, StepResult};
pub use crate::task::{StepConfigMap, Task};
