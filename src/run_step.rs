use crate::error::TaskflowError;
use crate::step::{StepCode, StepKey};
use serde::{Deserialize, Serialize};

/// One executed step: which step ran and the code it finished with.
///
/// A run trace is a `Vec<RunStep>` in execution order. The same key may
/// appear more than once when the route table loops or jumps back.
///
/// Serialized as `{"StepKey": "...", "StepCode": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunStep {
    pub step_key: StepKey,
    pub step_code: StepCode,
}

impl RunStep {
    pub fn new(step_key: impl Into<StepKey>, step_code: impl Into<StepCode>) -> Self {
        Self {
            step_key: step_key.into(),
            step_code: step_code.into(),
        }
    }
}

/// Serializes a run trace as a JSON array.
pub fn run_steps_to_json(run_steps: &[RunStep]) -> Result<String, TaskflowError> {
    serde_json::to_string(run_steps).map_err(TaskflowError::EncodeRunSteps)
}

/// Decodes a run trace produced by [`run_steps_to_json`] or any JSON array
/// of `{"StepKey", "StepCode"}` objects.
///
/// # Errors
///
/// [`TaskflowError::DecodeRunSteps`] on malformed input.
pub fn run_steps_from_json(json: &str) -> Result<Vec<RunStep>, TaskflowError> {
    serde_json::from_str(json).map_err(TaskflowError::DecodeRunSteps)
}
