//! Mermaid flowchart rendering of a task's route table.
//!
//! Every `(step, code, next step)` route becomes one edge. Routes that end
//! the run point at a synthetic finish node. Given a run trace, edges the
//! run actually took are drawn thick (`==CODE==>`) and the rest dotted
//! (`-.CODE.->`), and visited steps are colored.
//!
//! Steps and routes are emitted in the insertion order of the task's
//! [`StepConfigMap`](crate::StepConfigMap), so the output is stable for a
//! given task definition.

use crate::error::TaskflowError;
use crate::run_step::{run_steps_from_json, RunStep};
use crate::step::{StepCode, StepKey};
use crate::task::Task;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Node names and colors used by the renderer.
///
/// Deserializable so it can live in a configuration file; missing fields
/// fall back to the defaults.
///
/// # Examples
///
/// ```
/// use taskflow::GraphConfig;
///
/// let config: GraphConfig = serde_json::from_str(r#"{"finish_step_key": "end"}"#)
///     .expect("valid config");
/// assert_eq!(config.finish_step_key, "end");
/// assert_eq!(config.start_style_color, "#b57edc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Name of the synthetic node routes without a next step point at
    pub finish_step_key: String,
    pub start_style_color: String,
    pub finish_style_color: String,
    /// Fill for steps that appear in the run trace
    pub run_step_style_color: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            finish_step_key: "finish".to_string(),
            start_style_color: "#b57edc".to_string(),
            finish_style_color: "#74c365".to_string(),
            run_step_style_color: "#ff9966".to_string(),
        }
    }
}

impl GraphConfig {
    /// Renders the task's route table.
    ///
    /// An empty `show_codes` renders every route; otherwise only routes whose
    /// code is listed are drawn.
    pub fn task_graph<T: Task>(&self, task: &T, show_codes: &[StepCode]) -> String {
        let content = self.graph_content(task, show_codes, |step, code, next| {
            format!("{} --{}--> {}\n", step, code, next)
        });

        self.draw_graph(&content, self.start_style(task))
    }

    /// Renders the task's route table with `run_steps` overlaid.
    pub fn task_graph_run_steps<T: Task>(
        &self,
        task: &T,
        run_steps: &[RunStep],
        show_codes: &[StepCode],
    ) -> String {
        let visited: IndexSet<&StepKey> = run_steps.iter().map(|r| &r.step_key).collect();

        let mut style = self.start_style(task);
        for step_key in visited {
            style.push_str(&format!(
                "style {} fill:{}\n",
                step_key, self.run_step_style_color
            ));
        }

        let content = self.graph_content(task, show_codes, |step, code, next| {
            let taken = run_steps
                .iter()
                .any(|r| &r.step_key == step && &r.step_code == code);
            if taken {
                format!("{} =={}==> {}\n", step, code, next)
            } else {
                format!("{} -.{}.-> {}\n", step, code, next)
            }
        });

        self.draw_graph(&content, style)
    }

    /// Like [`task_graph_run_steps`](Self::task_graph_run_steps), reading the
    /// run trace from its JSON form.
    ///
    /// # Errors
    ///
    /// [`TaskflowError::DecodeRunSteps`] if `run_steps_json` is malformed.
    pub fn task_graph_run_steps_from_json<T: Task>(
        &self,
        task: &T,
        run_steps_json: &str,
        show_codes: &[StepCode],
    ) -> Result<String, TaskflowError> {
        let run_steps = run_steps_from_json(run_steps_json)?;
        Ok(self.task_graph_run_steps(task, &run_steps, show_codes))
    }

    fn start_style<T: Task>(&self, task: &T) -> String {
        format!(
            "style {} fill:{}\n",
            task.first_step_key(),
            self.start_style_color
        )
    }

    fn graph_content<T, F>(&self, task: &T, show_codes: &[StepCode], edge: F) -> String
    where
        T: Task,
        F: Fn(&StepKey, &StepCode, &str) -> String,
    {
        let mut content = String::new();
        for (step_key, config) in task.step_config_map() {
            for code in config.routes.keys() {
                if !show_codes.is_empty() && !show_codes.contains(code) {
                    continue;
                }
                let next = config
                    .next_step(code)
                    .map_or(self.finish_step_key.as_str(), StepKey::as_str);
                content.push_str(&edge(&step_key, code, next));
            }
        }

        content
    }

    fn draw_graph(&self, content: &str, mut style: String) -> String {
        style.push_str(&format!(
            "style {} fill:{}\n",
            self.finish_step_key, self.finish_style_color
        ));

        format!("```mermaid\nflowchart TD\n{}{}```", content, style)
    }
}
