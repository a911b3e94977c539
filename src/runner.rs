use crate::context::Context;
use crate::error::{StepError, StepFailure, TaskflowError};
use crate::graph::GraphConfig;
use crate::run_step::{run_steps_to_json, RunStep};
use crate::step::{StepCode, StepConfig, StepKey, StepResult};
use crate::task::Task;
use crate::tracer::{NoopTracer, StartTrace};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn, Instrument};

/// Drives tasks step by step.
///
/// A run starts at the task's first step and follows the route table on the
/// code each step returns, until a code has no route, routes to the end, or
/// routes to a step the task does not define.
///
/// Every executed step is appended to the runner's run trace. The trace
/// accumulates across [`run_task`](Self::run_task) calls until
/// [`clear_run_steps`](Self::clear_run_steps) is called.
///
/// Routes are not checked for cycles; a cycle the steps keep feeding runs
/// until one of them returns a code that leaves it.
///
/// `C` is the context carrier handed to every step; it defaults to
/// [`Context`].
pub struct Runner<C = Context> {
    graph_config: GraphConfig,
    run_steps: Vec<RunStep>,
    tracer: Box<dyn StartTrace<C>>,
}

impl<C> fmt::Debug for Runner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("graph_config", &self.graph_config)
            .field("run_steps", &self.run_steps)
            .finish()
    }
}

impl<C> Default for Runner<C> {
    fn default() -> Self {
        Self {
            graph_config: GraphConfig::default(),
            run_steps: Vec::new(),
            tracer: Box::new(NoopTracer),
        }
    }
}

impl Runner {
    /// Creates a runner for tasks using the default [`Context`] carrier.
    ///
    /// For another carrier use `Runner::<MyContext>::default()`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> Runner<C> {
    /// Sets the tracer that opens a span around every step attempt.
    pub fn with_tracer(mut self, tracer: impl StartTrace<C> + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Sets the node names and colors used by the graph methods.
    pub fn with_graph_config(mut self, graph_config: GraphConfig) -> Self {
        self.graph_config = graph_config;
        self
    }

    pub fn graph_config(&self) -> &GraphConfig {
        &self.graph_config
    }

    /// Steps executed so far, across all runs since the last clear.
    pub fn run_steps(&self) -> &[RunStep] {
        &self.run_steps
    }

    pub fn clear_run_steps(&mut self) {
        self.run_steps.clear();
    }

    /// The run trace as a JSON array of `{"StepKey", "StepCode"}` objects.
    pub fn run_steps_json(&self) -> Result<String, TaskflowError> {
        run_steps_to_json(&self.run_steps)
    }

    /// See [`GraphConfig::task_graph`].
    pub fn task_graph<T: Task>(&self, task: &T, show_codes: &[StepCode]) -> String {
        self.graph_config.task_graph(task, show_codes)
    }

    /// See [`GraphConfig::task_graph_run_steps`].
    pub fn task_graph_run_steps<T: Task>(
        &self,
        task: &T,
        run_steps: &[RunStep],
        show_codes: &[StepCode],
    ) -> String {
        self.graph_config
            .task_graph_run_steps(task, run_steps, show_codes)
    }

    /// See [`GraphConfig::task_graph_run_steps_from_json`].
    pub fn task_graph_run_steps_from_json<T: Task>(
        &self,
        task: &T,
        run_steps_json: &str,
        show_codes: &[StepCode],
    ) -> Result<String, TaskflowError> {
        self.graph_config
            .task_graph_run_steps_from_json(task, run_steps_json, show_codes)
    }

    /// Runs `task` to completion.
    ///
    /// Only initialization problems are returned as errors. Step failures
    /// are routed like any other code and recorded in the run trace; check
    /// [`Task::error`] and [`run_steps`](Self::run_steps) for the outcome.
    ///
    /// # Errors
    ///
    /// [`TaskflowError::Init`] if [`Task::init`] fails or panics. No step
    /// runs in that case.
    pub async fn run_task<T>(
        &mut self,
        ctx: &mut C,
        task: &mut T,
        input: T::Input,
        output: T::Output,
    ) -> Result<(), TaskflowError>
    where
        T: Task<Context = C>,
    {
        info!(task = task.name(), "start run_task");
        let first_new = self.run_steps.len();

        let result = self.drive(ctx, task, input, output).await;

        info!(
            task = task.name(),
            run_steps = ?&self.run_steps[first_new..],
            total_run_steps = self.run_steps.len(),
            "end run_task"
        );
        result
    }

    async fn drive<T>(
        &mut self,
        ctx: &mut C,
        task: &mut T,
        input: T::Input,
        output: T::Output,
    ) -> Result<(), TaskflowError>
    where
        T: Task<Context = C>,
    {
        init_task(task, input, output)?;

        let step_config_map = task.step_config_map();
        if step_config_map.is_empty() {
            warn!(task = task.name(), "step config map is empty");
            return Ok(());
        }

        let mut step_key = task.first_step_key();
        let Some(mut config) = step_config_map.get(&step_key) else {
            error!(task = task.name(), step = %step_key, "first step does not exist");
            return Ok(());
        };

        loop {
            task.before_step(&step_key);
            let code = self.run_step(ctx, task, &step_key, config).await;
            task.after_step(&step_key);

            self.run_steps.push(RunStep {
                step_key: step_key.clone(),
                step_code: code.clone(),
            });

            let Some(next_key) = config.next_step(&code) else {
                debug!(step = %step_key, code = %code, "no next step, run finished");
                break;
            };
            let Some(next_config) = step_config_map.get(next_key) else {
                warn!(
                    step = %step_key,
                    code = %code,
                    next_step = %next_key,
                    "next step does not exist, run finished"
                );
                break;
            };

            step_key = next_key.clone();
            config = next_config;
        }

        Ok(())
    }

    async fn run_step<T>(
        &self,
        ctx: &mut C,
        task: &mut T,
        step_key: &StepKey,
        config: &StepConfig<T>,
    ) -> StepCode
    where
        T: Task<Context = C>,
    {
        debug!(step = %step_key, "start run_step");

        let (code, err) = match self.run_step_func(ctx, task, step_key, config).await {
            Ok(code) => (code, None),
            Err(StepFailure {
                code: Some(code),
                error: err,
            }) => {
                error!(step = %step_key, code = %code, error = %err, "run_step error");
                (code, Some(err))
            }
            Err(StepFailure { code: None, error: err }) => {
                error!(step = %step_key, error = %err, "run_step error");
                if config.retry_policy.max_retries() > 0 {
                    self.retry_step(ctx, task, step_key, config, err).await
                } else {
                    (StepCode::FAILURE, Some(err))
                }
            }
        };

        if code == StepCode::FAILURE {
            if let Some(on_failed) = &config.on_failed {
                debug!(step = %step_key, "run on_failed hook");
                on_failed(task, step_key, err.as_ref());
            }
        }

        debug!(
            step = %step_key,
            code = %code,
            next_step = ?config.next_step(&code),
            "end run_step"
        );
        code
    }

    async fn retry_step<T>(
        &self,
        ctx: &mut C,
        task: &mut T,
        step_key: &StepKey,
        config: &StepConfig<T>,
        mut last_error: StepError,
    ) -> (StepCode, Option<StepError>)
    where
        T: Task<Context = C>,
    {
        let max_retries = config.retry_policy.max_retries();
        for attempt in 0..max_retries {
            if let Some(delay) = config.retry_policy.delay_for_attempt(attempt) {
                debug!(step = %step_key, delay = ?delay, "wait retry run_step");
                tokio::time::sleep(delay).await;
            }

            info!(
                step = %step_key,
                retry_no = attempt + 1,
                retry_count = max_retries,
                "retry run_step"
            );

            match self.run_step_func(ctx, task, step_key, config).await {
                Ok(code) => return (code, None),
                Err(StepFailure {
                    code: Some(code),
                    error: err,
                }) => {
                    error!(step = %step_key, code = %code, error = %err, "retry run_step error");
                    return (code, Some(err));
                }
                Err(StepFailure { code: None, error: err }) => {
                    error!(step = %step_key, error = %err, "retry run_step error");
                    last_error = err;
                }
            }
        }

        (StepCode::FAILURE, Some(last_error))
    }

    /// One attempt: the step call wrapped in a tracer span, with panics from
    /// the step or the tracer turned into `FAILURE`.
    async fn run_step_func<T>(
        &self,
        ctx: &mut C,
        task: &mut T,
        step_key: &StepKey,
        config: &StepConfig<T>,
    ) -> StepResult
    where
        T: Task<Context = C>,
    {
        let span_name = format!("RunStep {}", step_key);
        let tracer = &self.tracer;

        let attempt = async move {
            let mut span = tracer.start_trace(ctx, &span_name);

            let result = AssertUnwindSafe(
                config
                    .step
                    .execute(task, ctx)
                    .instrument(span.tracing_span()),
            )
            .catch_unwind()
            .await
            .unwrap_or_else(panic_failure);

            let code = match &result {
                Ok(code) => code.as_str(),
                Err(failure) => failure.code.as_ref().map_or("", StepCode::as_str),
            };
            span.add_event("StepCode", &[("code", code)]);
            if let Err(failure) = &result {
                span.record_error(&failure.error);
            }
            span.end();

            result
        };

        AssertUnwindSafe(attempt)
            .catch_unwind()
            .await
            .unwrap_or_else(panic_failure)
    }
}

fn panic_failure(payload: Box<dyn Any + Send>) -> StepResult {
    Err(StepFailure::with_code(
        StepCode::FAILURE,
        StepError::from_panic(payload),
    ))
}

fn init_task<T: Task>(
    task: &mut T,
    input: T::Input,
    output: T::Output,
) -> Result<(), TaskflowError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| task.init(input, output)))
        .unwrap_or_else(|payload| Err(StepError::from_panic(payload)));

    result.map_err(|source| {
        error!(task = task.name(), error = %source, "init task error");
        TaskflowError::Init {
            task: task.name().to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StepConfigMap;
    use crate::tracer::TraceSpan;
    use crate::RetryPolicy;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What a scripted step does on one attempt.
    #[derive(Clone)]
    enum Attempt {
        Code(&'static str),
        Fail,
        FailWith(&'static str),
        Panic,
    }

    /// A task whose steps replay a script of attempts, keyed by step.
    #[derive(Default)]
    struct ScriptedTask {
        first: &'static str,
        routes: Vec<(&'static str, Vec<(&'static str, &'static str)>)>,
        retries: HashMap<&'static str, u32>,
        script: HashMap<&'static str, VecDeque<Attempt>>,
        current: Option<StepKey>,
        calls: HashMap<String, u32>,
        hooks: Vec<String>,
        failed: Vec<(String, Option<String>)>,
        init_error: Option<&'static str>,
        init_panics: bool,
        initialized: bool,
        raw_routes: bool,
        seen_spans: Vec<Option<&'static str>>,
    }

    impl ScriptedTask {
        fn new(first: &'static str) -> Self {
            Self {
                first,
                ..Self::default()
            }
        }

        fn step(
            mut self,
            key: &'static str,
            routes: &[(&'static str, &'static str)],
            attempts: &[Attempt],
        ) -> Self {
            self.routes.push((key, routes.to_vec()));
            self.script.insert(key, attempts.iter().cloned().collect());
            self
        }

        fn retries(mut self, key: &'static str, count: u32) -> Self {
            self.retries.insert(key, count);
            self
        }

        fn calls(&self, key: &str) -> u32 {
            self.calls.get(key).copied().unwrap_or(0)
        }

        #[allow(clippy::panic)]
        fn scripted(&mut self, _ctx: &mut Context) -> StepResult {
            let key = self.current.clone().ok_or("no current step")?;
            *self.calls.entry(key.to_string()).or_default() += 1;
            self.seen_spans
                .push(tracing::Span::current().metadata().map(|m| m.name()));
            let attempt = self
                .script
                .get_mut(key.as_str())
                .and_then(VecDeque::pop_front)
                .unwrap_or(Attempt::Code("SUCCESS"));

            match attempt {
                Attempt::Code(code) => Ok(StepCode::new(code)),
                Attempt::Fail => Err(StepFailure::retryable(format!("{} failed", key))),
                Attempt::FailWith(code) => Err(StepFailure::with_code(code, "classified")),
                Attempt::Panic => panic!("panic in {}", key),
            }
        }
    }

    impl Task for ScriptedTask {
        type Input = ();
        type Output = ();
        type Context = Context;

        fn name(&self) -> &str {
            "scripted"
        }

        #[allow(clippy::panic)]
        fn init(&mut self, _input: (), _output: ()) -> Result<(), StepError> {
            if self.init_panics {
                panic!("init exploded");
            }
            if let Some(msg) = self.init_error {
                return Err(StepError::failed(msg));
            }
            self.initialized = true;
            Ok(())
        }

        fn step_config_map(&self) -> StepConfigMap<Self> {
            let mut map = StepConfigMap::new();
            for (key, routes) in &self.routes {
                let retries = self.retries.get(key).copied().unwrap_or(0);
                let mut config = StepConfig::<Self>::from_fn(Self::scripted)
                    .retry(RetryPolicy::fixed(retries, Duration::from_millis(1)))
                    .on_failed(|task: &mut Self, key: &StepKey, err: Option<&StepError>| {
                        task.failed
                            .push((key.to_string(), err.map(|e| e.to_string())));
                    });
                for (code, next) in routes {
                    if self.raw_routes {
                        config
                            .routes
                            .insert(StepCode::new(*code), Some(StepKey::new(*next)));
                    } else {
                        config = config.route(*code, *next);
                    }
                }
                map.insert(StepKey::new(*key), config);
            }
            map
        }

        fn first_step_key(&self) -> StepKey {
            StepKey::new(self.first)
        }

        fn before_step(&mut self, step_key: &StepKey) {
            self.hooks.push(format!("before {}", step_key));
            self.current = Some(step_key.clone());
        }

        fn after_step(&mut self, step_key: &StepKey) {
            self.hooks.push(format!("after {}", step_key));
        }
    }

    fn trace(runner: &Runner) -> Vec<(String, String)> {
        runner
            .run_steps()
            .iter()
            .map(|r| (r.step_key.to_string(), r.step_code.to_string()))
            .collect()
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected
            .iter()
            .map(|(k, c)| (k.to_string(), c.to_string()))
            .collect()
    }

    async fn run(task: &mut ScriptedTask) -> (Runner, Result<(), TaskflowError>) {
        let mut runner = Runner::new();
        let result = runner.run_task(&mut Context::new(), task, (), ()).await;
        (runner, result)
    }

    #[tokio::test]
    async fn test_follows_routes_until_finish() {
        let mut task = ScriptedTask::new("first")
            .step("first", &[("SUCCESS", "second")], &[Attempt::Code("SUCCESS")])
            .step("second", &[("SUCCESS", "")], &[Attempt::Code("SUCCESS")]);

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert!(task.initialized);
        assert_eq!(
            trace(&runner),
            pairs(&[("first", "SUCCESS"), ("second", "SUCCESS")])
        );
        assert_eq!(
            task.hooks,
            vec!["before first", "after first", "before second", "after second"]
        );
    }

    #[tokio::test]
    async fn test_unrouted_code_ends_run() {
        let mut task = ScriptedTask::new("first")
            .step("first", &[("SUCCESS", "second")], &[Attempt::Code("JUMP1")])
            .step("second", &[], &[]);

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert_eq!(trace(&runner), pairs(&[("first", "JUMP1")]));
        assert_eq!(task.calls("second"), 0);
    }

    #[tokio::test]
    async fn test_dangling_route_ends_run() {
        let mut task = ScriptedTask::new("first").step(
            "first",
            &[("SUCCESS", "missing")],
            &[Attempt::Code("SUCCESS")],
        );

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert_eq!(trace(&runner), pairs(&[("first", "SUCCESS")]));
    }

    #[tokio::test]
    async fn test_empty_route_target_ends_run() {
        let mut task = ScriptedTask::new("first")
            .step("first", &[("SUCCESS", "")], &[Attempt::Code("SUCCESS")])
            .step("", &[], &[]);
        task.raw_routes = true;

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert_eq!(trace(&runner), pairs(&[("first", "SUCCESS")]));
        assert_eq!(task.calls(""), 0);
    }

    #[tokio::test]
    async fn test_missing_first_step_is_silent() {
        let mut task = ScriptedTask::new("nowhere").step("first", &[], &[]);

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert!(runner.run_steps().is_empty());
        assert!(task.hooks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_step_map_is_a_noop() {
        let mut task = ScriptedTask::new("first");

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        assert!(task.initialized);
        assert!(runner.run_steps().is_empty());
    }

    #[tokio::test]
    async fn test_init_error_aborts_run() {
        let mut task = ScriptedTask::new("first").step("first", &[], &[]);
        task.init_error = Some("input mismatch");

        let (runner, result) = run(&mut task).await;

        match result {
            Err(TaskflowError::Init { task: name, source }) => {
                assert_eq!(name, "scripted");
                assert_eq!(source.to_string(), "input mismatch");
            }
            other => unreachable!("unexpected result: {other:?}"),
        }
        assert!(runner.run_steps().is_empty());
        assert_eq!(task.calls("first"), 0);
    }

    #[tokio::test]
    async fn test_init_panic_is_recovered() {
        let mut task = ScriptedTask::new("first").step("first", &[], &[]);
        task.init_panics = true;

        let (runner, result) = run(&mut task).await;

        match result {
            Err(TaskflowError::Init { source, .. }) => {
                assert!(source.is_panic());
                assert!(source.to_string().contains("init exploded"));
            }
            other => unreachable!("unexpected result: {other:?}"),
        }
        assert!(runner.run_steps().is_empty());
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("SUCCESS", ""), ("FAILURE", "")],
                &[Attempt::Fail, Attempt::Fail, Attempt::Fail, Attempt::Fail],
            )
            .retries("first", 3);

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        // first attempt plus three retries
        assert_eq!(task.calls("first"), 4);
        assert_eq!(trace(&runner), pairs(&[("first", "FAILURE")]));
        assert_eq!(
            task.failed,
            vec![("first".to_string(), Some("first failed".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_unclassified_failure_without_retry() {
        let mut task = ScriptedTask::new("first").step(
            "first",
            &[("FAILURE", "cleanup")],
            &[Attempt::Fail],
        );
        task = task.step("cleanup", &[("SUCCESS", "")], &[]);

        let (runner, _) = run(&mut task).await;

        assert_eq!(task.calls("first"), 1);
        assert_eq!(
            trace(&runner),
            pairs(&[("first", "FAILURE"), ("cleanup", "SUCCESS")])
        );
        assert_eq!(task.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("SUCCESS", "")],
                &[Attempt::Fail, Attempt::Code("SUCCESS"), Attempt::Fail],
            )
            .retries("first", 5);

        let (runner, _) = run(&mut task).await;

        assert_eq!(task.calls("first"), 2);
        assert_eq!(trace(&runner), pairs(&[("first", "SUCCESS")]));
        assert!(task.failed.is_empty());
    }

    #[tokio::test]
    async fn test_retry_stops_on_classified_failure() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("INVALID", "")],
                &[Attempt::Fail, Attempt::FailWith("INVALID"), Attempt::Fail],
            )
            .retries("first", 5);

        let (runner, _) = run(&mut task).await;

        assert_eq!(task.calls("first"), 2);
        assert_eq!(trace(&runner), pairs(&[("first", "INVALID")]));
        assert!(task.failed.is_empty());
    }

    #[tokio::test]
    async fn test_classified_failure_is_never_retried() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("JUMP1", "jump")],
                &[Attempt::FailWith("JUMP1")],
            )
            .step("jump", &[("SUCCESS", "")], &[])
            .retries("first", 3);

        let (runner, _) = run(&mut task).await;

        assert_eq!(task.calls("first"), 1);
        assert_eq!(
            trace(&runner),
            pairs(&[("first", "JUMP1"), ("jump", "SUCCESS")])
        );
    }

    #[tokio::test]
    async fn test_step_panic_becomes_failure() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("FAILURE", "recover")],
                &[Attempt::Panic],
            )
            .step("recover", &[("SUCCESS", "")], &[])
            .retries("first", 2);

        let (runner, result) = run(&mut task).await;

        assert!(result.is_ok());
        // a panic carries the FAILURE code, so it is not retried
        assert_eq!(task.calls("first"), 1);
        assert_eq!(
            trace(&runner),
            pairs(&[("first", "FAILURE"), ("recover", "SUCCESS")])
        );
        let (key, err) = &task.failed[0];
        assert_eq!(key, "first");
        assert!(err
            .as_deref()
            .is_some_and(|e| e.starts_with("recovered from panic: panic in first")));
        assert_eq!(task.hooks.last().map(String::as_str), Some("after recover"));
    }

    #[tokio::test]
    async fn test_explicit_failure_code_calls_hook_without_error() {
        let mut task = ScriptedTask::new("first").step(
            "first",
            &[("FAILURE", "")],
            &[Attempt::Code("FAILURE")],
        );

        let (_, _) = run(&mut task).await;

        assert_eq!(task.failed, vec![("first".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_loops_are_followed() {
        let mut task = ScriptedTask::new("poll").step(
            "poll",
            &[("JUMP1", "poll"), ("SUCCESS", "")],
            &[
                Attempt::Code("JUMP1"),
                Attempt::Code("JUMP1"),
                Attempt::Code("SUCCESS"),
            ],
        );

        let (runner, _) = run(&mut task).await;

        assert_eq!(
            trace(&runner),
            pairs(&[("poll", "JUMP1"), ("poll", "JUMP1"), ("poll", "SUCCESS")])
        );
    }

    fn two_step_task() -> ScriptedTask {
        ScriptedTask::new("first")
            .step("first", &[("SUCCESS", "second")], &[])
            .step("second", &[("SUCCESS", "")], &[])
    }

    #[tokio::test]
    async fn test_run_steps_accumulate_until_cleared() {
        let mut runner = Runner::new();
        let mut ctx = Context::new();

        runner
            .run_task(&mut ctx, &mut two_step_task(), (), ())
            .await
            .expect("first run");
        runner
            .run_task(&mut ctx, &mut two_step_task(), (), ())
            .await
            .expect("second run");
        assert_eq!(runner.run_steps().len(), 4);

        runner.clear_run_steps();
        assert!(runner.run_steps().is_empty());

        runner
            .run_task(&mut ctx, &mut two_step_task(), (), ())
            .await
            .expect("third run");
        assert_eq!(
            trace(&runner),
            pairs(&[("first", "SUCCESS"), ("second", "SUCCESS")])
        );
        assert_eq!(
            runner.run_steps_json().expect("encodes"),
            r#"[{"StepKey":"first","StepCode":"SUCCESS"},{"StepKey":"second","StepCode":"SUCCESS"}]"#
        );
    }

    #[derive(Clone, Default)]
    struct RecordingTracer {
        events: Arc<Mutex<Vec<String>>>,
    }

    struct RecordingSpan {
        name: String,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSpan {
        fn push(&self, event: String) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    impl TraceSpan for RecordingSpan {
        fn add_event(&mut self, name: &str, attributes: &[(&str, &str)]) {
            let attrs: Vec<String> = attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.push(format!("{} {} {}", self.name, name, attrs.join(",")));
        }

        fn record_error(&mut self, error: &StepError) {
            self.push(format!("{} error {}", self.name, error));
        }

        fn end(self: Box<Self>) {
            self.push(format!("{} end", self.name));
        }
    }

    impl StartTrace<Context> for RecordingTracer {
        fn start_trace(&self, ctx: &mut Context, span_name: &str) -> Box<dyn TraceSpan> {
            ctx.set_metadata("span", span_name.to_string());
            Box::new(RecordingSpan {
                name: span_name.to_string(),
                events: Arc::clone(&self.events),
            })
        }
    }

    #[tokio::test]
    async fn test_tracer_wraps_every_attempt() {
        let tracer = RecordingTracer::default();
        let mut runner = Runner::new().with_tracer(tracer.clone());
        let mut ctx = Context::new();
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("SUCCESS", "")],
                &[Attempt::Fail, Attempt::Code("SUCCESS")],
            )
            .retries("first", 1);

        runner
            .run_task(&mut ctx, &mut task, (), ())
            .await
            .expect("run succeeds");

        let events = tracer.events.lock().map(|e| e.clone()).unwrap_or_default();
        assert_eq!(
            events,
            vec![
                "RunStep first StepCode code=",
                "RunStep first error first failed",
                "RunStep first end",
                "RunStep first StepCode code=SUCCESS",
                "RunStep first end",
            ]
        );
        assert_eq!(
            ctx.get_metadata("span").map(String::as_str),
            Some("RunStep first")
        );
    }

    #[tokio::test]
    async fn test_tracer_does_not_change_routing() {
        let mut plain = two_step_task();
        let (plain_runner, _) = run(&mut plain).await;

        let mut traced = two_step_task();
        let mut traced_runner = Runner::new().with_tracer(crate::TracingTracer);
        traced_runner
            .run_task(&mut Context::new(), &mut traced, (), ())
            .await
            .expect("run succeeds");

        assert_eq!(trace(&plain_runner), trace(&traced_runner));
    }

    #[tokio::test]
    async fn test_step_runs_inside_tracing_span() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut task = two_step_task();
        let mut runner = Runner::new().with_tracer(crate::TracingTracer);
        runner
            .run_task(&mut Context::new(), &mut task, (), ())
            .await
            .expect("run succeeds");
        assert_eq!(task.seen_spans, vec![Some("run_step"), Some("run_step")]);

        let mut task = two_step_task();
        let (_, result) = run(&mut task).await;
        assert!(result.is_ok());
        assert_eq!(task.seen_spans, vec![None, None]);
    }

    struct PanickingTracer;

    impl StartTrace<Context> for PanickingTracer {
        #[allow(clippy::panic)]
        fn start_trace(&self, _ctx: &mut Context, span_name: &str) -> Box<dyn TraceSpan> {
            panic!("tracer exploded on {}", span_name);
        }
    }

    #[tokio::test]
    async fn test_tracer_panic_becomes_failure() {
        let mut task = ScriptedTask::new("first")
            .step(
                "first",
                &[("SUCCESS", "second"), ("FAILURE", "")],
                &[Attempt::Code("SUCCESS")],
            )
            .step("second", &[], &[])
            .retries("first", 2);
        let mut runner = Runner::new().with_tracer(PanickingTracer);

        let result = runner
            .run_task(&mut Context::new(), &mut task, (), ())
            .await;

        assert!(result.is_ok());
        assert_eq!(trace(&runner), pairs(&[("first", "FAILURE")]));
        assert_eq!(task.calls("first"), 0);
        assert_eq!(task.failed.len(), 1);
        let (key, err) = &task.failed[0];
        assert_eq!(key, "first");
        assert!(err
            .as_deref()
            .is_some_and(|e| e.contains("recovered from panic: tracer exploded on RunStep first")));
    }

    #[test]
    fn test_runner_graph_uses_its_config() {
        let runner = Runner::new().with_graph_config(GraphConfig {
            finish_step_key: "end".to_string(),
            ..GraphConfig::default()
        });
        let graph = runner.task_graph(&two_step_task(), &[]);

        assert!(graph.contains("second --SUCCESS--> end\n"));
        assert_eq!(runner.graph_config().finish_step_key, "end");
    }
}
