//! Span instrumentation around step attempts.
//!
//! The runner calls [`StartTrace::start_trace`] before every attempt of a
//! step (the first call and each retry), adds a `StepCode` event with the
//! resulting code, records the error if the attempt failed and ends the
//! span. The step future runs inside [`TraceSpan::tracing_span`], so spans
//! and events the step emits nest under it. Tracers only observe: swapping
//! one for another never changes how a run is routed, and a tracer that
//! panics turns the attempt into a `FAILURE` like a panicking step does.

use crate::error::StepError;
use tracing::field;

/// A span opened for one step attempt.
pub trait TraceSpan: Send {
    /// Adds a named event with string attributes.
    fn add_event(&mut self, name: &str, attributes: &[(&str, &str)]);

    /// Marks the span as errored with `error`.
    fn record_error(&mut self, error: &StepError);

    /// Closes the span.
    fn end(self: Box<Self>);

    /// The `tracing` span the step attempt is instrumented with.
    fn tracing_span(&self) -> tracing::Span {
        tracing::Span::none()
    }
}

/// Opens spans for step attempts.
///
/// The context carrier is passed mutably so a tracer can attach span data
/// to it (ids, baggage) before the step sees it.
///
/// # Examples
///
/// ```
/// use taskflow::{Context, NoopTracer, Runner, StartTrace, StepError, TraceSpan};
///
/// struct CountingTracer;
///
/// struct CountingSpan;
///
/// impl TraceSpan for CountingSpan {
///     fn add_event(&mut self, _name: &str, _attributes: &[(&str, &str)]) {}
///     fn record_error(&mut self, _error: &StepError) {}
///     fn end(self: Box<Self>) {}
/// }
///
/// impl StartTrace<Context> for CountingTracer {
///     fn start_trace(&self, ctx: &mut Context, _span_name: &str) -> Box<dyn TraceSpan> {
///         let started = ctx.get::<u32>("spans").copied().unwrap_or(0);
///         ctx.insert("spans", started + 1);
///         Box::new(CountingSpan)
///     }
/// }
///
/// let runner = Runner::new().with_tracer(CountingTracer);
/// ```
pub trait StartTrace<C>: Send + Sync {
    fn start_trace(&self, ctx: &mut C, span_name: &str) -> Box<dyn TraceSpan>;
}

/// Tracer that does nothing. The runner's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl TraceSpan for NoopSpan {
    fn add_event(&mut self, _name: &str, _attributes: &[(&str, &str)]) {}

    fn record_error(&mut self, _error: &StepError) {}

    fn end(self: Box<Self>) {}
}

impl<C> StartTrace<C> for NoopTracer {
    fn start_trace(&self, _ctx: &mut C, _span_name: &str) -> Box<dyn TraceSpan> {
        Box::new(NoopSpan)
    }
}

/// Tracer backed by `tracing` spans.
///
/// Each attempt opens an `info` level `run_step` span whose `otel.name` is
/// the span name. The step code and the error message are recorded as span
/// fields, so any subscriber (including an OpenTelemetry layer) sees them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

struct TracingSpan {
    span: tracing::Span,
}

impl TraceSpan for TracingSpan {
    fn add_event(&mut self, name: &str, attributes: &[(&str, &str)]) {
        for (key, value) in attributes {
            if *key == "code" {
                self.span.record("step.code", *value);
            }
        }
        self.span
            .in_scope(|| tracing::debug!(event = name, ?attributes, "span event"));
    }

    fn record_error(&mut self, error: &StepError) {
        self.span.record("error", field::display(error));
        self.span
            .in_scope(|| tracing::error!(error = %error, "step attempt failed"));
    }

    fn end(self: Box<Self>) {
        drop(self.span);
    }

    fn tracing_span(&self) -> tracing::Span {
        self.span.clone()
    }
}

impl<C> StartTrace<C> for TracingTracer {
    fn start_trace(&self, _ctx: &mut C, span_name: &str) -> Box<dyn TraceSpan> {
        let span = tracing::info_span!(
            "run_step",
            otel.name = %span_name,
            step.code = field::Empty,
            error = field::Empty,
        );
        Box::new(TracingSpan { span })
    }
}
