//! Conversion and execution tracing.
//!
//! A trait-based hook system: the pipeline and the evaluator report events to
//! a [`ConvertTracer`], and callers choose the implementation. [`NoopTracer`]
//! discards everything; [`RecordingTracer`] keeps a shared event log that the
//! caller can inspect after the fact.

use std::cell::RefCell;
use std::rc::Rc;

use strum::Display;

/// The states a conversion moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, serde::Serialize)]
pub enum PipelinePhase {
    Extract,
    Transform,
    Wrap,
    Compile,
    Rebind,
}

/// Trace event emitted during conversion or evaluation. Serializable, so a
/// recorded log can be dumped for offline inspection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum TraceEvent {
    /// The pipeline entered a new phase.
    Phase(PipelinePhase),
    /// A rewrite pass started.
    PassBegin(&'static str),
    /// A rewrite pass finished.
    PassEnd(&'static str),
    /// The evaluator dispatched an overload hook.
    Hook(&'static str),
}

pub trait ConvertTracer {
    fn trace(&mut self, _event: TraceEvent) {}
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl ConvertTracer for NoopTracer {}

/// Records every event into a log shared with the caller.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the event log; stays valid after the tracer is handed to
    /// an interpreter.
    pub fn events(&self) -> Rc<RefCell<Vec<TraceEvent>>> {
        Rc::clone(&self.events)
    }
}

impl ConvertTracer for RecordingTracer {
    fn trace(&mut self, event: TraceEvent) {
        self.events.borrow_mut().push(event);
    }
}
