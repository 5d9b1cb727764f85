#![doc = include_str!("../../../README.md")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass values consistently")]
#![expect(clippy::must_use_candidate, reason = "annotating every getter adds noise")]
#![expect(clippy::missing_panics_doc, reason = "internal invariants, not caller errors")]
#![expect(clippy::return_self_not_must_use, reason = "builder-style calls are obvious")]

pub mod activity;
pub mod anno;
pub mod ast;
pub mod ast_util;
pub mod convert;
pub mod defaults;
pub mod entity;
pub mod errors;
pub mod namespace;
pub mod naming;
pub mod overload;
pub mod parse;
pub mod qual_names;
pub mod run;
pub mod templates;
pub mod tracer;
pub mod transformer;
pub mod value;
pub mod virtualization;

pub use crate::{
    convert::{convert, convert_with_passes, Pass},
    defaults::host_defaults,
    errors::{ConvertError, ConvertResult, RunError, RunErrorKind, RunResult},
    namespace::Env,
    overload::{CallRegistry, Overload, rewriting_call},
    run::Interp,
    tracer::{ConvertTracer, NoopTracer, PipelinePhase, RecordingTracer, TraceEvent},
    value::{Kwargs, Value},
};
