//! The conversion pipeline.
//!
//! [`convert`] takes a function value, recovers its source, rewrites the
//! parsed tree so reads, writes, control flow, calls, and boolean operators
//! route through the overload's hooks, then compiles the result back into a
//! callable that closes over the same storage as the original.
//!
//! The pipeline moves through five phases, each reported to the
//! interpreter's tracer:
//!
//! 1. **Extract** — recover and parse the entity's source.
//! 2. **Transform** — run the requested rewrite passes, in order.
//! 3. **Wrap** — embed the rewritten entity in a generator function that
//!    takes the overload as a parameter and declares a dummy binding for
//!    every captured variable.
//! 4. **Compile** — execute the wrapper in a frame nested under the
//!    entity's module and call it to obtain the converted function.
//! 5. **Rebind** — swap each dummy binding's cell for the cell the original
//!    function closes over, so the converted function shares live state
//!    with its original.

use std::rc::Rc;

use ahash::AHashSet;

use crate::ast::{Ctx, Expr, NodeIds, Stmt, StmtKind};
use crate::entity::{EntityContext, EntityInfo};
use crate::errors::{ConvertError, ConvertResult, RunError};
use crate::namespace::Env;
use crate::overload::Overload;
use crate::parse::parse_entity;
use crate::run::Interp;
use crate::templates::{replace, TemplateValue};
use crate::tracer::{PipelinePhase, TraceEvent};
use crate::value::{Function, Kwargs, Value};
use crate::virtualization::{control_flow, function_calls, logical_ops, variables};

/// The rewrite passes, in the order the pipeline applies them.
///
/// The order matters: variable virtualization must see the original reads
/// and writes, control flow must run before calls so its generated thunk
/// plumbing is not itself virtualized as calls, and logical operators go
/// last so their thunks wrap fully rewritten operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Variables,
    ControlFlow,
    FunctionCalls,
    LogicalOps,
}

impl Pass {
    /// Every pass, in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::Variables,
        Self::ControlFlow,
        Self::FunctionCalls,
        Self::LogicalOps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Variables => "variables",
            Self::ControlFlow => "control_flow",
            Self::FunctionCalls => "function_calls",
            Self::LogicalOps => "logical_ops",
        }
    }

    fn apply(
        self,
        stmts: Vec<Stmt>,
        ctx: &mut EntityContext,
        overload: &Overload,
        overload_symbol: &str,
    ) -> ConvertResult<Vec<Stmt>> {
        match self {
            Self::Variables => variables::transform(stmts, ctx, overload, overload_symbol),
            Self::ControlFlow => control_flow::transform(stmts, ctx, overload, overload_symbol),
            Self::FunctionCalls => {
                function_calls::transform(stmts, ctx, overload, overload_symbol)
            }
            Self::LogicalOps => logical_ops::transform(stmts, ctx, overload, overload_symbol),
        }
    }
}

/// Converts `func` with every pass enabled.
pub fn convert(
    interp: &mut Interp,
    func: &Value,
    overload: Rc<Overload>,
) -> ConvertResult<Value> {
    convert_with_passes(interp, func, overload, &Pass::ALL)
}

/// Converts `func`, applying only the listed passes.
///
/// Each pass is still gated on the overload implementing its hooks, so
/// passing [`Pass::ALL`] with a partial overload rewrites only what the
/// overload can handle.
pub fn convert_with_passes(
    interp: &mut Interp,
    func: &Value,
    overload: Rc<Overload>,
    passes: &[Pass],
) -> ConvertResult<Value> {
    interp.tracer.trace(TraceEvent::Phase(PipelinePhase::Extract));
    let Value::Function(original) = func else {
        return Err(extraction_failure(
            format!("only functions can be converted, got {}", func.type_name()),
            Vec::new(),
        ));
    };
    let snippet = original.snippet.clone().ok_or_else(|| {
        extraction_failure(
            format!("no source is available for '{}'", original.name),
            Vec::new(),
        )
    })?;

    let mut ids = NodeIds::new();
    let (program, source_code) = parse_entity(&snippet, &mut ids)?;
    let entity_name = single_def_name(&program, &source_code)?;
    let mut ctx = EntityContext::new(EntityInfo {
        source_code,
        source_file: format!("<{}>", original.name),
        namespace: original.env.module_env(),
        arg_values: None,
        owner_type: None,
    });
    ctx.ids = ids;
    let reserved = entity_bound_names(original);
    let overload_symbol = ctx.namer.new_symbol("overload", &reserved);

    interp.tracer.trace(TraceEvent::Phase(PipelinePhase::Transform));
    let mut program = program;
    for pass in passes {
        interp.tracer.trace(TraceEvent::PassBegin(pass.name()));
        program = pass.apply(program, &mut ctx, &overload, &overload_symbol)?;
        interp.tracer.trace(TraceEvent::PassEnd(pass.name()));
    }

    interp.tracer.trace(TraceEvent::Phase(PipelinePhase::Wrap));
    // Captured variables become dummy locals of the generator so the
    // converted function closes over the generator's frame; rebinding then
    // redirects those cells to the original's. Module-level and builtin
    // names are left alone so they keep resolving where they always did.
    let captured: Vec<String> = original
        .free_names
        .iter()
        .filter(|name| original.env.resolves_below_module(name))
        .cloned()
        .collect();
    let mut capture_inits = Vec::with_capacity(captured.len());
    for name in &captured {
        let target = Expr::name(&mut ctx.ids, name.as_str(), Ctx::Store);
        let value = Expr::none_lit(&mut ctx.ids);
        capture_inits.push(Stmt::assign(&mut ctx.ids, target, value));
    }
    let generator_symbol = ctx
        .namer
        .new_symbol(&format!("gen_{entity_name}"), &reserved);
    let wrapper = replace(
        &mut ctx.ids,
        "
        def gen_fn(ov):
            capture_inits
            program
            return entity
        ",
        &[
            ("gen_fn", TemplateValue::Name(generator_symbol.clone())),
            ("ov", TemplateValue::Name(overload_symbol)),
            ("capture_inits", TemplateValue::Stmts(capture_inits)),
            ("program", TemplateValue::Stmts(program)),
            ("entity", TemplateValue::Name(entity_name)),
        ],
    )?;

    interp.tracer.trace(TraceEvent::Phase(PipelinePhase::Compile));
    let generator_env = Env::nested(&ctx.info.namespace);
    let source: Rc<str> = Rc::from(ctx.info.source_code.as_str());
    interp.exec_program(&wrapper, &generator_env, Some(source))?;
    let generator = generator_env
        .get(&generator_symbol)
        .ok_or_else(|| ConvertError::from(RunError::name_error(&generator_symbol)))?;
    let converted = interp.call_value(
        generator,
        vec![Value::Overload(Rc::clone(&overload))],
        Kwargs::new(),
    )?;

    interp.tracer.trace(TraceEvent::Phase(PipelinePhase::Rebind));
    let Value::Function(converted_fn) = &converted else {
        return Err(ConvertError::from(RunError::type_error(format!(
            "conversion produced a {}, not a function",
            converted.type_name()
        ))));
    };
    for name in &captured {
        if let Some(cell) = original.env.find_cell(name) {
            converted_fn.env.adopt_cell(name, cell);
        }
    }
    Ok(converted)
}

/// The recovered program must be exactly one `def`; returns its name.
fn single_def_name(program: &[Stmt], source: &str) -> ConvertResult<String> {
    if let [stmt] = program {
        if let StmtKind::FunctionDef { name, .. } = &stmt.kind {
            return Ok(name.clone());
        }
    }
    Err(extraction_failure(
        "recovered source is not a single function definition".to_owned(),
        vec![source.to_owned()],
    ))
}

fn extraction_failure(message: String, attempted: Vec<String>) -> ConvertError {
    ConvertError::Extraction { message, attempted }
}

/// Every name the entity binds or captures; generated symbols must avoid
/// them all.
fn entity_bound_names(f: &Function) -> AHashSet<String> {
    let mut reserved: AHashSet<String> = f.local_names.iter().cloned().collect();
    reserved.extend(f.global_names.iter().cloned());
    reserved.extend(f.nonlocal_names.iter().cloned());
    reserved.extend(f.free_names.iter().cloned());
    reserved.extend(f.params.bound_names().iter().map(|n| (*n).to_string()));
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::host_defaults;
    use crate::errors::RunErrorKind;
    use crate::tracer::RecordingTracer;

    fn int_arg(v: i64) -> Vec<Value> {
        vec![Value::Int(v)]
    }

    #[test]
    fn converted_function_matches_the_original() {
        let mut interp = Interp::new();
        let env = interp
            .run_module(
                "def fib(n):\n    a = 0\n    b = 1\n    i = 0\n    while i < n:\n        a, b = b, a + b\n        i = i + 1\n    return a\n",
            )
            .unwrap();
        let original = env.get("fib").unwrap();
        let converted = convert(&mut interp, &original, host_defaults()).unwrap();
        let got = interp
            .call_value(converted, int_arg(10), Kwargs::new())
            .unwrap();
        assert_eq!(got, Value::Int(55));
    }

    #[test]
    fn converted_closure_shares_cells_with_the_original() {
        let mut interp = Interp::new();
        let env = interp
            .run_module(
                "def counter():\n    n = 0\n    def bump():\n        nonlocal n\n        n = n + 1\n        return n\n    return bump\n",
            )
            .unwrap();
        let counter = env.get("counter").unwrap();
        let bump = interp
            .call_value(counter, Vec::new(), Kwargs::new())
            .unwrap();
        let converted = convert(&mut interp, &bump, host_defaults()).unwrap();
        let first = interp
            .call_value(converted.clone(), Vec::new(), Kwargs::new())
            .unwrap();
        let second = interp
            .call_value(converted, Vec::new(), Kwargs::new())
            .unwrap();
        assert_eq!((first, second), (Value::Int(1), Value::Int(2)));
        // The original sees the converted function's writes.
        let third = interp.call_value(bump, Vec::new(), Kwargs::new()).unwrap();
        assert_eq!(third, Value::Int(3));
    }

    #[test]
    fn converted_function_reads_and_writes_module_globals() {
        let mut interp = Interp::new();
        let env = interp
            .run_module("total = 0\ndef add(v):\n    global total\n    total = total + v\n    return total\n")
            .unwrap();
        let add = env.get("add").unwrap();
        let converted = convert(&mut interp, &add, host_defaults()).unwrap();
        let got = interp
            .call_value(converted, int_arg(7), Kwargs::new())
            .unwrap();
        assert_eq!(got, Value::Int(7));
        assert_eq!(env.get("total"), Some(Value::Int(7)));
    }

    #[test]
    fn pipeline_phases_are_traced_in_order() {
        let tracer = RecordingTracer::new();
        let log = tracer.events();
        let mut interp = Interp::with_tracer(Box::new(tracer));
        let env = interp.run_module("def ident(x):\n    return x\n").unwrap();
        let ident = env.get("ident").unwrap();
        convert(&mut interp, &ident, host_defaults()).unwrap();
        let phases: Vec<PipelinePhase> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Phase(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                PipelinePhase::Extract,
                PipelinePhase::Transform,
                PipelinePhase::Wrap,
                PipelinePhase::Compile,
                PipelinePhase::Rebind,
            ]
        );
        let pass_events = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, TraceEvent::PassBegin(_) | TraceEvent::PassEnd(_)))
            .count();
        assert_eq!(pass_events, 2 * Pass::ALL.len());
    }

    #[test]
    fn non_function_values_are_rejected() {
        let mut interp = Interp::new();
        let err = convert(&mut interp, &Value::Int(3), host_defaults()).unwrap_err();
        assert!(matches!(err, ConvertError::Extraction { .. }));
    }

    #[test]
    fn functions_without_source_are_rejected() {
        let mut interp = Interp::new();
        let len = interp.builtins_env().get("len").unwrap();
        let err = convert(&mut interp, &len, host_defaults()).unwrap_err();
        assert!(matches!(err, ConvertError::Extraction { .. }));
    }

    #[test]
    fn unbound_local_reads_surface_as_unbound_storage() {
        let mut interp = Interp::new();
        let env = interp
            .run_module("def f(flag):\n    if flag:\n        x = 1\n    return x\n")
            .unwrap();
        let f = env.get("f").unwrap();
        let converted = convert(&mut interp, &f, host_defaults()).unwrap();
        let err = interp
            .call_value(converted, vec![Value::Bool(false)], Kwargs::new())
            .unwrap_err();
        assert_eq!(err.kind, RunErrorKind::UnboundStorage);
    }
}
