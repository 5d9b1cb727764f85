//! A small tree-walking evaluator for the modeled Python subset.
//!
//! The converter's output is ordinary source in the same subset it consumes,
//! so compiling a converted entity means evaluating its generated wrapper
//! here. The evaluator also runs unconverted entities, which is what the
//! conversion tests lean on: run the original and the converted function side
//! by side and compare.
//!
//! Calls on an attribute of an [`Overload`] value are the one special form:
//! they dispatch to the overload's hooks instead of ordinary attribute
//! lookup, with the packed argument tuples and dicts of the generated calling
//! convention unpacked first.

use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;
use ruff_text_size::TextRange;

use crate::ast::{
    BinOpKind, BoolOpKind, CmpOpKind, Ctx, Expr, ExprKind, Keyword, NodeIds, Param, Params, Stmt,
    StmtKind, UnaryOpKind,
};
use crate::errors::{ConvertResult, RunError, RunErrorKind, RunResult};
use crate::namespace::Env;
use crate::overload::Overload;
use crate::parse::parse_block;
use crate::tracer::{ConvertTracer, NoopTracer, TraceEvent};
use crate::value::{Builtin, DictKey, Function, Kwargs, Value};

/// Default recursion limit. Converted code nests the original's control flow
/// inside generated thunks, so this is well above what the originals need.
const MAX_DEPTH: usize = 500;

/// Non-sequential statement outcomes, threaded out of nested blocks.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// What a block of statements executes against: the environment frame, the
/// enclosing function (for its binding classification), and the source text
/// the block was parsed from.
#[derive(Clone)]
pub struct ScopeCtx {
    pub env: Env,
    fun: Option<Rc<Function>>,
    source: Option<Rc<str>>,
}

impl ScopeCtx {
    pub fn module(env: Env, source: Option<Rc<str>>) -> Self {
        Self {
            env,
            fun: None,
            source,
        }
    }
}

pub struct Interp {
    pub ids: NodeIds,
    pub tracer: Box<dyn ConvertTracer>,
    builtins: Env,
    depth: usize,
    max_depth: usize,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    pub fn new() -> Self {
        Self::with_tracer(Box::new(NoopTracer))
    }

    pub fn with_tracer(tracer: Box<dyn ConvertTracer>) -> Self {
        let builtins = Env::builtins();
        install_builtins(&builtins);
        Self {
            ids: NodeIds::new(),
            tracer,
            builtins,
            depth: 0,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn builtins_env(&self) -> &Env {
        &self.builtins
    }

    /// Parse and execute `source` as a fresh module, returning its namespace.
    pub fn run_module(&mut self, source: &str) -> ConvertResult<Env> {
        let stmts = parse_block(source, &mut self.ids)?;
        let env = Env::module(&self.builtins);
        let ctx = ScopeCtx::module(env.clone(), Some(Rc::from(source)));
        self.exec_block(&stmts, &ctx)?;
        Ok(env)
    }

    /// Execute an already-lowered program against a caller-supplied frame.
    /// Used to evaluate generated wrappers inside the entity's module.
    pub fn exec_program(
        &mut self,
        stmts: &[Stmt],
        env: &Env,
        source: Option<Rc<str>>,
    ) -> RunResult<()> {
        let ctx = ScopeCtx::module(env.clone(), source);
        self.exec_block(stmts, &ctx)?;
        Ok(())
    }

    /// Call `func` with no arguments, capturing the values of `freevars`
    /// (storage handles) after the call and restoring their prior state.
    /// Returns the captured values alongside the call's result.
    pub fn execute_isolated(
        &mut self,
        func: Value,
        freevars: &[Value],
    ) -> RunResult<(Vec<Value>, Value)> {
        let mut handles = Vec::with_capacity(freevars.len());
        for v in freevars {
            match v {
                Value::Handle(h) => handles.push(Rc::clone(h)),
                other => {
                    return Err(RunError::type_error(format!(
                        "execute_isolated expects storage handles, got {}",
                        other.type_name()
                    )));
                }
            }
        }
        let snapshot: Vec<Option<Value>> = handles.iter().map(|h| h.borrow().val.clone()).collect();
        let result = self.call_value(func, Vec::new(), Kwargs::new());
        let after: Vec<Value> = handles
            .iter()
            .map(|h| h.borrow().val.clone().unwrap_or(Value::None))
            .collect();
        for (h, old) in handles.iter().zip(snapshot) {
            h.borrow_mut().val = old;
        }
        Ok((after, result?))
    }

    fn exec_block(&mut self, stmts: &[Stmt], ctx: &ScopeCtx) -> RunResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, ctx)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, ctx: &ScopeCtx) -> RunResult<Flow> {
        match &stmt.kind {
            StmtKind::FunctionDef { name, params, body } => {
                let func = self.make_function(name, params, body, stmt.range, ctx)?;
                self.store_name(name, func, ctx)?;
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, ctx)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value, ctx)?;
                for target in targets {
                    self.assign_target(target, value.clone(), ctx)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval_expr(target, ctx)?;
                let rhs = self.eval_expr(value, ctx)?;
                let updated = binary_op(*op, &current, &rhs)?;
                self.assign_target(target, updated, ctx)?;
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(expr, ctx)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { test, body, orelse } => {
                if self.eval_expr(test, ctx)?.is_truthy() {
                    self.exec_block(body, ctx)
                } else {
                    self.exec_block(orelse, ctx)
                }
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    if !self.eval_expr(test, ctx)?.is_truthy() {
                        return self.exec_block(orelse, ctx);
                    }
                    match self.exec_block(body, ctx)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Normal),
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval_expr(iter, ctx)?;
                for item in iter_values(&iterable)? {
                    self.assign_target(target, item, ctx)?;
                    match self.exec_block(body, ctx)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Normal),
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                self.exec_block(orelse, ctx)
            }
            // Declarations are consumed by binding analysis at def time.
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
        }
    }

    fn make_function(
        &mut self,
        name: &str,
        params: &Params,
        body: &[Stmt],
        range: TextRange,
        ctx: &ScopeCtx,
    ) -> RunResult<Value> {
        let bindings = Bindings::of(params, body);
        let defaults = self.eval_defaults(&params.args, ctx)?;
        let kw_defaults = self.eval_defaults(&params.kwonlyargs, ctx)?;
        let snippet = match &ctx.source {
            Some(source) if !range.is_empty() => Some(line_slice(source, range)),
            _ => None,
        };
        Ok(Value::Function(Rc::new(Function {
            name: name.to_string(),
            params: params.clone(),
            body: Rc::new(body.to_vec()),
            env: ctx.env.clone(),
            defaults,
            kw_defaults,
            local_names: bindings.locals,
            global_names: bindings.globals,
            nonlocal_names: bindings.nonlocals,
            free_names: bindings.free,
            snippet,
            module_source: ctx.source.clone(),
        })))
    }

    fn eval_defaults(&mut self, params: &[Param], ctx: &ScopeCtx) -> RunResult<Vec<Option<Value>>> {
        params
            .iter()
            .map(|p| p.default.as_ref().map(|d| self.eval_expr(d, ctx)).transpose())
            .collect()
    }

    /// Call any callable value with already-evaluated arguments.
    pub fn call_value(&mut self, func: Value, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        match func {
            Value::Function(f) => self.call_function(&f, args, kwargs),
            Value::Builtin(b) => (b.call)(self, args, kwargs),
            Value::Method(m) => call_method(&m.recv, &m.name, args, kwargs),
            other => Err(RunError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        f: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RunResult<Value> {
        if self.depth >= self.max_depth {
            return Err(RunError::new(
                RunErrorKind::Recursion,
                format!("maximum recursion depth exceeded calling '{}'", f.name),
            ));
        }
        let env = Env::nested(&f.env);
        bind_arguments(f, args, kwargs, &env)?;
        let ctx = ScopeCtx {
            env,
            fun: Some(Rc::clone(f)),
            source: f.module_source.clone(),
        };
        self.depth += 1;
        let result = self.exec_block(&f.body, &ctx);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn eval_expr(&mut self, expr: &Expr, ctx: &ScopeCtx) -> RunResult<Value> {
        match &expr.kind {
            ExprKind::Name { name, .. } => self.load_name(name, ctx),
            ExprKind::Int(v) => Ok(Value::Int(*v)),
            ExprKind::Float(v) => Ok(Value::Float(*v)),
            ExprKind::Str(v) => Ok(Value::str(v)),
            ExprKind::Bool(v) => Ok(Value::Bool(*v)),
            ExprKind::None => Ok(Value::None),
            ExprKind::Tuple { elts, .. } => Ok(Value::tuple(self.eval_elements(elts, ctx)?)),
            ExprKind::List { elts, .. } => Ok(Value::list(self.eval_elements(elts, ctx)?)),
            ExprKind::Dict { keys, values } => self.eval_dict(keys, values, ctx),
            ExprKind::Attribute { value, attr, .. } => {
                let value = self.eval_expr(value, ctx)?;
                attribute_load(&value, attr)
            }
            ExprKind::Subscript { value, index, .. } => {
                let value = self.eval_expr(value, ctx)?;
                let index = self.eval_expr(index, ctx)?;
                subscript_load(&value, &index)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.eval_call(func, args, keywords, ctx),
            ExprKind::Starred { .. } => Err(RunError::type_error(
                "starred expression outside of a call or literal",
            )),
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for (i, operand) in values.iter().enumerate() {
                    result = self.eval_expr(operand, ctx)?;
                    if i + 1 == values.len() {
                        break;
                    }
                    let truthy = result.is_truthy();
                    match op {
                        BoolOpKind::And if !truthy => break,
                        BoolOpKind::Or if truthy => break,
                        _ => {}
                    }
                }
                Ok(result)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval_expr(operand, ctx)?;
                unary_op(*op, &operand)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval_expr(left, ctx)?;
                let right = self.eval_expr(right, ctx)?;
                binary_op(*op, &left, &right)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut lhs = self.eval_expr(left, ctx)?;
                for (op, rhs) in ops.iter().zip(comparators) {
                    let rhs = self.eval_expr(rhs, ctx)?;
                    if !compare_op(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Lambda { params, body } => {
                let ret = Stmt::synth(&mut self.ids, StmtKind::Return(Some((**body).clone())));
                self.make_function("<lambda>", params, &[ret], TextRange::default(), ctx)
            }
        }
    }

    /// Element list with `*expr` splats spliced in.
    fn eval_elements(&mut self, elts: &[Expr], ctx: &ScopeCtx) -> RunResult<Vec<Value>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            if let ExprKind::Starred { value } = &elt.kind {
                let spread = self.eval_expr(value, ctx)?;
                out.extend(iter_values(&spread)?);
            } else {
                out.push(self.eval_expr(elt, ctx)?);
            }
        }
        Ok(out)
    }

    fn eval_dict(
        &mut self,
        keys: &[Option<Expr>],
        values: &[Expr],
        ctx: &ScopeCtx,
    ) -> RunResult<Value> {
        let mut map = IndexMap::new();
        for (key, value) in keys.iter().zip(values) {
            let value = self.eval_expr(value, ctx)?;
            match key {
                Some(key) => {
                    let key = self.eval_expr(key, ctx)?;
                    map.insert(DictKey::from_value(&key)?, value);
                }
                // `**value` splat: merge, later entries win.
                None => match value {
                    Value::Dict(d) => {
                        for (k, v) in d.borrow().iter() {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        return Err(RunError::type_error(format!(
                            "argument after ** must be a dict, got {}",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(Value::Dict(Rc::new(std::cell::RefCell::new(map))))
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        ctx: &ScopeCtx,
    ) -> RunResult<Value> {
        // Hook dispatch: a call on an attribute of an overload value.
        if let ExprKind::Attribute { value, attr, .. } = &func.kind {
            let recv = self.eval_expr(value, ctx)?;
            if let Value::Overload(ov) = recv {
                let args = self.eval_elements(args, ctx)?;
                return self.dispatch_hook(&ov, attr, args);
            }
            let args = self.eval_elements(args, ctx)?;
            let kwargs = self.eval_keywords(keywords, ctx)?;
            let callee = attribute_load(&recv, attr)?;
            return self.call_value(callee, args, kwargs);
        }
        let callee = self.eval_expr(func, ctx)?;
        let args = self.eval_elements(args, ctx)?;
        let kwargs = self.eval_keywords(keywords, ctx)?;
        self.call_value(callee, args, kwargs)
    }

    fn eval_keywords(&mut self, keywords: &[Keyword], ctx: &ScopeCtx) -> RunResult<Kwargs> {
        let mut kwargs = Kwargs::new();
        for kw in keywords {
            let value = self.eval_expr(&kw.value, ctx)?;
            match &kw.name {
                Some(name) => {
                    kwargs.insert(name.clone(), value);
                }
                None => merge_kwargs(&mut kwargs, &value)?,
            }
        }
        Ok(kwargs)
    }

    /// Unpack the generated calling convention and invoke the named hook.
    fn dispatch_hook(&mut self, ov: &Overload, attr: &str, args: Vec<Value>) -> RunResult<Value> {
        let hook_name = hook_static_name(attr)
            .ok_or_else(|| RunError::attribute_error("overload", attr))?;
        self.tracer.trace(TraceEvent::Hook(hook_name));
        let missing = || RunError::attribute_error("overload", attr);
        let arity = |expected: usize, got: usize| {
            RunError::new(
                RunErrorKind::Arity,
                format!("overload hook '{attr}' takes {expected} arguments, got {got}"),
            )
        };
        match attr {
            "init" => {
                let [name] = unpack_args(args).map_err(|n| arity(1, n))?;
                let Value::Str(name) = name else {
                    return Err(RunError::type_error("init expects a variable name"));
                };
                let hook = ov.init.clone().ok_or_else(missing)?;
                hook(self, &name)
            }
            "assign" => {
                let [lhs, rhs] = unpack_args(args).map_err(|n| arity(2, n))?;
                let hook = ov.assign.clone().ok_or_else(missing)?;
                hook(self, lhs, rhs)
            }
            "read" => {
                let [value] = unpack_args(args).map_err(|n| arity(1, n))?;
                let hook = ov.read.clone().ok_or_else(missing)?;
                hook(self, value)
            }
            "not_" => {
                let [value] = unpack_args(args).map_err(|n| arity(1, n))?;
                let hook = ov.not_.clone().ok_or_else(missing)?;
                hook(self, value)
            }
            "call" => {
                let [callee, packed_args, packed_kwargs] =
                    unpack_args(args).map_err(|n| arity(3, n))?;
                let call_args = iter_values(&packed_args)?;
                let mut call_kwargs = Kwargs::new();
                merge_kwargs(&mut call_kwargs, &packed_kwargs)?;
                let hook = ov.call.clone().ok_or_else(missing)?;
                hook(self, callee, call_args, call_kwargs)
            }
            "if_stmt" | "while_stmt" => {
                let [test, body, orelse, writes] = unpack_args(args).map_err(|n| arity(4, n))?;
                let writes = iter_values(&writes)?;
                let hook = if attr == "if_stmt" {
                    ov.if_stmt.clone()
                } else {
                    ov.while_stmt.clone()
                }
                .ok_or_else(missing)?;
                hook(self, test, body, orelse, writes)
            }
            "for_stmt" => {
                let [target, iter, body, orelse, writes] =
                    unpack_args(args).map_err(|n| arity(5, n))?;
                let writes = iter_values(&writes)?;
                let hook = ov.for_stmt.clone().ok_or_else(missing)?;
                hook(self, target, iter, body, orelse, writes)
            }
            "and_" | "or_" => {
                let [first, rest] = unpack_args(args).map_err(|n| arity(2, n))?;
                let rest = iter_values(&rest)?;
                let hook = if attr == "and_" {
                    ov.and_.clone()
                } else {
                    ov.or_.clone()
                }
                .ok_or_else(missing)?;
                hook(self, first, rest)
            }
            _ => unreachable!("hook_static_name filtered unknown attributes"),
        }
    }

    fn load_name(&mut self, name: &str, ctx: &ScopeCtx) -> RunResult<Value> {
        if let Some(fun) = &ctx.fun {
            if fun.local_names.contains(name) {
                return match ctx.env.local_cell(name) {
                    Some(cell) => Ok(cell.borrow().clone()),
                    None => Err(RunError::unbound_storage(name)),
                };
            }
            if fun.global_names.contains(name) {
                return ctx
                    .env
                    .module_env()
                    .find_cell(name)
                    .map(|cell| cell.borrow().clone())
                    .ok_or_else(|| RunError::name_error(name));
            }
            if fun.nonlocal_names.contains(name) {
                return ctx
                    .env
                    .find_enclosing_cell(name)
                    .map(|cell| cell.borrow().clone())
                    .ok_or_else(|| RunError::name_error(name));
            }
        }
        ctx.env
            .find_cell(name)
            .map(|cell| cell.borrow().clone())
            .ok_or_else(|| RunError::name_error(name))
    }

    fn store_name(&mut self, name: &str, value: Value, ctx: &ScopeCtx) -> RunResult<()> {
        if let Some(fun) = &ctx.fun {
            if fun.global_names.contains(name) {
                ctx.env.module_env().set_local(name, value);
                return Ok(());
            }
            if fun.nonlocal_names.contains(name) {
                let cell = ctx
                    .env
                    .find_enclosing_cell(name)
                    .ok_or_else(|| RunError::name_error(name))?;
                *cell.borrow_mut() = value;
                return Ok(());
            }
        }
        ctx.env.set_local(name, value);
        Ok(())
    }

    fn assign_target(&mut self, target: &Expr, value: Value, ctx: &ScopeCtx) -> RunResult<()> {
        match &target.kind {
            ExprKind::Name { name, .. } => self.store_name(name, value, ctx),
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                let values = iter_values(&value)?;
                if values.len() != elts.len() {
                    return Err(RunError::new(
                        RunErrorKind::Value,
                        format!(
                            "cannot unpack {} values into {} targets",
                            values.len(),
                            elts.len()
                        ),
                    ));
                }
                for (elt, v) in elts.iter().zip(values) {
                    self.assign_target(elt, v, ctx)?;
                }
                Ok(())
            }
            ExprKind::Subscript {
                value: obj, index, ..
            } => {
                let obj = self.eval_expr(obj, ctx)?;
                let index = self.eval_expr(index, ctx)?;
                subscript_store(&obj, &index, value)
            }
            _ => Err(RunError::type_error(format!(
                "cannot assign to {}",
                target.kind_name()
            ))),
        }
    }
}

fn unpack_args<const N: usize>(args: Vec<Value>) -> Result<[Value; N], usize> {
    let len = args.len();
    <[Value; N]>::try_from(args).map_err(|_| len)
}

fn hook_static_name(attr: &str) -> Option<&'static str> {
    match attr {
        "init" => Some("init"),
        "assign" => Some("assign"),
        "read" => Some("read"),
        "call" => Some("call"),
        "if_stmt" => Some("if_stmt"),
        "while_stmt" => Some("while_stmt"),
        "for_stmt" => Some("for_stmt"),
        "and_" => Some("and_"),
        "or_" => Some("or_"),
        "not_" => Some("not_"),
        _ => None,
    }
}

fn merge_kwargs(kwargs: &mut Kwargs, packed: &Value) -> RunResult<()> {
    match packed {
        Value::Dict(d) => {
            for (key, value) in d.borrow().iter() {
                match key {
                    DictKey::Str(s) => {
                        kwargs.insert(s.to_string(), value.clone());
                    }
                    other => {
                        return Err(RunError::type_error(format!(
                            "keywords must be strings, got {:?}",
                            other.to_value()
                        )));
                    }
                }
            }
            Ok(())
        }
        other => Err(RunError::type_error(format!(
            "argument after ** must be a dict, got {}",
            other.type_name()
        ))),
    }
}

fn bind_arguments(f: &Function, args: Vec<Value>, mut kwargs: Kwargs, env: &Env) -> RunResult<()> {
    let params = &f.params;
    let n_positional = params.args.len();
    let mut args = args.into_iter();
    for (i, param) in params.args.iter().enumerate() {
        if let Some(value) = args.next() {
            if kwargs.contains_key(&param.name) {
                return Err(RunError::new(
                    RunErrorKind::Arity,
                    format!("{}() got multiple values for argument '{}'", f.name, param.name),
                ));
            }
            env.define(&param.name, value);
        } else if let Some(value) = kwargs.shift_remove(&param.name) {
            env.define(&param.name, value);
        } else if let Some(default) = &f.defaults[i] {
            env.define(&param.name, default.clone());
        } else {
            return Err(RunError::new(
                RunErrorKind::Arity,
                format!("{}() missing required argument '{}'", f.name, param.name),
            ));
        }
    }
    let rest: Vec<Value> = args.collect();
    if let Some(vararg) = &params.vararg {
        env.define(vararg, Value::tuple(rest));
    } else if !rest.is_empty() {
        return Err(RunError::new(
            RunErrorKind::Arity,
            format!(
                "{}() takes {} positional arguments but {} were given",
                f.name,
                n_positional,
                n_positional + rest.len()
            ),
        ));
    }
    for (i, param) in params.kwonlyargs.iter().enumerate() {
        if let Some(value) = kwargs.shift_remove(&param.name) {
            env.define(&param.name, value);
        } else if let Some(default) = &f.kw_defaults[i] {
            env.define(&param.name, default.clone());
        } else {
            return Err(RunError::new(
                RunErrorKind::Arity,
                format!(
                    "{}() missing required keyword-only argument '{}'",
                    f.name, param.name
                ),
            ));
        }
    }
    if let Some(kwarg) = &params.kwarg {
        let mut map = IndexMap::new();
        for (key, value) in kwargs {
            map.insert(DictKey::Str(Rc::from(key.as_str())), value);
        }
        env.define(kwarg, Value::Dict(Rc::new(std::cell::RefCell::new(map))));
    } else if let Some(name) = kwargs.keys().next() {
        return Err(RunError::new(
            RunErrorKind::Arity,
            format!("{}() got an unexpected keyword argument '{name}'", f.name),
        ));
    }
    Ok(())
}

/// Materialize the items of an iterable value.
pub fn iter_values(value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::Tuple(t) => Ok(t.as_ref().clone()),
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(d) => Ok(d.borrow().keys().map(DictKey::to_value).collect()),
        other => Err(RunError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn attribute_load(value: &Value, attr: &str) -> RunResult<Value> {
    match value {
        Value::Overload(_) => Err(RunError::type_error(
            "overload hooks can only appear in call position",
        )),
        Value::List(_) if matches!(attr, "append" | "extend" | "pop") => {
            Ok(Value::Method(Rc::new(crate::value::BoundMethod {
                recv: value.clone(),
                name: attr.to_string(),
            })))
        }
        Value::Dict(_) if matches!(attr, "get" | "keys" | "values" | "items") => {
            Ok(Value::Method(Rc::new(crate::value::BoundMethod {
                recv: value.clone(),
                name: attr.to_string(),
            })))
        }
        other => Err(RunError::attribute_error(other.type_name(), attr)),
    }
}

fn call_method(recv: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
    if !kwargs.is_empty() {
        return Err(RunError::type_error(format!(
            "{name}() takes no keyword arguments"
        )));
    }
    match (recv, name) {
        (Value::List(l), "append") => {
            let [item] = unpack_args(args)
                .map_err(|n| RunError::type_error(format!("append() takes 1 argument, got {n}")))?;
            l.borrow_mut().push(item);
            Ok(Value::None)
        }
        (Value::List(l), "extend") => {
            let [items] = unpack_args(args)
                .map_err(|n| RunError::type_error(format!("extend() takes 1 argument, got {n}")))?;
            let items = iter_values(&items)?;
            l.borrow_mut().extend(items);
            Ok(Value::None)
        }
        (Value::List(l), "pop") => {
            let mut list = l.borrow_mut();
            let index = match args.len() {
                0 => list.len().checked_sub(1),
                1 => match &args[0] {
                    Value::Int(i) => normalize_index(*i, list.len()),
                    other => {
                        return Err(RunError::type_error(format!(
                            "pop() index must be an int, got {}",
                            other.type_name()
                        )));
                    }
                },
                n => {
                    return Err(RunError::type_error(format!(
                        "pop() takes at most 1 argument, got {n}"
                    )));
                }
            };
            match index {
                Some(i) if i < list.len() => Ok(list.remove(i)),
                _ => Err(RunError::new(RunErrorKind::Index, "pop from empty list")),
            }
        }
        (Value::Dict(d), "get") => {
            let (key, default) = match args.len() {
                1 => (args[0].clone(), Value::None),
                2 => (args[0].clone(), args[1].clone()),
                n => {
                    return Err(RunError::type_error(format!(
                        "get() takes 1 or 2 arguments, got {n}"
                    )));
                }
            };
            let key = DictKey::from_value(&key)?;
            Ok(d.borrow().get(&key).cloned().unwrap_or(default))
        }
        (Value::Dict(d), "keys") => Ok(Value::list(
            d.borrow().keys().map(DictKey::to_value).collect(),
        )),
        (Value::Dict(d), "values") => Ok(Value::list(d.borrow().values().cloned().collect())),
        (Value::Dict(d), "items") => Ok(Value::list(
            d.borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                .collect(),
        )),
        _ => Err(RunError::attribute_error(recv.type_name(), name)),
    }
}

fn subscript_load(value: &Value, index: &Value) -> RunResult<Value> {
    match value {
        Value::List(l) => {
            let list = l.borrow();
            sequence_index(&list, index, "list")
        }
        Value::Tuple(t) => sequence_index(t, index, "tuple"),
        Value::Str(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::str(c.to_string())).collect();
            sequence_index(&chars, index, "str")
        }
        Value::Dict(d) => {
            let key = DictKey::from_value(index)?;
            d.borrow().get(&key).cloned().ok_or_else(|| {
                RunError::new(RunErrorKind::Index, format!("key {index:?} not found"))
            })
        }
        // Handles index through their current value, so virtualized tuple
        // targets can be unpacked element-wise.
        Value::Handle(h) => {
            let inner = {
                let h = h.borrow();
                h.val
                    .clone()
                    .ok_or_else(|| RunError::unbound_storage(&h.name))?
            };
            subscript_load(&inner, index)
        }
        other => Err(RunError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn subscript_store(obj: &Value, index: &Value, value: Value) -> RunResult<()> {
    match obj {
        Value::List(l) => {
            let mut list = l.borrow_mut();
            let len = list.len();
            match index {
                Value::Int(i) => match normalize_index(*i, len) {
                    Some(i) if i < len => {
                        list[i] = value;
                        Ok(())
                    }
                    _ => Err(RunError::new(
                        RunErrorKind::Index,
                        "list assignment index out of range",
                    )),
                },
                other => Err(RunError::type_error(format!(
                    "list indices must be integers, got {}",
                    other.type_name()
                ))),
            }
        }
        Value::Dict(d) => {
            let key = DictKey::from_value(index)?;
            d.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(RunError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn sequence_index(items: &[Value], index: &Value, type_name: &str) -> RunResult<Value> {
    match index {
        Value::Int(i) => normalize_index(*i, items.len())
            .and_then(|i| items.get(i).cloned())
            .ok_or_else(|| {
                RunError::new(RunErrorKind::Index, format!("{type_name} index out of range"))
            }),
        other => Err(RunError::type_error(format!(
            "{type_name} indices must be integers, got {}",
            other.type_name()
        ))),
    }
}

#[expect(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Some(index as usize)
    } else if index >= 0 {
        // Still in range for insertion-style callers; bounds are re-checked.
        Some(index as usize)
    } else {
        None
    }
}

fn unary_op(op: UnaryOpKind, operand: &Value) -> RunResult<Value> {
    match (op, operand) {
        (UnaryOpKind::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOpKind::USub, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOpKind::USub, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOpKind::UAdd, Value::Int(i)) => Ok(Value::Int(*i)),
        (UnaryOpKind::UAdd, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOpKind::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (op, v) => Err(RunError::type_error(format!(
            "bad operand type for unary {op:?}: '{}'",
            v.type_name()
        ))),
    }
}

#[expect(clippy::cast_precision_loss)]
fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

pub(crate) fn binary_op(op: BinOpKind, left: &Value, right: &Value) -> RunResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_binary_op(op, *a, *b),
        (a, b) => {
            if let (Some(a), Some(b)) = (as_float(a), as_float(b)) {
                return float_binary_op(op, a, b);
            }
            match (op, a, b) {
                (BinOpKind::Add, Value::Str(a), Value::Str(b)) => {
                    Ok(Value::str(format!("{a}{b}")))
                }
                (BinOpKind::Add, Value::List(a), Value::List(b)) => {
                    let mut items = a.borrow().clone();
                    items.extend(b.borrow().iter().cloned());
                    Ok(Value::list(items))
                }
                (BinOpKind::Add, Value::Tuple(a), Value::Tuple(b)) => {
                    let mut items = a.as_ref().clone();
                    items.extend(b.iter().cloned());
                    Ok(Value::tuple(items))
                }
                (BinOpKind::Mul, Value::Str(s), Value::Int(n))
                | (BinOpKind::Mul, Value::Int(n), Value::Str(s)) => {
                    Ok(Value::str(s.repeat((*n).max(0) as usize)))
                }
                (BinOpKind::Mul, Value::List(l), Value::Int(n))
                | (BinOpKind::Mul, Value::Int(n), Value::List(l)) => {
                    let items = l.borrow();
                    let mut out = Vec::new();
                    for _ in 0..(*n).max(0) {
                        out.extend(items.iter().cloned());
                    }
                    Ok(Value::list(out))
                }
                (op, a, b) => Err(RunError::type_error(format!(
                    "unsupported operand types for {}: '{}' and '{}'",
                    op.symbol(),
                    a.type_name(),
                    b.type_name()
                ))),
            }
        }
    }
}

fn int_binary_op(op: BinOpKind, a: i64, b: i64) -> RunResult<Value> {
    let div_by_zero = || RunError::new(RunErrorKind::Value, "division by zero");
    match op {
        BinOpKind::Add => Ok(Value::Int(a.wrapping_add(b))),
        BinOpKind::Sub => Ok(Value::Int(a.wrapping_sub(b))),
        BinOpKind::Mul => Ok(Value::Int(a.wrapping_mul(b))),
        #[expect(clippy::cast_precision_loss)]
        BinOpKind::Div => {
            if b == 0 {
                Err(div_by_zero())
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinOpKind::FloorDiv => {
            if b == 0 {
                return Err(div_by_zero());
            }
            // Floor division rounds toward negative infinity.
            let q = a / b;
            let r = a % b;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q }))
        }
        BinOpKind::Mod => {
            if b == 0 {
                return Err(div_by_zero());
            }
            // The result takes the divisor's sign.
            let r = a % b;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        BinOpKind::Pow => {
            if b >= 0 {
                u32::try_from(b)
                    .ok()
                    .and_then(|exp| a.checked_pow(exp))
                    .map(Value::Int)
                    .ok_or_else(|| RunError::new(RunErrorKind::Value, "integer power overflow"))
            } else {
                #[expect(clippy::cast_precision_loss)]
                Ok(Value::Float((a as f64).powi(i32::try_from(b).unwrap_or(i32::MIN))))
            }
        }
    }
}

fn float_binary_op(op: BinOpKind, a: f64, b: f64) -> RunResult<Value> {
    let div_by_zero = || RunError::new(RunErrorKind::Value, "division by zero");
    match op {
        BinOpKind::Add => Ok(Value::Float(a + b)),
        BinOpKind::Sub => Ok(Value::Float(a - b)),
        BinOpKind::Mul => Ok(Value::Float(a * b)),
        BinOpKind::Div => {
            if b == 0.0 {
                Err(div_by_zero())
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinOpKind::FloorDiv => {
            if b == 0.0 {
                Err(div_by_zero())
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        BinOpKind::Mod => {
            if b == 0.0 {
                Err(div_by_zero())
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        BinOpKind::Pow => Ok(Value::Float(a.powf(b))),
    }
}

fn compare_op(op: CmpOpKind, left: &Value, right: &Value) -> RunResult<bool> {
    match op {
        CmpOpKind::Eq => Ok(left == right),
        CmpOpKind::NotEq => Ok(left != right),
        CmpOpKind::Is => Ok(is_identical(left, right)),
        CmpOpKind::IsNot => Ok(!is_identical(left, right)),
        CmpOpKind::In => contains(right, left),
        CmpOpKind::NotIn => contains(right, left).map(|b| !b),
        CmpOpKind::Lt | CmpOpKind::LtE | CmpOpKind::Gt | CmpOpKind::GtE => {
            let ordering = order_values(left, right)?;
            Ok(match op {
                CmpOpKind::Lt => ordering.is_lt(),
                CmpOpKind::LtE => ordering.is_le(),
                CmpOpKind::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn is_identical(left: &Value, right: &Value) -> bool {
    match (left.identity(), right.identity()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => left == right,
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> RunResult<bool> {
    match haystack {
        Value::Str(s) => match needle {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            other => Err(RunError::type_error(format!(
                "'in <str>' requires a str, got {}",
                other.type_name()
            ))),
        },
        Value::Dict(d) => {
            let key = DictKey::from_value(needle)?;
            Ok(d.borrow().contains_key(&key))
        }
        other => Ok(iter_values(other)?.contains(needle)),
    }
}

fn order_values(left: &Value, right: &Value) -> RunResult<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_float(left), as_float(right)) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| RunError::new(RunErrorKind::Value, "nan is unordered"));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (a, b) => Err(RunError::type_error(format!(
            "'<' not supported between '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Syntactic binding classification of a function body, computed once when
/// the `def` executes.
struct Bindings {
    locals: AHashSet<String>,
    globals: AHashSet<String>,
    nonlocals: AHashSet<String>,
    /// Names used but not bound here, in first-use order. An over-
    /// approximation of the real closure: callers that care intersect it
    /// with what actually resolves below the module frame.
    free: Vec<String>,
}

impl Bindings {
    fn of(params: &Params, body: &[Stmt]) -> Self {
        let mut bindings = Self {
            locals: AHashSet::new(),
            globals: AHashSet::new(),
            nonlocals: AHashSet::new(),
            free: Vec::new(),
        };
        for name in params.bound_names() {
            bindings.locals.insert(name.to_string());
        }
        collect_declarations(body, &mut bindings);
        let declared: Vec<String> = bindings
            .globals
            .iter()
            .chain(&bindings.nonlocals)
            .cloned()
            .collect();
        for name in &declared {
            bindings.locals.remove(name);
        }
        let nonlocals: Vec<String> = bindings.nonlocals.iter().cloned().collect();
        for name in nonlocals {
            bindings.add_free(&name);
        }
        collect_uses(body, &mut bindings);
        bindings
    }

    fn add_free(&mut self, name: &str) {
        if !self.locals.contains(name)
            && !self.globals.contains(name)
            && !self.free.iter().any(|n| n == name)
        {
            self.free.push(name.to_string());
        }
    }
}

fn collect_declarations(body: &[Stmt], bindings: &mut Bindings) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } => {
                bindings.locals.insert(name.clone());
            }
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    collect_target_names(target, &mut bindings.locals);
                }
            }
            StmtKind::AugAssign { target, .. } => {
                collect_target_names(target, &mut bindings.locals);
            }
            StmtKind::For { target, body, orelse, .. } => {
                collect_target_names(target, &mut bindings.locals);
                collect_declarations(body, bindings);
                collect_declarations(orelse, bindings);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_declarations(body, bindings);
                collect_declarations(orelse, bindings);
            }
            StmtKind::Global(names) => {
                bindings.globals.extend(names.iter().cloned());
            }
            StmtKind::Nonlocal(names) => {
                bindings.nonlocals.extend(names.iter().cloned());
            }
            _ => {}
        }
    }
}

fn collect_target_names(target: &Expr, locals: &mut AHashSet<String>) {
    match &target.kind {
        ExprKind::Name { name, .. } => {
            locals.insert(name.clone());
        }
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
            for elt in elts {
                collect_target_names(elt, locals);
            }
        }
        ExprKind::Starred { value } => collect_target_names(value, locals),
        // Subscript/attribute stores mutate an object, not a binding.
        _ => {}
    }
}

fn collect_uses(body: &[Stmt], bindings: &mut Bindings) {
    for stmt in body {
        collect_stmt_uses(stmt, bindings);
    }
}

fn collect_stmt_uses(stmt: &Stmt, bindings: &mut Bindings) {
    match &stmt.kind {
        StmtKind::FunctionDef { params, body, .. } => {
            // Names a nested function captures from outside itself are free
            // here too, unless this scope binds them.
            let nested = Bindings::of(params, body);
            for name in &nested.free {
                bindings.add_free(name);
            }
            for param in params.args.iter().chain(&params.kwonlyargs) {
                if let Some(default) = &param.default {
                    collect_expr_uses(default, bindings);
                }
            }
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                collect_expr_uses(value, bindings);
            }
        }
        StmtKind::Assign { targets, value } => {
            collect_expr_uses(value, bindings);
            for target in targets {
                collect_expr_uses(target, bindings);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            collect_expr_uses(target, bindings);
            collect_expr_uses(value, bindings);
        }
        StmtKind::Expr(expr) => collect_expr_uses(expr, bindings),
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            collect_expr_uses(test, bindings);
            collect_uses(body, bindings);
            collect_uses(orelse, bindings);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            collect_expr_uses(iter, bindings);
            collect_expr_uses(target, bindings);
            collect_uses(body, bindings);
            collect_uses(orelse, bindings);
        }
        StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

fn collect_expr_uses(expr: &Expr, bindings: &mut Bindings) {
    match &expr.kind {
        ExprKind::Name { name, ctx } => {
            if *ctx == Ctx::Load {
                bindings.add_free(name);
            }
        }
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::None => {}
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
            for elt in elts {
                collect_expr_uses(elt, bindings);
            }
        }
        ExprKind::Dict { keys, values } => {
            for key in keys.iter().flatten() {
                collect_expr_uses(key, bindings);
            }
            for value in values {
                collect_expr_uses(value, bindings);
            }
        }
        ExprKind::Attribute { value, .. }
        | ExprKind::Starred { value }
        | ExprKind::UnaryOp { operand: value, .. } => collect_expr_uses(value, bindings),
        ExprKind::Subscript { value, index, .. } => {
            collect_expr_uses(value, bindings);
            collect_expr_uses(index, bindings);
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            collect_expr_uses(func, bindings);
            for arg in args {
                collect_expr_uses(arg, bindings);
            }
            for kw in keywords {
                collect_expr_uses(&kw.value, bindings);
            }
        }
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                collect_expr_uses(value, bindings);
            }
        }
        ExprKind::BinOp { left, right, .. } => {
            collect_expr_uses(left, bindings);
            collect_expr_uses(right, bindings);
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            collect_expr_uses(left, bindings);
            for comparator in comparators {
                collect_expr_uses(comparator, bindings);
            }
        }
        ExprKind::Lambda { params, body } => {
            let ret_kind = StmtKind::Return(Some((**body).clone()));
            let ret = Stmt {
                id: expr.id,
                range: expr.range,
                kind: ret_kind,
            };
            let nested = Bindings::of(params, std::slice::from_ref(&ret));
            for name in &nested.free {
                bindings.add_free(name);
            }
        }
    }
}

fn install_builtins(env: &Env) {
    env.define(
        "range",
        Builtin::new("range", |_, args, _| {
            let ints: Vec<i64> = args
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Ok(*i),
                    other => Err(RunError::type_error(format!(
                        "range() arguments must be ints, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<RunResult<_>>()?;
            let (start, stop, step) = match ints[..] {
                [stop] => (0, stop, 1),
                [start, stop] => (start, stop, 1),
                [start, stop, step] => (start, stop, step),
                _ => {
                    return Err(RunError::type_error("range() takes 1 to 3 arguments"));
                }
            };
            if step == 0 {
                return Err(RunError::new(RunErrorKind::Value, "range() step cannot be zero"));
            }
            let mut items = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i += step;
            }
            Ok(Value::list(items))
        }),
    );
    env.define(
        "len",
        Builtin::new("len", |_, args, _| {
            let [value] = <[Value; 1]>::try_from(args)
                .map_err(|v| RunError::type_error(format!("len() takes 1 argument, got {}", v.len())))?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::Tuple(t) => t.len(),
                Value::List(l) => l.borrow().len(),
                Value::Dict(d) => d.borrow().len(),
                other => {
                    return Err(RunError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }),
    );
    env.define(
        "tuple",
        Builtin::new("tuple", |_, args, _| match &args[..] {
            [] => Ok(Value::tuple(Vec::new())),
            [value] => Ok(Value::tuple(iter_values(value)?)),
            _ => Err(RunError::type_error("tuple() takes at most 1 argument")),
        }),
    );
    env.define(
        "list",
        Builtin::new("list", |_, args, _| match &args[..] {
            [] => Ok(Value::list(Vec::new())),
            [value] => Ok(Value::list(iter_values(value)?)),
            _ => Err(RunError::type_error("list() takes at most 1 argument")),
        }),
    );
    env.define(
        "abs",
        Builtin::new("abs", |_, args, _| match &args[..] {
            [Value::Int(i)] => Ok(Value::Int(i.abs())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            _ => Err(RunError::type_error("abs() takes one numeric argument")),
        }),
    );
}

/// Expand a byte range to whole lines of `source`, like pulling a definition
/// out of its file.
fn line_slice(source: &str, range: TextRange) -> String {
    let start = usize::from(range.start()).min(source.len());
    let end = usize::from(range.end()).min(source.len());
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[end..]
        .find('\n')
        .map_or(source.len(), |i| end + i + 1);
    source[line_start..line_end].to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run_and_call(source: &str, entry: &str, args: Vec<Value>) -> RunResult<Value> {
        let mut interp = Interp::new();
        let module = interp.run_module(source).expect("module runs");
        let func = module.get(entry).expect("entry point defined");
        interp.call_value(func, args, Kwargs::new())
    }

    #[test]
    fn arithmetic_and_control_flow() {
        let source = "
def collatz_steps(n):
    steps = 0
    while n != 1:
        if n % 2 == 0:
            n = n // 2
        else:
            n = 3 * n + 1
        steps = steps + 1
    return steps
";
        assert_eq!(
            run_and_call(source, "collatz_steps", vec![Value::Int(6)]).unwrap(),
            Value::Int(8)
        );
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(
            binary_op(BinOpKind::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(-4)
        );
        assert_eq!(
            binary_op(BinOpKind::Mod, &Value::Int(-7), &Value::Int(2)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn closures_capture_cells_not_values() {
        let source = "
def make_counter():
    count = 0
    def bump():
        nonlocal count
        count = count + 1
        return count
    return bump
";
        let mut interp = Interp::new();
        let module = interp.run_module(source).unwrap();
        let make = module.get("make_counter").unwrap();
        let bump = interp.call_value(make, vec![], Kwargs::new()).unwrap();
        assert_eq!(
            interp.call_value(bump.clone(), vec![], Kwargs::new()).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            interp.call_value(bump, vec![], Kwargs::new()).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn global_statement_writes_the_module_frame() {
        let source = "
total = 0

def add(n):
    global total
    total = total + n
    return total
";
        let mut interp = Interp::new();
        let module = interp.run_module(source).unwrap();
        let add = module.get("add").unwrap();
        interp
            .call_value(add.clone(), vec![Value::Int(4)], Kwargs::new())
            .unwrap();
        interp.call_value(add, vec![Value::Int(3)], Kwargs::new()).unwrap();
        assert_eq!(module.get("total"), Some(Value::Int(7)));
    }

    #[test]
    fn local_read_before_assignment_is_unbound() {
        let source = "
x = 10

def shadow():
    y = x
    x = 1
    return y
";
        let err = run_and_call(source, "shadow", vec![]).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::UnboundStorage);
        assert!(err.message.contains("'x'"));
    }

    #[test]
    fn for_loops_support_break_and_orelse() {
        let source = "
def find(items, needle):
    for i in range(len(items)):
        if items[i] == needle:
            result = i
            break
    else:
        result = -1
    return result
";
        let items = Value::list(vec![Value::str("a"), Value::str("b"), Value::str("c")]);
        assert_eq!(
            run_and_call(source, "find", vec![items.clone(), Value::str("b")]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            run_and_call(source, "find", vec![items, Value::str("z")]).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn keyword_arguments_defaults_and_splats() {
        let source = "
def describe(name, *tags, sep='-', **extra):
    parts = [name]
    for t in tags:
        parts.append(t)
    for k in extra.keys():
        parts.append(k)
    out = ''
    for p in parts:
        if out == '':
            out = p
        else:
            out = out + sep + p
    return out

def call_it():
    return describe('box', 'red', 'big', color='blue')
";
        assert_eq!(
            run_and_call(source, "call_it", vec![]).unwrap(),
            Value::str("box-red-big-color")
        );
    }

    #[test]
    fn tuple_unpacking_in_assignments_and_loops() {
        let source = "
def swap_sum(pairs):
    total = 0
    for a, b in pairs:
        a, b = b, a
        total = total + a * 10 + b
    return total
";
        let pairs = Value::list(vec![
            Value::tuple(vec![Value::Int(1), Value::Int(2)]),
            Value::tuple(vec![Value::Int(3), Value::Int(4)]),
        ]);
        assert_eq!(
            run_and_call(source, "swap_sum", vec![pairs]).unwrap(),
            Value::Int(64)
        );
    }

    #[test]
    fn boolop_returns_operands_not_bools() {
        let source = "
def pick(a, b):
    return a or b
";
        assert_eq!(
            run_and_call(source, "pick", vec![Value::Int(0), Value::str("fallback")]).unwrap(),
            Value::str("fallback")
        );
        assert_eq!(
            run_and_call(source, "pick", vec![Value::Int(5), Value::str("fallback")]).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let source = "
def loop():
    return loop()
";
        let err = run_and_call(source, "loop", vec![]).unwrap_err();
        assert_eq!(err.kind, RunErrorKind::Recursion);
    }

    #[test]
    fn function_defs_capture_their_source_snippet() {
        let source = "
def outer():
    return 1
";
        let mut interp = Interp::new();
        let module = interp.run_module(source).unwrap();
        let Some(Value::Function(f)) = module.get("outer") else {
            panic!("expected a function");
        };
        let snippet = f.snippet.as_deref().expect("snippet recorded");
        assert!(snippet.starts_with("def outer():"));
        assert!(snippet.contains("return 1"));
    }

    #[test]
    fn execute_isolated_restores_handle_state() {
        let mut interp = Interp::new();
        let handle = Value::new_handle("x");
        if let Value::Handle(h) = &handle {
            h.borrow_mut().val = Some(Value::Int(1));
        }
        let setter = {
            let handle = handle.clone();
            Builtin::new("setter", move |_, _, _| {
                if let Value::Handle(h) = &handle {
                    h.borrow_mut().val = Some(Value::Int(42));
                }
                Ok(Value::str("done"))
            })
        };
        let (vals, ret) = interp.execute_isolated(setter, &[handle.clone()]).unwrap();
        assert_eq!(vals, vec![Value::Int(42)]);
        assert_eq!(ret, Value::str("done"));
        if let Value::Handle(h) = &handle {
            assert_eq!(h.borrow().val, Some(Value::Int(1)));
        }
    }
}
