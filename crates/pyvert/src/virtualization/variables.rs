//! Variable virtualization.
//!
//! Rewrites every function scope so its local storage lives behind the
//! overload instead of in host bindings. On entry each local is initialized
//! with `init`, incoming parameter values are forwarded with `assign`, writes
//! become `assign` calls, and (when the overload reads) every load becomes a
//! `read` call. Parameters are renamed to fresh host names so the original
//! names are free to hold the storage handles.
//!
//! `for` targets are rebound through a fresh host loop variable: the loop
//! itself stays host-level and each iteration forwards the value into the
//! virtualized target.

use ahash::AHashSet;
use smallvec::smallvec;

use crate::ast::{Ctx, Expr, ExprKind, Stmt, StmtKind};
use crate::entity::EntityContext;
use crate::errors::{ConvertError, ConvertResult};
use crate::overload::Overload;
use crate::templates::{replace, replace_as_expression, TemplateValue};
use crate::transformer::{
    dispatch_block, walk_expr, walk_stmt, StmtVec, Transform,
};
use crate::virtualization::scoping::{ScopeId, Scopes};

/// Runs the pass over a block. Does nothing unless the overload implements
/// the full storage protocol (`init`, `assign`, `read`).
pub fn transform(
    stmts: Vec<Stmt>,
    ctx: &mut EntityContext,
    overload: &Overload,
    overload_symbol: &str,
) -> ConvertResult<Vec<Stmt>> {
    if !overload.handles_variables() || overload.read.is_none() {
        return Ok(stmts);
    }
    let scopes = Scopes::analyze(&stmts);
    let mut t = VariableTransformer {
        ctx,
        overload_symbol,
        scopes,
        scope_stack: Vec::new(),
    };
    dispatch_block(&mut t, stmts)
}

struct VariableTransformer<'a> {
    ctx: &'a mut EntityContext,
    overload_symbol: &'a str,
    scopes: Scopes,
    /// Function scopes currently open; empty at the block's top level.
    scope_stack: Vec<ScopeId>,
}

impl VariableTransformer<'_> {
    fn current_scope(&self) -> Option<ScopeId> {
        self.scope_stack.last().copied()
    }

    fn virtualizes(&self, name: &str) -> bool {
        self.current_scope()
            .is_some_and(|scope| self.scopes.should_virtualize(scope, name))
    }

    fn reserved(&self, scope: ScopeId) -> AHashSet<String> {
        let s = self.scopes.get(scope);
        s.locals.iter().chain(&s.free).cloned().collect()
    }

    /// `name = ov.init("name")`
    fn init_stmt(&mut self, name: &str) -> ConvertResult<Stmt> {
        let mut stmts = replace(
            &mut self.ctx.ids,
            "lhs = ov.init(lhs_name)\n",
            &[
                ("lhs", TemplateValue::Name(name.to_owned())),
                ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                ("lhs_name", TemplateValue::StrLit(name.to_owned())),
            ],
        )?;
        Ok(stmts.remove(0))
    }

    /// `ov.assign(lhs, rhs)`
    fn assign_stmt(&mut self, lhs: Expr, rhs: Expr) -> ConvertResult<Stmt> {
        let mut stmts = replace(
            &mut self.ctx.ids,
            "ov.assign(lhs, rhs)\n",
            &[
                ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                ("lhs", TemplateValue::Expr(lhs)),
                ("rhs", TemplateValue::Expr(rhs)),
            ],
        )?;
        Ok(stmts.remove(0))
    }

    fn name_load(&mut self, name: &str) -> Expr {
        Expr::name(&mut self.ctx.ids, name, Ctx::Load)
    }

    /// Either a virtualized or a plain host assignment to a name.
    fn bind_name(&mut self, name: &str, value: Expr) -> ConvertResult<Stmt> {
        if self.virtualizes(name) {
            let lhs = self.name_load(name);
            self.assign_stmt(lhs, value)
        } else {
            let target = Expr::name(&mut self.ctx.ids, name, Ctx::Store);
            Ok(Stmt::assign(&mut self.ctx.ids, target, value))
        }
    }

    fn function_def(
        &mut self,
        stmt: Stmt,
    ) -> ConvertResult<StmtVec> {
        let Stmt { id, range, kind } = stmt;
        let StmtKind::FunctionDef {
            name,
            mut params,
            body,
        } = kind
        else {
            unreachable!("caller matched FunctionDef");
        };
        let Some(scope) = self.scopes.of_function(id) else {
            // A def synthesized after analysis; leave it alone.
            return walk_stmt(
                self,
                Stmt {
                    id,
                    range,
                    kind: StmtKind::FunctionDef { name, params, body },
                },
            );
        };

        // The def's own name binds in the enclosing scope; when that binding
        // is virtualized the def gets a fresh host name and the original
        // becomes an `assign` after it.
        let renamed_def = if self.virtualizes(&name) {
            let reserved = self.reserved(scope);
            Some(self.ctx.namer.new_symbol(&name, &reserved))
        } else {
            None
        };

        // Rename every parameter so the original names can hold handles.
        let reserved = self.reserved(scope);
        let mut forwarded: Vec<(String, String)> = Vec::new();
        {
            let namer = &mut self.ctx.namer;
            let mut rename = |slot: &mut String| {
                let fresh = namer.new_symbol(&format!("n_{slot}"), &reserved);
                forwarded.push((slot.clone(), fresh.clone()));
                *slot = fresh;
            };
            for param in &mut params.args {
                rename(&mut param.name);
            }
            if let Some(vararg) = &mut params.vararg {
                rename(vararg);
            }
            for param in &mut params.kwonlyargs {
                rename(&mut param.name);
            }
            if let Some(kwarg) = &mut params.kwarg {
                rename(kwarg);
            }
        }

        self.scope_stack.push(scope);
        let visited = dispatch_block(self, body);
        self.scope_stack.pop();
        let visited = visited?;

        let locals: Vec<String> = self.scopes.get(scope).locals.iter().cloned().collect();
        let mut new_body = Vec::with_capacity(locals.len() + forwarded.len() + visited.len());
        for local in &locals {
            new_body.push(self.init_stmt(local)?);
        }
        for (original, fresh) in &forwarded {
            let lhs = self.name_load(original);
            let rhs = self.name_load(fresh);
            new_body.push(self.assign_stmt(lhs, rhs)?);
        }
        new_body.extend(visited);

        let def_name = renamed_def.clone().unwrap_or_else(|| name.clone());
        let def = Stmt {
            id,
            range,
            kind: StmtKind::FunctionDef {
                name: def_name.clone(),
                params,
                body: new_body,
            },
        };
        match renamed_def {
            Some(_) => {
                let lhs = self.name_load(&name);
                let rhs = self.name_load(&def_name);
                let rebind = self.assign_stmt(lhs, rhs)?;
                Ok(smallvec![def, rebind])
            }
            None => Ok(smallvec![def]),
        }
    }

    fn assign(&mut self, stmt: Stmt) -> ConvertResult<StmtVec> {
        let Stmt { id, range, kind } = stmt;
        let StmtKind::Assign { mut targets, value } = kind else {
            unreachable!("caller matched Assign");
        };
        if targets.len() != 1 {
            return Err(ConvertError::UnsupportedConstruct {
                construct: "assignment with multiple targets".to_owned(),
                range,
            });
        }
        let target = targets.remove(0);
        let value = crate::transformer::dispatch_expr(self, value)?;
        match target.kind {
            ExprKind::Name { ref name, .. } => {
                if self.virtualizes(name) {
                    let lhs = self.name_load(name);
                    Ok(smallvec![self.assign_stmt(lhs, value)?])
                } else {
                    Ok(smallvec![Stmt {
                        id,
                        range,
                        kind: StmtKind::Assign {
                            targets: vec![target],
                            value,
                        },
                    }])
                }
            }
            ExprKind::Tuple { ref elts, .. } | ExprKind::List { ref elts, .. } => {
                let names = target_names(elts).ok_or_else(|| ConvertError::UnsupportedTarget {
                    found: target.kind_name().to_owned(),
                    range: target.range,
                })?;
                self.unpack_assign(&names, value)
            }
            _ => Err(ConvertError::UnsupportedTarget {
                found: target.kind_name().to_owned(),
                range: target.range,
            }),
        }
    }

    /// Expands `a, b = value` into per-name bindings. A literal right-hand
    /// side of matching length binds positionally, unless one of its
    /// elements reads a target name (the swap case); otherwise the value is
    /// evaluated once into a fresh host temporary and indexed.
    fn unpack_assign(&mut self, names: &[String], value: Expr) -> ConvertResult<StmtVec> {
        if let ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } = &value.kind {
            if elts.len() == names.len()
                && !elts.iter().any(|e| reads_any_name(e, names))
            {
                let elts = elts.clone();
                let mut out = StmtVec::new();
                for (name, elt) in names.iter().zip(elts) {
                    out.push(self.bind_name(name, elt)?);
                }
                return Ok(out);
            }
        }
        let reserved = names.iter().cloned().collect();
        let tmp = self.ctx.namer.new_symbol("unpacked", &reserved);
        let tmp_target = Expr::name(&mut self.ctx.ids, tmp.clone(), Ctx::Store);
        let mut out: StmtVec = smallvec![Stmt::assign(&mut self.ctx.ids, tmp_target, value)];
        for (i, name) in names.iter().enumerate() {
            let indexed = {
                let base = self.name_load(&tmp);
                let index = Expr::synth(&mut self.ctx.ids, ExprKind::Int(i64::try_from(i).unwrap_or(i64::MAX)));
                Expr::subscript(&mut self.ctx.ids, base, index, Ctx::Load)
            };
            out.push(self.bind_name(name, indexed)?);
        }
        Ok(out)
    }

    fn for_stmt(&mut self, stmt: Stmt) -> ConvertResult<StmtVec> {
        let Stmt { id, range, kind } = stmt;
        let StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } = kind
        else {
            unreachable!("caller matched For");
        };
        let iter = crate::transformer::dispatch_expr(self, iter)?;
        let body = dispatch_block(self, body)?;
        let orelse = dispatch_block(self, orelse)?;

        // The loop binds a fresh host variable; the original target is
        // rebound from it at the top of every iteration.
        let (prelude, loop_var) = match &target.kind {
            ExprKind::Name { name, .. } => {
                let reserved = [name.clone()].into_iter().collect();
                let fresh = self.ctx.namer.new_symbol(&format!("n_{name}"), &reserved);
                let value = self.name_load(&fresh);
                (vec![self.bind_name(name, value)?], fresh)
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                let names = target_names(elts).ok_or_else(|| ConvertError::UnsupportedTarget {
                    found: target.kind_name().to_owned(),
                    range: target.range,
                })?;
                let reserved = names.iter().cloned().collect();
                let fresh = self.ctx.namer.new_symbol("loop_target", &reserved);
                let mut prelude = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    let indexed = {
                        let base = self.name_load(&fresh);
                        let index = Expr::synth(
                            &mut self.ctx.ids,
                            ExprKind::Int(i64::try_from(i).unwrap_or(i64::MAX)),
                        );
                        Expr::subscript(&mut self.ctx.ids, base, index, Ctx::Load)
                    };
                    prelude.push(self.bind_name(name, indexed)?);
                }
                (prelude, fresh)
            }
            _ => {
                return Err(ConvertError::UnsupportedTarget {
                    found: target.kind_name().to_owned(),
                    range: target.range,
                });
            }
        };

        let mut new_body = prelude;
        new_body.extend(body);
        Ok(smallvec![Stmt {
            id,
            range,
            kind: StmtKind::For {
                target: Expr::name(&mut self.ctx.ids, loop_var, Ctx::Store),
                iter,
                body: new_body,
                orelse,
            },
        }])
    }
}

impl Transform for VariableTransformer<'_> {
    fn pass_name(&self) -> &'static str {
        "variables"
    }

    fn context(&mut self) -> &mut EntityContext {
        self.ctx
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> ConvertResult<StmtVec> {
        match &stmt.kind {
            StmtKind::FunctionDef { .. } => self.function_def(stmt),
            _ if self.scope_stack.is_empty() => walk_stmt(self, stmt),
            StmtKind::Assign { .. } => self.assign(stmt),
            StmtKind::AugAssign { .. } => Err(ConvertError::UnsupportedConstruct {
                construct: "augmented assignment".to_owned(),
                range: stmt.range,
            }),
            StmtKind::For { .. } => self.for_stmt(stmt),
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: Expr) -> ConvertResult<Expr> {
        if let ExprKind::Name { name, ctx: Ctx::Load } = &expr.kind {
            if self.virtualizes(name) {
                let inner = Expr::name(&mut self.ctx.ids, name.clone(), Ctx::Load);
                return replace_as_expression(
                    &mut self.ctx.ids,
                    "ov.read(var)\n",
                    &[
                        ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                        ("var", TemplateValue::Expr(inner)),
                    ],
                );
            }
        }
        walk_expr(self, expr)
    }
}

/// Plain names of a tuple/list target, or `None` if any element is not one.
fn target_names(elts: &[Expr]) -> Option<Vec<String>> {
    elts.iter()
        .map(|e| e.as_name().map(ToOwned::to_owned))
        .collect()
}

fn reads_any_name(expr: &Expr, names: &[String]) -> bool {
    match &expr.kind {
        ExprKind::Name { name, ctx: Ctx::Load } => names.iter().any(|n| n == name),
        ExprKind::Name { .. }
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::None => false,
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
            elts.iter().any(|e| reads_any_name(e, names))
        }
        ExprKind::Dict { keys, values } => {
            keys.iter()
                .flatten()
                .chain(values)
                .any(|e| reads_any_name(e, names))
        }
        ExprKind::Attribute { value, .. } | ExprKind::Starred { value } => {
            reads_any_name(value, names)
        }
        ExprKind::Subscript { value, index, .. } => {
            reads_any_name(value, names) || reads_any_name(index, names)
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            reads_any_name(func, names)
                || args.iter().any(|a| reads_any_name(a, names))
                || keywords.iter().any(|k| reads_any_name(&k.value, names))
        }
        ExprKind::BoolOp { values, .. } => values.iter().any(|v| reads_any_name(v, names)),
        ExprKind::UnaryOp { operand, .. } => reads_any_name(operand, names),
        ExprKind::BinOp { left, right, .. } => {
            reads_any_name(left, names) || reads_any_name(right, names)
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            reads_any_name(left, names) || comparators.iter().any(|c| reads_any_name(c, names))
        }
        ExprKind::Lambda { body, .. } => reads_any_name(body, names),
    }
}
