//! Control-flow virtualization.
//!
//! Each `if`, `while`, and `for` whose hook the overload implements is
//! rewritten into block thunks plus a single hook call carrying them. The
//! construct's write set (from the activity analysis) rides along as a tuple
//! of the written names, so hooks can snapshot or merge the affected storage.
//!
//! Constructs are gated independently: an overload with only `while_stmt`
//! leaves `if` and `for` untouched.

use ahash::AHashSet;

use ruff_text_size::TextRange;

use crate::activity;
use crate::ast::{Ctx, Expr, ExprKind, Stmt, StmtKind};
use crate::entity::EntityContext;
use crate::errors::{ConvertError, ConvertResult};
use crate::overload::Overload;
use crate::templates::{replace, TemplateValue};
use crate::transformer::{dispatch_block, dispatch_expr, walk_stmt, StmtVec, Transform};

pub fn transform(
    stmts: Vec<Stmt>,
    ctx: &mut EntityContext,
    overload: &Overload,
    overload_symbol: &str,
) -> ConvertResult<Vec<Stmt>> {
    if overload.if_stmt.is_none() && overload.while_stmt.is_none() && overload.for_stmt.is_none() {
        return Ok(stmts);
    }
    activity::resolve(&stmts, overload_symbol, &ctx.namer, &mut ctx.anno);
    let mut t = ControlFlowTransformer {
        ctx,
        overload: overload.clone(),
        overload_symbol,
    };
    dispatch_block(&mut t, stmts)
}

struct ControlFlowTransformer<'a> {
    ctx: &'a mut EntityContext,
    overload: Overload,
    overload_symbol: &'a str,
}

impl ControlFlowTransformer<'_> {
    /// Written names of the construct, rendered as load expressions.
    fn writes_exprs(&mut self, stmt_id: crate::ast::NodeId) -> Vec<Expr> {
        let writes = self.ctx.anno.take_writes(stmt_id);
        writes
            .iter()
            .map(|qn| qn.to_expr(&mut self.ctx.ids))
            .collect()
    }

    /// `if`/`while` share a template; only the hook attribute differs.
    fn conditional(
        &mut self,
        hook: &str,
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        writes: Vec<Expr>,
    ) -> ConvertResult<StmtVec> {
        reject_escapes(&body, false)?;
        reject_escapes(&orelse, false)?;
        let test_fn = self.ctx.namer.new_symbol("test_fn", &AHashSet::new());
        let body_fn = self.ctx.namer.new_symbol("body_fn", &AHashSet::new());
        let orelse_fn = self.ctx.namer.new_symbol("orelse_fn", &AHashSet::new());
        let stmts = replace(
            &mut self.ctx.ids,
            "
            def test_fn():
                return test_value
            def body_fn():
                body_block
            def orelse_fn():
                orelse_block
            ov.hook_name(test_fn, body_fn, orelse_fn, (writes,))
            ",
            &[
                ("test_fn", TemplateValue::Name(test_fn)),
                ("body_fn", TemplateValue::Name(body_fn)),
                ("orelse_fn", TemplateValue::Name(orelse_fn)),
                ("test_value", TemplateValue::Expr(test)),
                ("body_block", TemplateValue::Stmts(body)),
                ("orelse_block", TemplateValue::Stmts(orelse)),
                ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                ("hook_name", TemplateValue::Name(hook.to_owned())),
                ("writes", TemplateValue::ExprList(writes)),
            ],
        )?;
        Ok(StmtVec::from_vec(stmts))
    }

    fn for_loop(
        &mut self,
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        writes: Vec<Expr>,
    ) -> ConvertResult<StmtVec> {
        reject_escapes(&body, false)?;
        reject_escapes(&orelse, false)?;
        // The loop target becomes overload storage before the hook runs.
        let mut inits = Vec::new();
        collect_target_inits(&target, &mut inits);
        let mut init_stmts = Vec::with_capacity(inits.len());
        for name in &inits {
            let mut stmts = replace(
                &mut self.ctx.ids,
                "lhs = ov.init(lhs_name)\n",
                &[
                    ("lhs", TemplateValue::Name(name.clone())),
                    ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                    ("lhs_name", TemplateValue::StrLit(name.clone())),
                ],
            )?;
            init_stmts.append(&mut stmts);
        }
        let body_fn = self.ctx.namer.new_symbol("body_fn", &AHashSet::new());
        let orelse_fn = self.ctx.namer.new_symbol("orelse_fn", &AHashSet::new());
        let target = load_context(target);
        let stmts = replace(
            &mut self.ctx.ids,
            "
            target_inits
            def body_fn():
                body_block
            def orelse_fn():
                orelse_block
            ov.for_stmt(target_value, iter_value, body_fn, orelse_fn, (writes,))
            ",
            &[
                ("target_inits", TemplateValue::Stmts(init_stmts)),
                ("body_fn", TemplateValue::Name(body_fn)),
                ("orelse_fn", TemplateValue::Name(orelse_fn)),
                ("target_value", TemplateValue::Expr(target)),
                ("iter_value", TemplateValue::Expr(iter)),
                ("body_block", TemplateValue::Stmts(body)),
                ("orelse_block", TemplateValue::Stmts(orelse)),
                ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                ("writes", TemplateValue::ExprList(writes)),
            ],
        )?;
        Ok(StmtVec::from_vec(stmts))
    }
}

impl Transform for ControlFlowTransformer<'_> {
    fn pass_name(&self) -> &'static str {
        "control_flow"
    }

    fn context(&mut self) -> &mut EntityContext {
        self.ctx
    }

    fn visit_stmt(&mut self, stmt: Stmt) -> ConvertResult<StmtVec> {
        match &stmt.kind {
            StmtKind::If { .. } if self.overload.if_stmt.is_some() => {
                let writes = self.writes_exprs(stmt.id);
                let StmtKind::If { test, body, orelse } = stmt.kind else {
                    unreachable!();
                };
                let test = dispatch_expr(self, test)?;
                let body = dispatch_block(self, body)?;
                let orelse = dispatch_block(self, orelse)?;
                self.conditional("if_stmt", test, body, orelse, writes)
            }
            StmtKind::While { .. } if self.overload.while_stmt.is_some() => {
                let writes = self.writes_exprs(stmt.id);
                let StmtKind::While { test, body, orelse } = stmt.kind else {
                    unreachable!();
                };
                let test = dispatch_expr(self, test)?;
                let body = dispatch_block(self, body)?;
                let orelse = dispatch_block(self, orelse)?;
                self.conditional("while_stmt", test, body, orelse, writes)
            }
            StmtKind::For { .. } if self.overload.for_stmt.is_some() => {
                let writes = self.writes_exprs(stmt.id);
                let StmtKind::For {
                    target,
                    iter,
                    body,
                    orelse,
                } = stmt.kind
                else {
                    unreachable!();
                };
                let iter = dispatch_expr(self, iter)?;
                let body = dispatch_block(self, body)?;
                let orelse = dispatch_block(self, orelse)?;
                self.for_loop(target, iter, body, orelse, writes)
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Rewritten blocks run inside generated functions, so statements that leave
/// the construct cannot cross the thunk boundary: `return` never can, and
/// `break`/`continue` only work when a host loop inside the same block
/// catches them. Nested `def`s are their own frames and are skipped.
fn reject_escapes(stmts: &[Stmt], in_host_loop: bool) -> ConvertResult<()> {
    let unsupported = |what: &str, range: TextRange| ConvertError::UnsupportedConstruct {
        construct: format!("{what} inside virtualized control flow"),
        range,
    };
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Return(_) => return Err(unsupported("return", stmt.range)),
            StmtKind::Break if !in_host_loop => return Err(unsupported("break", stmt.range)),
            StmtKind::Continue if !in_host_loop => {
                return Err(unsupported("continue", stmt.range));
            }
            StmtKind::If { body, orelse, .. } => {
                reject_escapes(body, in_host_loop)?;
                reject_escapes(orelse, in_host_loop)?;
            }
            StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
                reject_escapes(body, true)?;
                reject_escapes(orelse, in_host_loop)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn collect_target_inits(target: &Expr, names: &mut Vec<String>) {
    match &target.kind {
        ExprKind::Name { name, .. } => names.push(name.clone()),
        ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
            for elt in elts {
                collect_target_inits(elt, names);
            }
        }
        _ => {}
    }
}

/// Store-context names inside a rewritten target become loads: they now
/// reference the storage handles created just above.
fn load_context(mut target: Expr) -> Expr {
    target.kind = match target.kind {
        ExprKind::Name { name, .. } => ExprKind::Name {
            name,
            ctx: Ctx::Load,
        },
        ExprKind::Tuple { elts, .. } => ExprKind::Tuple {
            elts: elts.into_iter().map(load_context).collect(),
            ctx: Ctx::Load,
        },
        ExprKind::List { elts, .. } => ExprKind::List {
            elts: elts.into_iter().map(load_context).collect(),
            ctx: Ctx::Load,
        },
        other => other,
    };
    target
}
