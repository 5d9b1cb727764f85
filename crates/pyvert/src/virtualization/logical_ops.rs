//! Boolean operator virtualization.
//!
//! `a and b and c` becomes `ov.and_(a, (lambda: b, lambda: c))`: the first
//! operand is evaluated eagerly, the rest arrive as thunks so the hook
//! decides how much short-circuiting to preserve. `not x` becomes
//! `ov.not_(x)`. Each operator is gated on its own hook.

use crate::ast::{Ctx, Expr, ExprKind, BoolOpKind, Stmt, UnaryOpKind};
use crate::entity::EntityContext;
use crate::errors::ConvertResult;
use crate::overload::Overload;
use crate::templates::{replace_as_expression, TemplateValue};
use crate::transformer::{dispatch_block, walk_expr, Transform};

pub fn transform(
    stmts: Vec<Stmt>,
    ctx: &mut EntityContext,
    overload: &Overload,
    overload_symbol: &str,
) -> ConvertResult<Vec<Stmt>> {
    if overload.and_.is_none() && overload.or_.is_none() && overload.not_.is_none() {
        return Ok(stmts);
    }
    let mut t = LogicalOpTransformer {
        ctx,
        overload: overload.clone(),
        overload_symbol,
    };
    dispatch_block(&mut t, stmts)
}

struct LogicalOpTransformer<'a> {
    ctx: &'a mut EntityContext,
    overload: Overload,
    overload_symbol: &'a str,
}

impl LogicalOpTransformer<'_> {
    fn thunk(&mut self, body: Expr) -> Expr {
        Expr::synth(
            &mut self.ctx.ids,
            ExprKind::Lambda {
                params: Box::new(crate::ast::Params::default()),
                body: Box::new(body),
            },
        )
    }
}

impl Transform for LogicalOpTransformer<'_> {
    fn pass_name(&self) -> &'static str {
        "logical_ops"
    }

    fn context(&mut self) -> &mut EntityContext {
        self.ctx
    }

    fn visit_expr(&mut self, expr: Expr) -> ConvertResult<Expr> {
        match &expr.kind {
            ExprKind::BoolOp { op, .. } => {
                let hook = match op {
                    BoolOpKind::And if self.overload.and_.is_some() => "and_",
                    BoolOpKind::Or if self.overload.or_.is_some() => "or_",
                    _ => return walk_expr(self, expr),
                };
                let ExprKind::BoolOp { values, .. } = expr.kind else {
                    unreachable!();
                };
                let mut values = values.into_iter();
                let first = crate::transformer::dispatch_expr(
                    self,
                    values.next().unwrap_or_else(|| unreachable!()),
                )?;
                let rest = values
                    .map(|v| {
                        let visited = crate::transformer::dispatch_expr(self, v)?;
                        Ok(self.thunk(visited))
                    })
                    .collect::<ConvertResult<Vec<_>>>()?;
                let rest = Expr::tuple(&mut self.ctx.ids, rest, Ctx::Load);
                replace_as_expression(
                    &mut self.ctx.ids,
                    "ov.hook_name(first, rest)\n",
                    &[
                        ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                        ("hook_name", TemplateValue::Name(hook.to_owned())),
                        ("first", TemplateValue::Expr(first)),
                        ("rest", TemplateValue::Expr(rest)),
                    ],
                )
            }
            ExprKind::UnaryOp {
                op: UnaryOpKind::Not,
                ..
            } if self.overload.not_.is_some() => {
                let ExprKind::UnaryOp { operand, .. } = expr.kind else {
                    unreachable!();
                };
                let operand = crate::transformer::dispatch_expr(self, *operand)?;
                replace_as_expression(
                    &mut self.ctx.ids,
                    "ov.not_(operand)\n",
                    &[
                        ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                        ("operand", TemplateValue::Expr(operand)),
                    ],
                )
            }
            _ => walk_expr(self, expr),
        }
    }
}
