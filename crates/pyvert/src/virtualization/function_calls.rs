//! Call virtualization.
//!
//! Every call becomes `ov.call(callee, (args,), {kwargs})`: positional
//! arguments packed into a tuple (star splats stay splats inside it) and
//! keywords packed into a string-keyed dict (double-star splats become merge
//! entries). Calls on the overload symbol itself are the plumbing emitted by
//! earlier passes and are left alone, though their arguments are still
//! visited so calls nested inside them get wrapped.

use crate::ast::{Ctx, Expr, ExprKind, Stmt};
use crate::ast_util::keywords_to_dict;
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
    if overload.call.is_none() {
        return Ok(stmts);
    }
    let mut t = CallTransformer {
        ctx,
        overload_symbol,
    };
    dispatch_block(&mut t, stmts)
}

struct CallTransformer<'a> {
    ctx: &'a mut EntityContext,
    overload_symbol: &'a str,
}

impl Transform for CallTransformer<'_> {
    fn pass_name(&self) -> &'static str {
        "function_calls"
    }

    fn context(&mut self) -> &mut EntityContext {
        self.ctx
    }

    fn visit_expr(&mut self, expr: Expr) -> ConvertResult<Expr> {
        let is_hook_call = matches!(
            &expr.kind,
            ExprKind::Call { func, .. }
                if matches!(
                    &func.kind,
                    ExprKind::Attribute { value, .. }
                        if value.as_name() == Some(self.overload_symbol)
                )
        );
        let visited = walk_expr(self, expr)?;
        if is_hook_call || !matches!(visited.kind, ExprKind::Call { .. }) {
            return Ok(visited);
        }
        let ExprKind::Call {
            func,
            args,
            keywords,
        } = visited.kind
        else {
            unreachable!();
        };
        let packed_args = Expr::tuple(&mut self.ctx.ids, args, Ctx::Load);
        let packed_kwargs = keywords_to_dict(&mut self.ctx.ids, &keywords);
        replace_as_expression(
            &mut self.ctx.ids,
            "ov.call(callee, packed_args, packed_kwargs)\n",
            &[
                ("ov", TemplateValue::Name(self.overload_symbol.to_owned())),
                ("callee", TemplateValue::Expr(*func)),
                ("packed_args", TemplateValue::Expr(packed_args)),
                ("packed_kwargs", TemplateValue::Expr(packed_kwargs)),
            ],
        )
    }
}
