//! Lowering from the ruff parse tree to the crate's owned AST.
//!
//! Only the subset of Python the rewrite passes understand is lowered;
//! anything else fails with an `UnsupportedConstruct` error rather than being
//! silently dropped.

use ruff_python_ast::{self as ast, Expr as AstExpr, Stmt as AstStmt};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::ast::{
    BinOpKind, BoolOpKind, CmpOpKind, Ctx, Expr, ExprKind, Keyword, NodeIds, Param, Params, Stmt,
    StmtKind, UnaryOpKind,
};
use crate::errors::{ConvertError, ConvertResult};
use crate::templates::unindent;

/// Parses `code` as a module and lowers its statements.
pub fn parse_block(code: &str, ids: &mut NodeIds) -> ConvertResult<Vec<Stmt>> {
    let parsed = parse_module(code).map_err(|e| ConvertError::Parse {
        message: format!("{} at {:?}", e, e.range()),
    })?;
    let mut lowerer = Lowerer { ids };
    lowerer.lower_statements(parsed.into_syntax().body)
}

/// Turns a recovered entity snippet into a parsed program.
///
/// The snippet is dedented first, since it carries the indentation of the
/// scope it was defined in. When the dedented text still fails to parse, the
/// recovered lines may include trailing text from the defining statement
/// (an entity defined mid-expression drags the rest of the line along); the
/// source is cut at the line of the failure and parsed once more. Returns the
/// lowered statements together with the text that actually parsed, so callers
/// can keep the authoritative source.
pub fn parse_entity(snippet: &str, ids: &mut NodeIds) -> ConvertResult<(Vec<Stmt>, String)> {
    let dedented = unindent(snippet);
    let (message, offset) = match parse_module(&dedented) {
        Ok(parsed) => {
            let mut lowerer = Lowerer { ids };
            let stmts = lowerer.lower_statements(parsed.into_syntax().body)?;
            return Ok((stmts, dedented));
        }
        Err(e) => (e.to_string(), usize::from(e.range().start())),
    };
    let attempted = match truncate_before(&dedented, offset) {
        Some(truncated) => match parse_module(&truncated) {
            Ok(parsed) => {
                let mut lowerer = Lowerer { ids };
                let stmts = lowerer.lower_statements(parsed.into_syntax().body)?;
                return Ok((stmts, truncated));
            }
            Err(_) => vec![dedented, truncated],
        },
        None => vec![dedented],
    };
    Err(ConvertError::Extraction { message, attempted })
}

/// Drops the line containing byte `offset` and everything after it. Returns
/// `None` when nothing would be left.
fn truncate_before(source: &str, offset: usize) -> Option<String> {
    let offset = offset.min(source.len());
    let cut = source[..offset].rfind('\n')?;
    let kept = &source[..=cut];
    if kept.trim().is_empty() {
        return None;
    }
    Some(kept.to_owned())
}

struct Lowerer<'a> {
    ids: &'a mut NodeIds,
}

impl Lowerer<'_> {
    fn lower_statements(
        &mut self,
        statements: impl IntoIterator<Item = AstStmt>,
    ) -> ConvertResult<Vec<Stmt>> {
        statements.into_iter().map(|s| self.lower_statement(s)).collect()
    }

    fn lower_statement(&mut self, statement: AstStmt) -> ConvertResult<Stmt> {
        match statement {
            AstStmt::FunctionDef(function) => {
                let ast::StmtFunctionDef {
                    is_async,
                    name,
                    parameters,
                    body,
                    decorator_list,
                    range,
                    ..
                } = function;
                if is_async {
                    return Err(unsupported("async function", range));
                }
                if !decorator_list.is_empty() {
                    return Err(unsupported("decorated nested function", range));
                }
                let params = self.lower_parameters(*parameters)?;
                let body = self.lower_statements(body)?;
                Ok(Stmt::new(
                    self.ids,
                    range,
                    StmtKind::FunctionDef {
                        name: name.id.to_string(),
                        params,
                        body,
                    },
                ))
            }
            AstStmt::Return(ast::StmtReturn { value, range, .. }) => {
                let value = match value {
                    Some(v) => Some(self.lower_expression(*v)?),
                    None => None,
                };
                Ok(Stmt::new(self.ids, range, StmtKind::Return(value)))
            }
            AstStmt::Assign(ast::StmtAssign {
                targets,
                value,
                range,
                ..
            }) => {
                let targets = targets
                    .into_iter()
                    .map(|t| self.lower_expression(t))
                    .collect::<ConvertResult<Vec<_>>>()?;
                let value = self.lower_expression(*value)?;
                Ok(Stmt::new(self.ids, range, StmtKind::Assign { targets, value }))
            }
            AstStmt::AugAssign(ast::StmtAugAssign {
                target,
                op,
                value,
                range,
                ..
            }) => {
                let target = self.lower_expression(*target)?;
                let op = lower_operator(op, range)?;
                let value = self.lower_expression(*value)?;
                Ok(Stmt::new(self.ids, range, StmtKind::AugAssign { target, op, value }))
            }
            AstStmt::Expr(ast::StmtExpr { value, range, .. }) => {
                let value = self.lower_expression(*value)?;
                Ok(Stmt::new(self.ids, range, StmtKind::Expr(value)))
            }
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                range,
                ..
            }) => {
                let test = self.lower_expression(*test)?;
                let body = self.lower_statements(body)?;
                let orelse = self.lower_elif_else_clauses(elif_else_clauses)?;
                Ok(Stmt::new(self.ids, range, StmtKind::If { test, body, orelse }))
            }
            AstStmt::While(ast::StmtWhile {
                test,
                body,
                orelse,
                range,
                ..
            }) => {
                let test = self.lower_expression(*test)?;
                let body = self.lower_statements(body)?;
                let orelse = self.lower_statements(orelse)?;
                Ok(Stmt::new(self.ids, range, StmtKind::While { test, body, orelse }))
            }
            AstStmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                if is_async {
                    return Err(unsupported("async for", range));
                }
                let target = self.lower_expression(*target)?;
                let iter = self.lower_expression(*iter)?;
                let body = self.lower_statements(body)?;
                let orelse = self.lower_statements(orelse)?;
                Ok(Stmt::new(
                    self.ids,
                    range,
                    StmtKind::For {
                        target,
                        iter,
                        body,
                        orelse,
                    },
                ))
            }
            AstStmt::Global(ast::StmtGlobal { names, range, .. }) => {
                let names = names.iter().map(|n| n.id.to_string()).collect();
                Ok(Stmt::new(self.ids, range, StmtKind::Global(names)))
            }
            AstStmt::Nonlocal(ast::StmtNonlocal { names, range, .. }) => {
                let names = names.iter().map(|n| n.id.to_string()).collect();
                Ok(Stmt::new(self.ids, range, StmtKind::Nonlocal(names)))
            }
            AstStmt::Pass(ast::StmtPass { range, .. }) => {
                Ok(Stmt::new(self.ids, range, StmtKind::Pass))
            }
            AstStmt::Break(ast::StmtBreak { range, .. }) => {
                Ok(Stmt::new(self.ids, range, StmtKind::Break))
            }
            AstStmt::Continue(ast::StmtContinue { range, .. }) => {
                Ok(Stmt::new(self.ids, range, StmtKind::Continue))
            }
            other => Err(unsupported_stmt(&other)),
        }
    }

    /// `elif` chains arrive as a flat clause list; rebuild them as nested
    /// `If` statements from the innermost clause outward.
    fn lower_elif_else_clauses(
        &mut self,
        clauses: Vec<ast::ElifElseClause>,
    ) -> ConvertResult<Vec<Stmt>> {
        let mut tail: Vec<Stmt> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let test = self.lower_expression(test)?;
                    let body = self.lower_statements(clause.body)?;
                    tail = vec![Stmt::new(
                        self.ids,
                        clause.range,
                        StmtKind::If {
                            test,
                            body,
                            orelse: tail,
                        },
                    )];
                }
                None => {
                    tail = self.lower_statements(clause.body)?;
                }
            }
        }
        Ok(tail)
    }

    fn lower_parameters(&mut self, parameters: ast::Parameters) -> ConvertResult<Params> {
        let ast::Parameters {
            posonlyargs,
            args,
            vararg,
            kwonlyargs,
            kwarg,
            ..
        } = parameters;
        let mut positional = Vec::with_capacity(posonlyargs.len() + args.len());
        for p in posonlyargs.into_iter().chain(args) {
            positional.push(self.lower_param(p)?);
        }
        let kwonlyargs = kwonlyargs
            .into_iter()
            .map(|p| self.lower_param(p))
            .collect::<ConvertResult<Vec<_>>>()?;
        Ok(Params {
            args: positional,
            vararg: vararg.map(|v| v.name.id.to_string()),
            kwonlyargs,
            kwarg: kwarg.map(|v| v.name.id.to_string()),
        })
    }

    fn lower_param(&mut self, param: ast::ParameterWithDefault) -> ConvertResult<Param> {
        let default = match param.default {
            Some(expr) => Some(self.lower_expression(*expr)?),
            None => None,
        };
        Ok(Param {
            name: param.parameter.name.id.to_string(),
            default,
        })
    }

    fn lower_expression(&mut self, expression: AstExpr) -> ConvertResult<Expr> {
        match expression {
            AstExpr::Name(ast::ExprName { id, ctx, range, .. }) => Ok(Expr::new(
                self.ids,
                range,
                ExprKind::Name {
                    name: id.to_string(),
                    ctx: lower_ctx(ctx),
                },
            )),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => {
                let kind = match value {
                    ast::Number::Int(i) => {
                        let v = i.as_i64().ok_or_else(|| {
                            unsupported("integer literal out of i64 range", range)
                        })?;
                        ExprKind::Int(v)
                    }
                    ast::Number::Float(f) => ExprKind::Float(f),
                    ast::Number::Complex { .. } => {
                        return Err(unsupported("complex literal", range));
                    }
                };
                Ok(Expr::new(self.ids, range, kind))
            }
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, range, .. }) => {
                Ok(Expr::new(self.ids, range, ExprKind::Bool(value)))
            }
            AstExpr::NoneLiteral(ast::ExprNoneLiteral { range, .. }) => {
                Ok(Expr::new(self.ids, range, ExprKind::None))
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, range, .. }) => {
                Ok(Expr::new(self.ids, range, ExprKind::Str(value.to_string())))
            }
            AstExpr::Tuple(ast::ExprTuple {
                elts, ctx, range, ..
            }) => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.lower_expression(e))
                    .collect::<ConvertResult<Vec<_>>>()?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Tuple {
                        elts,
                        ctx: lower_ctx(ctx),
                    },
                ))
            }
            AstExpr::List(ast::ExprList {
                elts, ctx, range, ..
            }) => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.lower_expression(e))
                    .collect::<ConvertResult<Vec<_>>>()?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::List {
                        elts,
                        ctx: lower_ctx(ctx),
                    },
                ))
            }
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let mut keys = Vec::with_capacity(items.len());
                let mut values = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    keys.push(match key {
                        Some(k) => Some(self.lower_expression(k)?),
                        None => None,
                    });
                    values.push(self.lower_expression(value)?);
                }
                Ok(Expr::new(self.ids, range, ExprKind::Dict { keys, values }))
            }
            AstExpr::Attribute(ast::ExprAttribute {
                value,
                attr,
                ctx,
                range,
                ..
            }) => {
                let value = self.lower_expression(*value)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Attribute {
                        value: Box::new(value),
                        attr: attr.id.to_string(),
                        ctx: lower_ctx(ctx),
                    },
                ))
            }
            AstExpr::Subscript(ast::ExprSubscript {
                value,
                slice,
                ctx,
                range,
                ..
            }) => {
                let value = self.lower_expression(*value)?;
                let index = self.lower_expression(*slice)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                        ctx: lower_ctx(ctx),
                    },
                ))
            }
            AstExpr::Call(call) => {
                let range = call.range();
                let ast::ExprCall {
                    func, arguments, ..
                } = call;
                let func = self.lower_expression(*func)?;
                let ast::Arguments { args, keywords, .. } = arguments;
                let args = args
                    .into_vec()
                    .into_iter()
                    .map(|a| self.lower_expression(a))
                    .collect::<ConvertResult<Vec<_>>>()?;
                let keywords = keywords
                    .into_iter()
                    .map(|k| {
                        let value = self.lower_expression(k.value)?;
                        Ok(Keyword {
                            name: k.arg.map(|a| a.id.to_string()),
                            value,
                        })
                    })
                    .collect::<ConvertResult<Vec<_>>>()?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Call {
                        func: Box::new(func),
                        args,
                        keywords,
                    },
                ))
            }
            AstExpr::Starred(ast::ExprStarred { value, range, .. }) => {
                let value = self.lower_expression(*value)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Starred {
                        value: Box::new(value),
                    },
                ))
            }
            AstExpr::BoolOp(ast::ExprBoolOp {
                op, values, range, ..
            }) => {
                let op = match op {
                    ast::BoolOp::And => BoolOpKind::And,
                    ast::BoolOp::Or => BoolOpKind::Or,
                };
                let values = values
                    .into_iter()
                    .map(|v| self.lower_expression(v))
                    .collect::<ConvertResult<Vec<_>>>()?;
                Ok(Expr::new(self.ids, range, ExprKind::BoolOp { op, values }))
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp {
                op,
                operand,
                range,
                ..
            }) => {
                let op = match op {
                    ast::UnaryOp::Not => UnaryOpKind::Not,
                    ast::UnaryOp::USub => UnaryOpKind::USub,
                    ast::UnaryOp::UAdd => UnaryOpKind::UAdd,
                    ast::UnaryOp::Invert => UnaryOpKind::Invert,
                };
                let operand = self.lower_expression(*operand)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                ))
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left,
                op,
                right,
                range,
                ..
            }) => {
                let op = lower_operator(op, range)?;
                let left = self.lower_expression(*left)?;
                let right = self.lower_expression(*right)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::BinOp {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    },
                ))
            }
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                let left = self.lower_expression(*left)?;
                let ops = ops
                    .iter()
                    .map(|op| match op {
                        ast::CmpOp::Eq => CmpOpKind::Eq,
                        ast::CmpOp::NotEq => CmpOpKind::NotEq,
                        ast::CmpOp::Lt => CmpOpKind::Lt,
                        ast::CmpOp::LtE => CmpOpKind::LtE,
                        ast::CmpOp::Gt => CmpOpKind::Gt,
                        ast::CmpOp::GtE => CmpOpKind::GtE,
                        ast::CmpOp::Is => CmpOpKind::Is,
                        ast::CmpOp::IsNot => CmpOpKind::IsNot,
                        ast::CmpOp::In => CmpOpKind::In,
                        ast::CmpOp::NotIn => CmpOpKind::NotIn,
                    })
                    .collect();
                let comparators = comparators
                    .into_vec()
                    .into_iter()
                    .map(|c| self.lower_expression(c))
                    .collect::<ConvertResult<Vec<_>>>()?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Compare {
                        left: Box::new(left),
                        ops,
                        comparators,
                    },
                ))
            }
            AstExpr::Lambda(ast::ExprLambda {
                parameters,
                body,
                range,
                ..
            }) => {
                let params = match parameters {
                    Some(p) => self.lower_parameters(*p)?,
                    None => Params::default(),
                };
                let body = self.lower_expression(*body)?;
                Ok(Expr::new(
                    self.ids,
                    range,
                    ExprKind::Lambda {
                        params: Box::new(params),
                        body: Box::new(body),
                    },
                ))
            }
            other => Err(unsupported_expr(&other)),
        }
    }
}

fn lower_ctx(ctx: ast::ExprContext) -> Ctx {
    match ctx {
        ast::ExprContext::Store => Ctx::Store,
        ast::ExprContext::Del => Ctx::Del,
        ast::ExprContext::Load | ast::ExprContext::Invalid => Ctx::Load,
    }
}

fn lower_operator(op: ast::Operator, range: TextRange) -> ConvertResult<BinOpKind> {
    Ok(match op {
        ast::Operator::Add => BinOpKind::Add,
        ast::Operator::Sub => BinOpKind::Sub,
        ast::Operator::Mult => BinOpKind::Mul,
        ast::Operator::Div => BinOpKind::Div,
        ast::Operator::FloorDiv => BinOpKind::FloorDiv,
        ast::Operator::Mod => BinOpKind::Mod,
        ast::Operator::Pow => BinOpKind::Pow,
        other => {
            return Err(unsupported_operator(other, range));
        }
    })
}

fn unsupported(construct: &str, range: TextRange) -> ConvertError {
    ConvertError::UnsupportedConstruct {
        construct: construct.to_owned(),
        range,
    }
}

fn unsupported_stmt(stmt: &AstStmt) -> ConvertError {
    ConvertError::UnsupportedConstruct {
        construct: format!("{stmt:?}")
            .split('(')
            .next()
            .unwrap_or("statement")
            .to_owned(),
        range: stmt.range(),
    }
}

fn unsupported_expr(expr: &AstExpr) -> ConvertError {
    ConvertError::UnsupportedConstruct {
        construct: format!("{expr:?}")
            .split('(')
            .next()
            .unwrap_or("expression")
            .to_owned(),
        range: expr.range(),
    }
}

fn unsupported_operator(op: ast::Operator, range: TextRange) -> ConvertError {
    ConvertError::UnsupportedConstruct {
        construct: format!("operator {op:?}"),
        range,
    }
}
