//! Code templates with named placeholders.
//!
//! A template is ordinary source text in which selected identifiers act as
//! placeholders. Expansion parses the text, then walks the tree replacing
//! each placeholder according to the substitution kind: identifiers can be
//! renamed, swapped for string literals, replaced by expressions, or spliced
//! as statement or expression lists. Substituted subtrees are deep-copied on
//! every occurrence, so reusing a placeholder twice never aliases nodes.

use ahash::AHashMap;

use crate::ast::{Expr, ExprKind, NodeIds, Param, Params, Stmt, StmtKind};
use crate::errors::{ConvertError, ConvertResult};
use crate::parse::parse_block;

/// What a placeholder expands to.
#[derive(Debug, Clone)]
pub enum TemplateValue {
    /// Rename the identifier wherever it appears: names, def names,
    /// parameter names, attribute names.
    Name(String),
    /// Expand a parameter placeholder into several parameters.
    NameList(Vec<String>),
    /// Replace the identifier with a string literal.
    StrLit(String),
    /// Replace the identifier with a copy of this expression.
    Expr(Expr),
    /// Splice into an element position (tuple, list, call arguments).
    ExprList(Vec<Expr>),
    /// Replace an expression statement with a copy of this statement.
    Stmt(Stmt),
    /// Splice into statement position.
    Stmts(Vec<Stmt>),
}

/// Expands `template`, applying `subs` to its placeholder identifiers.
pub fn replace(
    ids: &mut NodeIds,
    template: &str,
    subs: &[(&str, TemplateValue)],
) -> ConvertResult<Vec<Stmt>> {
    let parsed = parse_block(&unindent(template), ids)?;
    let mut sub = Substituter {
        subs: subs.iter().map(|(k, v)| (*k, v)).collect(),
        ids,
    };
    sub.block(parsed)
}

/// Like [`replace`], but the template must expand to a single expression.
pub fn replace_as_expression(
    ids: &mut NodeIds,
    template: &str,
    subs: &[(&str, TemplateValue)],
) -> ConvertResult<Expr> {
    let mut stmts = replace(ids, template, subs)?;
    if stmts.len() == 1 {
        if let StmtKind::Expr(_) = &stmts[0].kind {
            let StmtKind::Expr(expr) = stmts.remove(0).kind else {
                unreachable!();
            };
            return Ok(expr);
        }
    }
    Err(ConvertError::TemplateShape {
        expected: "a single expression",
        found: stmts
            .iter()
            .map(Stmt::kind_name)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Templates are written inline in pass code with leading indentation;
/// strip the common prefix so they parse as top-level source. Also used on
/// recovered entity snippets, which carry the indentation of their defining
/// scope.
pub(crate) fn unindent(template: &str) -> String {
    let mut prefix: Option<&str> = None;
    for line in template.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        prefix = Some(match prefix {
            Some(p) => common_prefix(p, indent),
            None => indent,
        });
    }
    let prefix = prefix.unwrap_or("");
    let mut out = String::with_capacity(template.len());
    for line in template.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(line.strip_prefix(prefix).unwrap_or(line.trim_start()));
            out.push('\n');
        }
    }
    out
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..end]
}

struct Substituter<'a> {
    subs: AHashMap<&'a str, &'a TemplateValue>,
    ids: &'a mut NodeIds,
}

impl Substituter<'_> {
    fn block(&mut self, stmts: Vec<Stmt>) -> ConvertResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let StmtKind::Expr(expr) = &stmt.kind {
                if let ExprKind::Name { name, .. } = &expr.kind {
                    match self.subs.get(name.as_str()) {
                        Some(TemplateValue::Stmts(replacement)) => {
                            out.extend(replacement.iter().map(|s| s.deep_copy(self.ids)));
                            continue;
                        }
                        Some(TemplateValue::Stmt(replacement)) => {
                            out.push(replacement.deep_copy(self.ids));
                            continue;
                        }
                        _ => {}
                    }
                }
            }
            out.push(self.stmt(stmt)?);
        }
        Ok(out)
    }

    fn stmt(&mut self, mut stmt: Stmt) -> ConvertResult<Stmt> {
        stmt.kind = match stmt.kind {
            StmtKind::FunctionDef { name, params, body } => StmtKind::FunctionDef {
                name: self.ident(name),
                params: self.params(params)?,
                body: self.block(body)?,
            },
            StmtKind::Return(value) => {
                StmtKind::Return(value.map(|v| self.expr(v)).transpose()?)
            }
            StmtKind::Assign { targets, value } => StmtKind::Assign {
                targets: targets
                    .into_iter()
                    .map(|t| self.expr(t))
                    .collect::<ConvertResult<Vec<_>>>()?,
                value: self.expr(value)?,
            },
            StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: self.expr(target)?,
                op,
                value: self.expr(value)?,
            },
            StmtKind::Expr(value) => StmtKind::Expr(self.expr(value)?),
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test)?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            },
            StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.expr(test)?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => StmtKind::For {
                target: self.expr(target)?,
                iter: self.expr(iter)?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            },
            StmtKind::Global(names) => {
                StmtKind::Global(names.into_iter().map(|n| self.ident(n)).collect())
            }
            StmtKind::Nonlocal(names) => {
                StmtKind::Nonlocal(names.into_iter().map(|n| self.ident(n)).collect())
            }
            kind @ (StmtKind::Pass | StmtKind::Break | StmtKind::Continue) => kind,
        };
        Ok(stmt)
    }

    fn params(&mut self, params: Params) -> ConvertResult<Params> {
        let mut args = Vec::with_capacity(params.args.len());
        for param in params.args {
            match self.subs.get(param.name.as_str()) {
                Some(TemplateValue::NameList(names)) => {
                    args.extend(names.iter().map(|n| Param {
                        name: n.clone(),
                        default: None,
                    }));
                }
                _ => args.push(Param {
                    name: self.ident(param.name),
                    default: param.default.map(|d| self.expr(d)).transpose()?,
                }),
            }
        }
        let kwonlyargs = params
            .kwonlyargs
            .into_iter()
            .map(|p| {
                Ok(Param {
                    name: self.ident(p.name),
                    default: p.default.map(|d| self.expr(d)).transpose()?,
                })
            })
            .collect::<ConvertResult<Vec<_>>>()?;
        Ok(Params {
            args,
            vararg: params.vararg.map(|v| self.ident(v)),
            kwonlyargs,
            kwarg: params.kwarg.map(|v| self.ident(v)),
        })
    }

    fn ident(&mut self, name: String) -> String {
        match self.subs.get(name.as_str()) {
            Some(TemplateValue::Name(n)) => n.clone(),
            _ => name,
        }
    }

    /// Splices `ExprList` substitutions into an element position.
    fn elements(&mut self, elts: Vec<Expr>) -> ConvertResult<Vec<Expr>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            if let ExprKind::Name { name, .. } = &elt.kind {
                if let Some(TemplateValue::ExprList(replacement)) = self.subs.get(name.as_str()) {
                    out.extend(replacement.iter().map(|e| e.deep_copy(self.ids)));
                    continue;
                }
            }
            out.push(self.expr(elt)?);
        }
        Ok(out)
    }

    fn expr(&mut self, mut expr: Expr) -> ConvertResult<Expr> {
        expr.kind = match expr.kind {
            ExprKind::Name { name, ctx } => match self.subs.get(name.as_str()) {
                Some(TemplateValue::Name(n)) => ExprKind::Name {
                    name: n.clone(),
                    ctx,
                },
                Some(TemplateValue::StrLit(s)) => ExprKind::Str(s.clone()),
                Some(TemplateValue::Expr(e)) => return Ok(e.deep_copy(self.ids)),
                Some(other) => {
                    return Err(ConvertError::TemplateShape {
                        expected: "a name, string, or expression substitution",
                        found: format!("{other:?} for placeholder {name}"),
                    });
                }
                None => ExprKind::Name { name, ctx },
            },
            ExprKind::Tuple { elts, ctx } => ExprKind::Tuple {
                elts: self.elements(elts)?,
                ctx,
            },
            ExprKind::List { elts, ctx } => ExprKind::List {
                elts: self.elements(elts)?,
                ctx,
            },
            ExprKind::Dict { keys, values } => ExprKind::Dict {
                keys: keys
                    .into_iter()
                    .map(|k| k.map(|k| self.expr(k)).transpose())
                    .collect::<ConvertResult<Vec<_>>>()?,
                values: values
                    .into_iter()
                    .map(|v| self.expr(v))
                    .collect::<ConvertResult<Vec<_>>>()?,
            },
            ExprKind::Attribute { value, attr, ctx } => ExprKind::Attribute {
                value: Box::new(self.expr(*value)?),
                attr: self.ident(attr),
                ctx,
            },
            ExprKind::Subscript { value, index, ctx } => ExprKind::Subscript {
                value: Box::new(self.expr(*value)?),
                index: Box::new(self.expr(*index)?),
                ctx,
            },
            ExprKind::Call {
                func,
                args,
                keywords,
            } => ExprKind::Call {
                func: Box::new(self.expr(*func)?),
                args: self.elements(args)?,
                keywords: keywords
                    .into_iter()
                    .map(|mut k| {
                        k.value = self.expr(k.value)?;
                        Ok(k)
                    })
                    .collect::<ConvertResult<Vec<_>>>()?,
            },
            ExprKind::Starred { value } => ExprKind::Starred {
                value: Box::new(self.expr(*value)?),
            },
            ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
                op,
                values: values
                    .into_iter()
                    .map(|v| self.expr(v))
                    .collect::<ConvertResult<Vec<_>>>()?,
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op,
                operand: Box::new(self.expr(*operand)?),
            },
            ExprKind::BinOp { left, op, right } => ExprKind::BinOp {
                left: Box::new(self.expr(*left)?),
                op,
                right: Box::new(self.expr(*right)?),
            },
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => ExprKind::Compare {
                left: Box::new(self.expr(*left)?),
                ops,
                comparators: comparators
                    .into_iter()
                    .map(|c| self.expr(c))
                    .collect::<ConvertResult<Vec<_>>>()?,
            },
            ExprKind::Lambda { params, body } => ExprKind::Lambda {
                params: Box::new(self.params(*params)?),
                body: Box::new(self.expr(*body)?),
            },
            kind @ (ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::None) => kind,
        };
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ctx;

    fn name_expr(ids: &mut NodeIds, name: &str) -> Expr {
        Expr::name(ids, name, Ctx::Load)
    }

    #[test]
    fn renames_identifiers_everywhere() {
        let mut ids = NodeIds::new();
        let stmts = replace(
            &mut ids,
            "def fn_name(a):\n    return fn_name(a)\n",
            &[("fn_name", TemplateValue::Name("worker".to_owned()))],
        )
        .unwrap();
        let StmtKind::FunctionDef { name, body, .. } = &stmts[0].kind else {
            panic!("expected def");
        };
        assert_eq!(name, "worker");
        let StmtKind::Return(Some(ret)) = &body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Call { func, .. } = &ret.kind else {
            panic!("expected call");
        };
        assert_eq!(func.as_name(), Some("worker"));
    }

    #[test]
    fn splices_statements_and_expressions() {
        let mut ids = NodeIds::new();
        let inits = replace(&mut ids, "x = 1\ny = 2\n", &[]).unwrap();
        let value = name_expr(&mut ids, "x");
        let stmts = replace(
            &mut ids,
            "def f():\n    inits\n    return result\n",
            &[
                ("inits", TemplateValue::Stmts(inits)),
                ("result", TemplateValue::Expr(value)),
            ],
        )
        .unwrap();
        let StmtKind::FunctionDef { body, .. } = &stmts[0].kind else {
            panic!("expected def");
        };
        assert_eq!(body.len(), 3);
        assert!(matches!(body[2].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn expands_name_lists_into_parameters() {
        let mut ids = NodeIds::new();
        let stmts = replace(
            &mut ids,
            "def f(args):\n    pass\n",
            &[(
                "args",
                TemplateValue::NameList(vec!["a".to_owned(), "b".to_owned()]),
            )],
        )
        .unwrap();
        let StmtKind::FunctionDef { params, .. } = &stmts[0].kind else {
            panic!("expected def");
        };
        assert_eq!(params.bound_names(), vec!["a", "b"]);
    }

    #[test]
    fn splices_expression_lists_into_tuples() {
        let mut ids = NodeIds::new();
        let a = name_expr(&mut ids, "a");
        let b = name_expr(&mut ids, "b");
        let expr = replace_as_expression(
            &mut ids,
            "(writes,)\n",
            &[("writes", TemplateValue::ExprList(vec![a, b]))],
        )
        .unwrap();
        let ExprKind::Tuple { elts, .. } = &expr.kind else {
            panic!("expected tuple");
        };
        assert_eq!(elts.len(), 2);
    }

    #[test]
    fn empty_expression_list_gives_empty_tuple() {
        let mut ids = NodeIds::new();
        let expr = replace_as_expression(
            &mut ids,
            "(writes,)\n",
            &[("writes", TemplateValue::ExprList(vec![]))],
        )
        .unwrap();
        let ExprKind::Tuple { elts, .. } = &expr.kind else {
            panic!("expected tuple");
        };
        assert!(elts.is_empty());
    }

    #[test]
    fn string_literal_substitution() {
        let mut ids = NodeIds::new();
        let expr = replace_as_expression(
            &mut ids,
            "ov.init(var_name)\n",
            &[
                ("ov", TemplateValue::Name("overload_sym".to_owned())),
                ("var_name", TemplateValue::StrLit("x".to_owned())),
            ],
        )
        .unwrap();
        let ExprKind::Call { func, args, .. } = &expr.kind else {
            panic!("expected call");
        };
        let ExprKind::Attribute { value, attr, .. } = &func.kind else {
            panic!("expected attribute");
        };
        assert_eq!(value.as_name(), Some("overload_sym"));
        assert_eq!(attr, "init");
        assert!(matches!(&args[0].kind, ExprKind::Str(s) if s == "x"));
    }

    #[test]
    fn replace_as_expression_rejects_statement_results() {
        let mut ids = NodeIds::new();
        let err = replace_as_expression(&mut ids, "x = 1\n", &[]).unwrap_err();
        assert!(matches!(err, ConvertError::TemplateShape { .. }));
    }

    #[test]
    fn substituted_subtrees_get_fresh_ids() {
        let mut ids = NodeIds::new();
        let value = name_expr(&mut ids, "v");
        let original_id = value.id;
        let stmts = replace(
            &mut ids,
            "a = rhs\nb = rhs\n",
            &[("rhs", TemplateValue::Expr(value))],
        )
        .unwrap();
        let extract = |stmt: &Stmt| match &stmt.kind {
            StmtKind::Assign { value, .. } => value.id,
            _ => panic!("expected assign"),
        };
        let (a, b) = (extract(&stmts[0]), extract(&stmts[1]));
        assert_ne!(a, b);
        assert_ne!(a, original_id);
    }
}
