//! Small tree utilities shared by the passes.

use crate::ast::{Expr, ExprKind, Keyword, NodeIds, Param, Params, Stmt, StmtKind};
use crate::errors::{ConvertError, ConvertResult};

/// Renders keyword arguments as a dict literal, preserving argument order.
/// Named keywords become string keys; `**` splats become unkeyed entries, so
/// the dict merges them the way a call site would.
pub fn keywords_to_dict(ids: &mut NodeIds, keywords: &[Keyword]) -> Expr {
    let mut keys = Vec::with_capacity(keywords.len());
    let mut values = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        keys.push(
            keyword
                .name
                .as_ref()
                .map(|name| Expr::str_lit(ids, name.clone())),
        );
        values.push(keyword.value.deep_copy(ids));
    }
    Expr::synth(ids, ExprKind::Dict { keys, values })
}

/// A node pair handed to the [`parallel_walk`] callback.
pub enum NodePair<'a> {
    Stmts(&'a Stmt, &'a Stmt),
    Exprs(&'a Expr, &'a Expr),
}

/// Walks two trees in lockstep, invoking `visit` on each corresponding pair.
///
/// Any structural divergence aborts with `StructuralMismatch`, including
/// differences in names, operators, and literal values; only node ids and
/// ranges are ignored.
pub fn parallel_walk<'a>(
    left: &'a [Stmt],
    right: &'a [Stmt],
    visit: &mut dyn FnMut(NodePair<'a>),
) -> ConvertResult<()> {
    if left.len() != right.len() {
        return Err(mismatch(
            format!("block of {}", left.len()),
            format!("block of {}", right.len()),
        ));
    }
    for (l, r) in left.iter().zip(right) {
        walk_stmt_pair(l, r, visit)?;
    }
    Ok(())
}

fn mismatch(left: String, right: String) -> ConvertError {
    ConvertError::StructuralMismatch { left, right }
}

fn stmt_mismatch(l: &Stmt, r: &Stmt) -> ConvertError {
    mismatch(l.kind_name().to_owned(), r.kind_name().to_owned())
}

fn expr_mismatch(l: &Expr, r: &Expr) -> ConvertError {
    mismatch(l.kind_name().to_owned(), r.kind_name().to_owned())
}

fn walk_stmt_pair<'a>(
    l: &'a Stmt,
    r: &'a Stmt,
    visit: &mut dyn FnMut(NodePair<'a>),
) -> ConvertResult<()> {
    visit(NodePair::Stmts(l, r));
    match (&l.kind, &r.kind) {
        (
            StmtKind::FunctionDef {
                name: ln,
                params: lp,
                body: lb,
            },
            StmtKind::FunctionDef {
                name: rn,
                params: rp,
                body: rb,
            },
        ) if ln == rn => {
            walk_params_pair(lp, rp, visit).map_err(|_| stmt_mismatch(l, r))?;
            parallel_walk(lb, rb, visit)
        }
        (StmtKind::Return(None), StmtKind::Return(None)) => Ok(()),
        (StmtKind::Return(Some(lv)), StmtKind::Return(Some(rv))) => walk_expr_pair(lv, rv, visit),
        (
            StmtKind::Assign {
                targets: lt,
                value: lv,
            },
            StmtKind::Assign {
                targets: rt,
                value: rv,
            },
        ) if lt.len() == rt.len() => {
            for (a, b) in lt.iter().zip(rt) {
                walk_expr_pair(a, b, visit)?;
            }
            walk_expr_pair(lv, rv, visit)
        }
        (
            StmtKind::AugAssign {
                target: lt,
                op: lo,
                value: lv,
            },
            StmtKind::AugAssign {
                target: rt,
                op: ro,
                value: rv,
            },
        ) if lo == ro => {
            walk_expr_pair(lt, rt, visit)?;
            walk_expr_pair(lv, rv, visit)
        }
        (StmtKind::Expr(lv), StmtKind::Expr(rv)) => walk_expr_pair(lv, rv, visit),
        (
            StmtKind::If {
                test: lt,
                body: lb,
                orelse: lo,
            },
            StmtKind::If {
                test: rt,
                body: rb,
                orelse: ro,
            },
        )
        | (
            StmtKind::While {
                test: lt,
                body: lb,
                orelse: lo,
            },
            StmtKind::While {
                test: rt,
                body: rb,
                orelse: ro,
            },
        ) if stmt_kinds_match(l, r) => {
            walk_expr_pair(lt, rt, visit)?;
            parallel_walk(lb, rb, visit)?;
            parallel_walk(lo, ro, visit)
        }
        (
            StmtKind::For {
                target: lt,
                iter: li,
                body: lb,
                orelse: lo,
            },
            StmtKind::For {
                target: rt,
                iter: ri,
                body: rb,
                orelse: ro,
            },
        ) => {
            walk_expr_pair(lt, rt, visit)?;
            walk_expr_pair(li, ri, visit)?;
            parallel_walk(lb, rb, visit)?;
            parallel_walk(lo, ro, visit)
        }
        (StmtKind::Global(ln), StmtKind::Global(rn))
        | (StmtKind::Nonlocal(ln), StmtKind::Nonlocal(rn))
            if ln == rn =>
        {
            Ok(())
        }
        (StmtKind::Pass, StmtKind::Pass)
        | (StmtKind::Break, StmtKind::Break)
        | (StmtKind::Continue, StmtKind::Continue) => Ok(()),
        _ => Err(stmt_mismatch(l, r)),
    }
}

fn stmt_kinds_match(l: &Stmt, r: &Stmt) -> bool {
    l.kind_name() == r.kind_name()
}

fn walk_params_pair<'a>(
    l: &'a Params,
    r: &'a Params,
    visit: &mut dyn FnMut(NodePair<'a>),
) -> ConvertResult<()> {
    let pair_list = |visit: &mut dyn FnMut(NodePair<'a>),
                     a: &'a [Param],
                     b: &'a [Param]|
     -> ConvertResult<()> {
        if a.len() != b.len() {
            return Err(mismatch("parameters".to_owned(), "parameters".to_owned()));
        }
        for (x, y) in a.iter().zip(b) {
            if x.name != y.name {
                return Err(mismatch(x.name.clone(), y.name.clone()));
            }
            match (&x.default, &y.default) {
                (None, None) => {}
                (Some(xd), Some(yd)) => walk_expr_pair(xd, yd, visit)?,
                _ => return Err(mismatch("default".to_owned(), "no default".to_owned())),
            }
        }
        Ok(())
    };
    pair_list(visit, &l.args, &r.args)?;
    pair_list(visit, &l.kwonlyargs, &r.kwonlyargs)?;
    if l.vararg != r.vararg || l.kwarg != r.kwarg {
        return Err(mismatch("parameters".to_owned(), "parameters".to_owned()));
    }
    Ok(())
}

fn walk_expr_pair<'a>(
    l: &'a Expr,
    r: &'a Expr,
    visit: &mut dyn FnMut(NodePair<'a>),
) -> ConvertResult<()> {
    visit(NodePair::Exprs(l, r));
    let walk_list = |visit: &mut dyn FnMut(NodePair<'a>),
                     a: &'a [Expr],
                     b: &'a [Expr]|
     -> ConvertResult<()> {
        if a.len() != b.len() {
            return Err(expr_mismatch(l, r));
        }
        for (x, y) in a.iter().zip(b) {
            walk_expr_pair(x, y, visit)?;
        }
        Ok(())
    };
    match (&l.kind, &r.kind) {
        (ExprKind::Name { name: ln, .. }, ExprKind::Name { name: rn, .. }) if ln == rn => Ok(()),
        (ExprKind::Int(a), ExprKind::Int(b)) if a == b => Ok(()),
        (ExprKind::Float(a), ExprKind::Float(b)) if a == b => Ok(()),
        (ExprKind::Str(a), ExprKind::Str(b)) if a == b => Ok(()),
        (ExprKind::Bool(a), ExprKind::Bool(b)) if a == b => Ok(()),
        (ExprKind::None, ExprKind::None) => Ok(()),
        (ExprKind::Tuple { elts: a, .. }, ExprKind::Tuple { elts: b, .. })
        | (ExprKind::List { elts: a, .. }, ExprKind::List { elts: b, .. }) => {
            walk_list(visit, a, b)
        }
        (
            ExprKind::Dict {
                keys: lk,
                values: lv,
            },
            ExprKind::Dict {
                keys: rk,
                values: rv,
            },
        ) if lk.len() == rk.len() => {
            for (a, b) in lk.iter().zip(rk) {
                match (a, b) {
                    (None, None) => {}
                    (Some(a), Some(b)) => walk_expr_pair(a, b, visit)?,
                    _ => return Err(expr_mismatch(l, r)),
                }
            }
            walk_list(visit, lv, rv)
        }
        (
            ExprKind::Attribute {
                value: lv,
                attr: la,
                ..
            },
            ExprKind::Attribute {
                value: rv,
                attr: ra,
                ..
            },
        ) if la == ra => walk_expr_pair(lv, rv, visit),
        (
            ExprKind::Subscript {
                value: lv,
                index: li,
                ..
            },
            ExprKind::Subscript {
                value: rv,
                index: ri,
                ..
            },
        ) => {
            walk_expr_pair(lv, rv, visit)?;
            walk_expr_pair(li, ri, visit)
        }
        (
            ExprKind::Call {
                func: lf,
                args: la,
                keywords: lk,
            },
            ExprKind::Call {
                func: rf,
                args: ra,
                keywords: rk,
            },
        ) if lk.len() == rk.len() => {
            walk_expr_pair(lf, rf, visit)?;
            walk_list(visit, la, ra)?;
            for (a, b) in lk.iter().zip(rk) {
                if a.name != b.name {
                    return Err(expr_mismatch(l, r));
                }
                walk_expr_pair(&a.value, &b.value, visit)?;
            }
            Ok(())
        }
        (ExprKind::Starred { value: a }, ExprKind::Starred { value: b }) => {
            walk_expr_pair(a, b, visit)
        }
        (
            ExprKind::BoolOp { op: lo, values: lv },
            ExprKind::BoolOp { op: ro, values: rv },
        ) if lo == ro => walk_list(visit, lv, rv),
        (
            ExprKind::UnaryOp {
                op: lo,
                operand: la,
            },
            ExprKind::UnaryOp {
                op: ro,
                operand: ra,
            },
        ) if lo == ro => walk_expr_pair(la, ra, visit),
        (
            ExprKind::BinOp {
                left: la,
                op: lo,
                right: lb,
            },
            ExprKind::BinOp {
                left: ra,
                op: ro,
                right: rb,
            },
        ) if lo == ro => {
            walk_expr_pair(la, ra, visit)?;
            walk_expr_pair(lb, rb, visit)
        }
        (
            ExprKind::Compare {
                left: la,
                ops: lo,
                comparators: lc,
            },
            ExprKind::Compare {
                left: ra,
                ops: ro,
                comparators: rc,
            },
        ) if lo == ro => {
            walk_expr_pair(la, ra, visit)?;
            walk_list(visit, lc, rc)
        }
        (
            ExprKind::Lambda {
                params: lp,
                body: lb,
            },
            ExprKind::Lambda {
                params: rp,
                body: rb,
            },
        ) => {
            walk_params_pair(lp, rp, visit).map_err(|_| expr_mismatch(l, r))?;
            walk_expr_pair(lb, rb, visit)
        }
        _ => Err(expr_mismatch(l, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_block;

    fn parse(src: &str) -> Vec<Stmt> {
        let mut ids = NodeIds::new();
        parse_block(src, &mut ids).unwrap()
    }

    #[test]
    fn congruent_trees_walk_fully() {
        let a = parse("def f(x):\n    return x + 1\n");
        let b = parse("def f(x):\n    return x + 1\n");
        let mut pairs = 0;
        parallel_walk(&a, &b, &mut |_| pairs += 1).unwrap();
        assert!(pairs > 3);
    }

    #[test]
    fn literal_differences_are_divergence() {
        let a = parse("x = 1\n");
        let b = parse("x = 2\n");
        let err = parallel_walk(&a, &b, &mut |_| {}).unwrap_err();
        assert!(matches!(err, ConvertError::StructuralMismatch { .. }));
    }

    #[test]
    fn shape_differences_are_divergence() {
        let a = parse("if x:\n    pass\n");
        let b = parse("while x:\n    pass\n");
        assert!(parallel_walk(&a, &b, &mut |_| {}).is_err());
    }

    #[test]
    fn keywords_become_string_keyed_dict() {
        let mut ids = NodeIds::new();
        let stmts = parse_block("f(a=1, b=2)\n", &mut ids).unwrap();
        let StmtKind::Expr(call) = &stmts[0].kind else {
            panic!("expected call");
        };
        let ExprKind::Call { keywords, .. } = &call.kind else {
            panic!("expected call");
        };
        let dict = keywords_to_dict(&mut ids, keywords);
        let ExprKind::Dict { keys, values } = &dict.kind else {
            panic!("expected dict");
        };
        assert_eq!(keys.len(), 2);
        assert_eq!(values.len(), 2);
        assert!(matches!(
            keys[0].as_ref().map(|k| &k.kind),
            Some(ExprKind::Str(s)) if s == "a"
        ));
    }
}
