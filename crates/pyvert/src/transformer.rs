//! The pass framework: generic traversal with entity tracking, scoped state,
//! and error attribution.
//!
//! A pass implements [`Transform`] and overrides `visit_stmt` / `visit_expr`
//! for the node kinds it cares about, delegating everything else to
//! [`walk_stmt`] / [`walk_expr`]. Traversal happens through [`dispatch_stmt`]
//! and [`dispatch_expr`], which maintain the enclosing-entity stack and wrap
//! any failure in a [`ConvertError::Visit`] naming the pass and the failing
//! node; an error that already carries visit context is never re-wrapped, so
//! the innermost failure wins.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use ruff_text_size::TextRange;
use smallvec::{smallvec, SmallVec};

use crate::ast::{Expr, ExprKind, Keyword, Param, Params, Stmt, StmtKind};
use crate::entity::EntityContext;
use crate::errors::{ConvertError, ConvertResult};

/// A statement visit can expand one statement into several.
pub type StmtVec = SmallVec<[Stmt; 1]>;

pub trait Transform {
    fn pass_name(&self) -> &'static str;

    fn context(&mut self) -> &mut EntityContext;

    fn visit_stmt(&mut self, stmt: Stmt) -> ConvertResult<StmtVec>
    where
        Self: Sized,
    {
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: Expr) -> ConvertResult<Expr>
    where
        Self: Sized,
    {
        walk_expr(self, expr)
    }
}

fn attribute_error(
    pass: &'static str,
    node: &'static str,
    range: TextRange,
    err: ConvertError,
) -> ConvertError {
    if err.is_attributed() {
        err
    } else {
        ConvertError::Visit {
            pass,
            node,
            range,
            source: Box::new(err),
        }
    }
}

/// Visits one statement: records the enclosing-entity stack, tracks entity
/// nesting, and attributes failures to this node.
pub fn dispatch_stmt<T: Transform>(t: &mut T, stmt: Stmt) -> ConvertResult<StmtVec> {
    let node = stmt.kind_name();
    let range = stmt.range;
    let id = stmt.id;
    let is_entity = matches!(stmt.kind, StmtKind::FunctionDef { .. });
    {
        let ctx = t.context();
        let stack = ctx.entity_stack.clone();
        ctx.anno.set_entity_stack(id, stack);
        if is_entity {
            ctx.entity_stack.push(id);
        }
    }
    let result = t.visit_stmt(stmt);
    if is_entity {
        t.context().entity_stack.pop();
    }
    result.map_err(|e| attribute_error(t.pass_name(), node, range, e))
}

/// Expression counterpart of [`dispatch_stmt`]. Lambdas count as entities.
pub fn dispatch_expr<T: Transform>(t: &mut T, expr: Expr) -> ConvertResult<Expr> {
    let node = expr.kind_name();
    let range = expr.range;
    let id = expr.id;
    let is_entity = matches!(expr.kind, ExprKind::Lambda { .. });
    {
        let ctx = t.context();
        let stack = ctx.entity_stack.clone();
        ctx.anno.set_entity_stack(id, stack);
        if is_entity {
            ctx.entity_stack.push(id);
        }
    }
    let result = t.visit_expr(expr);
    if is_entity {
        t.context().entity_stack.pop();
    }
    result.map_err(|e| attribute_error(t.pass_name(), node, range, e))
}

/// Visits every statement of a block, flattening expansions.
pub fn dispatch_block<T: Transform>(t: &mut T, block: Vec<Stmt>) -> ConvertResult<Vec<Stmt>> {
    let mut out = Vec::with_capacity(block.len());
    for stmt in block {
        out.extend(dispatch_stmt(t, stmt)?);
    }
    Ok(out)
}

/// What an after-visit callback decided to do with a visited statement.
pub enum AfterVisit {
    /// Keep the statement as-is.
    Keep(Stmt),
    /// Replace the statement and move the block's remaining statements into
    /// the replacement's primary body.
    AbsorbRest(Stmt),
}

/// Like [`dispatch_block`], but runs `after` on every visited statement.
/// When `after` returns [`AfterVisit::AbsorbRest`], the rest of the block is
/// processed and appended inside the returned statement's body.
pub fn visit_block<T: Transform>(
    t: &mut T,
    block: Vec<Stmt>,
    after: &mut dyn FnMut(&mut T, Stmt) -> ConvertResult<AfterVisit>,
) -> ConvertResult<Vec<Stmt>> {
    let mut out = Vec::with_capacity(block.len());
    let mut iter = block.into_iter();
    while let Some(stmt) = iter.next() {
        for visited in dispatch_stmt(t, stmt)? {
            match after(t, visited)? {
                AfterVisit::Keep(kept) => out.push(kept),
                AfterVisit::AbsorbRest(mut wrapper) => {
                    let rest = visit_block(t, iter.collect(), after)?;
                    match primary_block_mut(&mut wrapper) {
                        Some(body) => body.extend(rest),
                        None => {
                            return Err(ConvertError::TemplateShape {
                                expected: "a statement with a body to absorb into",
                                found: wrapper.kind_name().to_owned(),
                            });
                        }
                    }
                    out.push(wrapper);
                    return Ok(out);
                }
            }
        }
    }
    Ok(out)
}

fn primary_block_mut(stmt: &mut Stmt) -> Option<&mut Vec<Stmt>> {
    match &mut stmt.kind {
        StmtKind::FunctionDef { body, .. }
        | StmtKind::If { body, .. }
        | StmtKind::While { body, .. }
        | StmtKind::For { body, .. } => Some(body),
        _ => None,
    }
}

/// Default statement recursion. Node id and range are preserved.
pub fn walk_stmt<T: Transform>(t: &mut T, mut stmt: Stmt) -> ConvertResult<StmtVec> {
    stmt.kind = match stmt.kind {
        StmtKind::FunctionDef { name, params, body } => StmtKind::FunctionDef {
            name,
            params: walk_params(t, params)?,
            body: dispatch_block(t, body)?,
        },
        StmtKind::Return(value) => {
            StmtKind::Return(value.map(|v| dispatch_expr(t, v)).transpose()?)
        }
        StmtKind::Assign { targets, value } => StmtKind::Assign {
            targets: targets
                .into_iter()
                .map(|target| dispatch_expr(t, target))
                .collect::<ConvertResult<Vec<_>>>()?,
            value: dispatch_expr(t, value)?,
        },
        StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
            target: dispatch_expr(t, target)?,
            op,
            value: dispatch_expr(t, value)?,
        },
        StmtKind::Expr(value) => StmtKind::Expr(dispatch_expr(t, value)?),
        StmtKind::If { test, body, orelse } => StmtKind::If {
            test: dispatch_expr(t, test)?,
            body: dispatch_block(t, body)?,
            orelse: dispatch_block(t, orelse)?,
        },
        StmtKind::While { test, body, orelse } => StmtKind::While {
            test: dispatch_expr(t, test)?,
            body: dispatch_block(t, body)?,
            orelse: dispatch_block(t, orelse)?,
        },
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => StmtKind::For {
            target: dispatch_expr(t, target)?,
            iter: dispatch_expr(t, iter)?,
            body: dispatch_block(t, body)?,
            orelse: dispatch_block(t, orelse)?,
        },
        kind @ (StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue) => kind,
    };
    Ok(smallvec![stmt])
}

fn walk_params<T: Transform>(t: &mut T, params: Params) -> ConvertResult<Params> {
    let walk_list = |t: &mut T, list: Vec<Param>| {
        list.into_iter()
            .map(|p| {
                Ok(Param {
                    name: p.name,
                    default: p.default.map(|d| dispatch_expr(t, d)).transpose()?,
                })
            })
            .collect::<ConvertResult<Vec<_>>>()
    };
    Ok(Params {
        args: walk_list(t, params.args)?,
        vararg: params.vararg,
        kwonlyargs: walk_list(t, params.kwonlyargs)?,
        kwarg: params.kwarg,
    })
}

/// Default expression recursion. Node id and range are preserved.
pub fn walk_expr<T: Transform>(t: &mut T, mut expr: Expr) -> ConvertResult<Expr> {
    expr.kind = match expr.kind {
        ExprKind::Tuple { elts, ctx } => ExprKind::Tuple {
            elts: dispatch_exprs(t, elts)?,
            ctx,
        },
        ExprKind::List { elts, ctx } => ExprKind::List {
            elts: dispatch_exprs(t, elts)?,
            ctx,
        },
        ExprKind::Dict { keys, values } => ExprKind::Dict {
            keys: keys
                .into_iter()
                .map(|k| k.map(|k| dispatch_expr(t, k)).transpose())
                .collect::<ConvertResult<Vec<_>>>()?,
            values: dispatch_exprs(t, values)?,
        },
        ExprKind::Attribute { value, attr, ctx } => ExprKind::Attribute {
            value: Box::new(dispatch_expr(t, *value)?),
            attr,
            ctx,
        },
        ExprKind::Subscript { value, index, ctx } => ExprKind::Subscript {
            value: Box::new(dispatch_expr(t, *value)?),
            index: Box::new(dispatch_expr(t, *index)?),
            ctx,
        },
        ExprKind::Call {
            func,
            args,
            keywords,
        } => ExprKind::Call {
            func: Box::new(dispatch_expr(t, *func)?),
            args: dispatch_exprs(t, args)?,
            keywords: keywords
                .into_iter()
                .map(|k| {
                    Ok(Keyword {
                        name: k.name,
                        value: dispatch_expr(t, k.value)?,
                    })
                })
                .collect::<ConvertResult<Vec<_>>>()?,
        },
        ExprKind::Starred { value } => ExprKind::Starred {
            value: Box::new(dispatch_expr(t, *value)?),
        },
        ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
            op,
            values: dispatch_exprs(t, values)?,
        },
        ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
            op,
            operand: Box::new(dispatch_expr(t, *operand)?),
        },
        ExprKind::BinOp { left, op, right } => ExprKind::BinOp {
            left: Box::new(dispatch_expr(t, *left)?),
            op,
            right: Box::new(dispatch_expr(t, *right)?),
        },
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => ExprKind::Compare {
            left: Box::new(dispatch_expr(t, *left)?),
            ops,
            comparators: dispatch_exprs(t, comparators)?,
        },
        ExprKind::Lambda { params, body } => ExprKind::Lambda {
            params: Box::new(walk_params(t, *params)?),
            body: Box::new(dispatch_expr(t, *body)?),
        },
        kind @ (ExprKind::Name { .. }
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::None) => kind,
    };
    Ok(expr)
}

fn dispatch_exprs<T: Transform>(t: &mut T, exprs: Vec<Expr>) -> ConvertResult<Vec<Expr>> {
    exprs
        .into_iter()
        .map(|e| dispatch_expr(t, e))
        .collect()
}

/// Per-type scoped state for passes that track nesting (loop depth,
/// conditional depth, and the like).
///
/// Each `enter` opens a new level holding a fresh `T::default()`; `exit`
/// closes it. `current` returns the innermost level's value, creating the
/// base level on first use. Levels have identity: two reads at the same
/// nesting level see the same `Rc`, reads at different levels see different
/// ones.
#[derive(Default)]
pub struct ScopedStateMap {
    stacks: AHashMap<TypeId, Vec<Rc<dyn Any>>>,
}

impl ScopedStateMap {
    pub fn enter<S: Default + 'static>(&mut self) {
        self.stacks
            .entry(TypeId::of::<S>())
            .or_default()
            .push(Rc::new(RefCell::new(S::default())));
    }

    pub fn exit<S: 'static>(&mut self) {
        let stack = self
            .stacks
            .get_mut(&TypeId::of::<S>())
            .filter(|s| !s.is_empty());
        match stack {
            Some(stack) => {
                stack.pop();
            }
            None => panic!("exit without matching enter"),
        }
    }

    pub fn current<S: Default + 'static>(&mut self) -> Rc<RefCell<S>> {
        let stack = self.stacks.entry(TypeId::of::<S>()).or_default();
        if stack.is_empty() {
            stack.push(Rc::new(RefCell::new(S::default())));
        }
        let top = stack.last().cloned().unwrap_or_else(|| unreachable!());
        Rc::downcast::<RefCell<S>>(top).unwrap_or_else(|_| unreachable!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_state_levels_have_identity() {
        #[derive(Default)]
        struct LoopState;

        let mut states = ScopedStateMap::default();
        let base_a = states.current::<LoopState>();
        let base_b = states.current::<LoopState>();
        assert!(Rc::ptr_eq(&base_a, &base_b));

        states.enter::<LoopState>();
        let inner = states.current::<LoopState>();
        assert!(!Rc::ptr_eq(&base_a, &inner));
        states.exit::<LoopState>();

        let back = states.current::<LoopState>();
        assert!(Rc::ptr_eq(&base_a, &back));
    }

    #[test]
    fn distinct_types_track_separately() {
        #[derive(Default)]
        struct A;
        #[derive(Default)]
        struct B;

        let mut states = ScopedStateMap::default();
        let a = states.current::<A>();
        states.enter::<B>();
        let a_again = states.current::<A>();
        assert!(Rc::ptr_eq(&a, &a_again));
        states.exit::<B>();
    }
}
