//! Owned syntax tree for the subset of Python the converter rewrites.
//!
//! The parser's borrowed tree is lowered into this representation once, at
//! entity extraction time. Every node carries a [`NodeId`] allocated from the
//! conversion's [`NodeIds`] generator; annotation side tables are keyed on
//! those ids, so a deep copy (which allocates fresh ids) deliberately sheds
//! all annotations.

use ruff_text_size::TextRange;

/// Stable identity of a node within one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Allocator for [`NodeId`]s. One per conversion; never reset mid-conversion,
/// so ids stay unique across parses, template expansions, and deep copies.
#[derive(Debug, Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// Expression context, mirroring Python's load/store/delete distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ctx {
    #[default]
    Load,
    Store,
    Del,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Not,
    USub,
    UAdd,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOpKind {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// A single formal parameter, with its default when one exists.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Formal parameter list of a function or lambda.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub args: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonlyargs: Vec<Param>,
    pub kwarg: Option<String>,
}

impl Params {
    /// Every name the parameter list binds, in declaration order.
    pub fn bound_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.args.iter().map(|p| p.name.as_str()).collect();
        if let Some(vararg) = &self.vararg {
            names.push(vararg);
        }
        names.extend(self.kwonlyargs.iter().map(|p| p.name.as_str()));
        if let Some(kwarg) = &self.kwarg {
            names.push(kwarg);
        }
        names
    }

    fn deep_copy(&self, ids: &mut NodeIds) -> Self {
        Self {
            args: self
                .args
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    default: p.default.as_ref().map(|d| d.deep_copy(ids)),
                })
                .collect(),
            vararg: self.vararg.clone(),
            kwonlyargs: self
                .kwonlyargs
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    default: p.default.as_ref().map(|d| d.deep_copy(ids)),
                })
                .collect(),
            kwarg: self.kwarg.clone(),
        }
    }
}

/// A keyword argument at a call site. `name` is `None` for `**kwargs` splats.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub range: TextRange,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Name {
        name: String,
        ctx: Ctx,
    },
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Tuple {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    List {
        elts: Vec<Expr>,
        ctx: Ctx,
    },
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: Ctx,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        ctx: Ctx,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Starred {
        value: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOpKind,
        right: Box<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOpKind>,
        comparators: Vec<Expr>,
    },
    Lambda {
        params: Box<Params>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn new(ids: &mut NodeIds, range: TextRange, kind: ExprKind) -> Self {
        Self {
            id: ids.next(),
            range,
            kind,
        }
    }

    /// Synthetic node with an empty range (no counterpart in source text).
    pub fn synth(ids: &mut NodeIds, kind: ExprKind) -> Self {
        Self::new(ids, TextRange::default(), kind)
    }

    pub fn name(ids: &mut NodeIds, name: impl Into<String>, ctx: Ctx) -> Self {
        Self::synth(
            ids,
            ExprKind::Name {
                name: name.into(),
                ctx,
            },
        )
    }

    pub fn str_lit(ids: &mut NodeIds, value: impl Into<String>) -> Self {
        Self::synth(ids, ExprKind::Str(value.into()))
    }

    pub fn none_lit(ids: &mut NodeIds) -> Self {
        Self::synth(ids, ExprKind::None)
    }

    pub fn attribute(ids: &mut NodeIds, value: Expr, attr: impl Into<String>) -> Self {
        Self::synth(
            ids,
            ExprKind::Attribute {
                value: Box::new(value),
                attr: attr.into(),
                ctx: Ctx::Load,
            },
        )
    }

    pub fn call(ids: &mut NodeIds, func: Expr, args: Vec<Expr>, keywords: Vec<Keyword>) -> Self {
        Self::synth(
            ids,
            ExprKind::Call {
                func: Box::new(func),
                args,
                keywords,
            },
        )
    }

    pub fn tuple(ids: &mut NodeIds, elts: Vec<Expr>, ctx: Ctx) -> Self {
        Self::synth(ids, ExprKind::Tuple { elts, ctx })
    }

    pub fn subscript(ids: &mut NodeIds, value: Expr, index: Expr, ctx: Ctx) -> Self {
        Self::synth(
            ids,
            ExprKind::Subscript {
                value: Box::new(value),
                index: Box::new(index),
                ctx,
            },
        )
    }

    /// The plain name this expression refers to, if it is a name node.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Name { .. } => "Name",
            ExprKind::Int(_) => "Int",
            ExprKind::Float(_) => "Float",
            ExprKind::Str(_) => "Str",
            ExprKind::Bool(_) => "Bool",
            ExprKind::None => "None",
            ExprKind::Tuple { .. } => "Tuple",
            ExprKind::List { .. } => "List",
            ExprKind::Dict { .. } => "Dict",
            ExprKind::Attribute { .. } => "Attribute",
            ExprKind::Subscript { .. } => "Subscript",
            ExprKind::Call { .. } => "Call",
            ExprKind::Starred { .. } => "Starred",
            ExprKind::BoolOp { .. } => "BoolOp",
            ExprKind::UnaryOp { .. } => "UnaryOp",
            ExprKind::BinOp { .. } => "BinOp",
            ExprKind::Compare { .. } => "Compare",
            ExprKind::Lambda { .. } => "Lambda",
        }
    }

    /// Structural copy with fresh node ids. Annotations keyed on the old ids
    /// do not apply to the copy.
    pub fn deep_copy(&self, ids: &mut NodeIds) -> Self {
        let kind = match &self.kind {
            ExprKind::Name { name, ctx } => ExprKind::Name {
                name: name.clone(),
                ctx: *ctx,
            },
            ExprKind::Int(v) => ExprKind::Int(*v),
            ExprKind::Float(v) => ExprKind::Float(*v),
            ExprKind::Str(v) => ExprKind::Str(v.clone()),
            ExprKind::Bool(v) => ExprKind::Bool(*v),
            ExprKind::None => ExprKind::None,
            ExprKind::Tuple { elts, ctx } => ExprKind::Tuple {
                elts: elts.iter().map(|e| e.deep_copy(ids)).collect(),
                ctx: *ctx,
            },
            ExprKind::List { elts, ctx } => ExprKind::List {
                elts: elts.iter().map(|e| e.deep_copy(ids)).collect(),
                ctx: *ctx,
            },
            ExprKind::Dict { keys, values } => ExprKind::Dict {
                keys: keys
                    .iter()
                    .map(|k| k.as_ref().map(|k| k.deep_copy(ids)))
                    .collect(),
                values: values.iter().map(|v| v.deep_copy(ids)).collect(),
            },
            ExprKind::Attribute { value, attr, ctx } => ExprKind::Attribute {
                value: Box::new(value.deep_copy(ids)),
                attr: attr.clone(),
                ctx: *ctx,
            },
            ExprKind::Subscript { value, index, ctx } => ExprKind::Subscript {
                value: Box::new(value.deep_copy(ids)),
                index: Box::new(index.deep_copy(ids)),
                ctx: *ctx,
            },
            ExprKind::Call {
                func,
                args,
                keywords,
            } => ExprKind::Call {
                func: Box::new(func.deep_copy(ids)),
                args: args.iter().map(|a| a.deep_copy(ids)).collect(),
                keywords: keywords
                    .iter()
                    .map(|k| Keyword {
                        name: k.name.clone(),
                        value: k.value.deep_copy(ids),
                    })
                    .collect(),
            },
            ExprKind::Starred { value } => ExprKind::Starred {
                value: Box::new(value.deep_copy(ids)),
            },
            ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
                op: *op,
                values: values.iter().map(|v| v.deep_copy(ids)).collect(),
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op: *op,
                operand: Box::new(operand.deep_copy(ids)),
            },
            ExprKind::BinOp { left, op, right } => ExprKind::BinOp {
                left: Box::new(left.deep_copy(ids)),
                op: *op,
                right: Box::new(right.deep_copy(ids)),
            },
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => ExprKind::Compare {
                left: Box::new(left.deep_copy(ids)),
                ops: ops.clone(),
                comparators: comparators.iter().map(|c| c.deep_copy(ids)).collect(),
            },
            ExprKind::Lambda { params, body } => ExprKind::Lambda {
                params: Box::new(params.deep_copy(ids)),
                body: Box::new(body.deep_copy(ids)),
            },
        };
        Self {
            id: ids.next(),
            range: self.range,
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub range: TextRange,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    FunctionDef {
        name: String,
        params: Params,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOpKind,
        value: Expr,
    },
    Expr(Expr),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Pass,
    Break,
    Continue,
}

impl Stmt {
    pub fn new(ids: &mut NodeIds, range: TextRange, kind: StmtKind) -> Self {
        Self {
            id: ids.next(),
            range,
            kind,
        }
    }

    pub fn synth(ids: &mut NodeIds, kind: StmtKind) -> Self {
        Self::new(ids, TextRange::default(), kind)
    }

    pub fn assign(ids: &mut NodeIds, target: Expr, value: Expr) -> Self {
        Self::synth(
            ids,
            StmtKind::Assign {
                targets: vec![target],
                value,
            },
        )
    }

    pub fn expr(ids: &mut NodeIds, value: Expr) -> Self {
        Self::synth(ids, StmtKind::Expr(value))
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StmtKind::FunctionDef { .. } => "FunctionDef",
            StmtKind::Return(_) => "Return",
            StmtKind::Assign { .. } => "Assign",
            StmtKind::AugAssign { .. } => "AugAssign",
            StmtKind::Expr(_) => "Expr",
            StmtKind::If { .. } => "If",
            StmtKind::While { .. } => "While",
            StmtKind::For { .. } => "For",
            StmtKind::Global(_) => "Global",
            StmtKind::Nonlocal(_) => "Nonlocal",
            StmtKind::Pass => "Pass",
            StmtKind::Break => "Break",
            StmtKind::Continue => "Continue",
        }
    }

    pub fn deep_copy(&self, ids: &mut NodeIds) -> Self {
        let kind = match &self.kind {
            StmtKind::FunctionDef { name, params, body } => StmtKind::FunctionDef {
                name: name.clone(),
                params: params.deep_copy(ids),
                body: body.iter().map(|s| s.deep_copy(ids)).collect(),
            },
            StmtKind::Return(value) => {
                StmtKind::Return(value.as_ref().map(|v| v.deep_copy(ids)))
            }
            StmtKind::Assign { targets, value } => StmtKind::Assign {
                targets: targets.iter().map(|t| t.deep_copy(ids)).collect(),
                value: value.deep_copy(ids),
            },
            StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: target.deep_copy(ids),
                op: *op,
                value: value.deep_copy(ids),
            },
            StmtKind::Expr(value) => StmtKind::Expr(value.deep_copy(ids)),
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: test.deep_copy(ids),
                body: body.iter().map(|s| s.deep_copy(ids)).collect(),
                orelse: orelse.iter().map(|s| s.deep_copy(ids)).collect(),
            },
            StmtKind::While { test, body, orelse } => StmtKind::While {
                test: test.deep_copy(ids),
                body: body.iter().map(|s| s.deep_copy(ids)).collect(),
                orelse: orelse.iter().map(|s| s.deep_copy(ids)).collect(),
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => StmtKind::For {
                target: target.deep_copy(ids),
                iter: iter.deep_copy(ids),
                body: body.iter().map(|s| s.deep_copy(ids)).collect(),
                orelse: orelse.iter().map(|s| s.deep_copy(ids)).collect(),
            },
            StmtKind::Global(names) => StmtKind::Global(names.clone()),
            StmtKind::Nonlocal(names) => StmtKind::Nonlocal(names.clone()),
            StmtKind::Pass => StmtKind::Pass,
            StmtKind::Break => StmtKind::Break,
            StmtKind::Continue => StmtKind::Continue,
        };
        Self {
            id: ids.next(),
            range: self.range,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let mut ids = NodeIds::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn deep_copy_allocates_fresh_ids() {
        let mut ids = NodeIds::new();
        let original = Expr::name(&mut ids, "x", Ctx::Load);
        let copy = original.deep_copy(&mut ids);
        assert_ne!(original.id, copy.id);
        assert_eq!(copy.as_name(), Some("x"));
    }

    #[test]
    fn params_bound_names_cover_all_kinds() {
        let params = Params {
            args: vec![Param {
                name: "a".to_owned(),
                default: None,
            }],
            vararg: Some("rest".to_owned()),
            kwonlyargs: vec![Param {
                name: "k".to_owned(),
                default: None,
            }],
            kwarg: Some("kw".to_owned()),
        };
        assert_eq!(params.bound_names(), vec!["a", "rest", "k", "kw"]);
    }
}
