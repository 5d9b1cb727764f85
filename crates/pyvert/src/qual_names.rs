//! Structural names for storage locations.
//!
//! A qualified name is the path a read or write refers to: a plain name, an
//! attribute chain, or a subscript with a literal index. The activity
//! analysis keys its write sets on these, so equality and hashing are
//! structural rather than positional.

use std::fmt::{self, Display};

use crate::ast::{Ctx, Expr, ExprKind, NodeIds};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexLit {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QualName {
    Name(String),
    Attr(Box<QualName>, String),
    Index(Box<QualName>, IndexLit),
}

impl QualName {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Parses a qualified name out of an expression, if it has the right
    /// shape. Subscripts only qualify when the index is a literal.
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match &expr.kind {
            ExprKind::Name { name, .. } => Some(Self::Name(name.clone())),
            ExprKind::Attribute { value, attr, .. } => {
                let base = Self::from_expr(value)?;
                Some(Self::Attr(Box::new(base), attr.clone()))
            }
            ExprKind::Subscript { value, index, .. } => {
                let base = Self::from_expr(value)?;
                let lit = match &index.kind {
                    ExprKind::Int(v) => IndexLit::Int(*v),
                    ExprKind::Str(v) => IndexLit::Str(v.clone()),
                    _ => return None,
                };
                Some(Self::Index(Box::new(base), lit))
            }
            _ => None,
        }
    }

    /// Renders the path back into a load-context expression.
    pub fn to_expr(&self, ids: &mut NodeIds) -> Expr {
        match self {
            Self::Name(name) => Expr::name(ids, name.clone(), Ctx::Load),
            Self::Attr(base, attr) => {
                let value = base.to_expr(ids);
                Expr::attribute(ids, value, attr.clone())
            }
            Self::Index(base, lit) => {
                let value = base.to_expr(ids);
                let index = match lit {
                    IndexLit::Int(v) => Expr::synth(ids, ExprKind::Int(*v)),
                    IndexLit::Str(v) => Expr::str_lit(ids, v.clone()),
                };
                Expr::subscript(ids, value, index, Ctx::Load)
            }
        }
    }

    /// The leftmost plain name of the path.
    pub fn root(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Attr(base, _) | Self::Index(base, _) => base.root(),
        }
    }
}

impl Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Attr(base, attr) => write!(f, "{base}.{attr}"),
            Self::Index(base, IndexLit::Int(v)) => write!(f, "{base}[{v}]"),
            Self::Index(base, IndexLit::Str(v)) => write!(f, "{base}[{v:?}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_block;
    use crate::ast::StmtKind;

    fn parse_expr(src: &str) -> (Expr, NodeIds) {
        let mut ids = NodeIds::new();
        let stmts = parse_block(src, &mut ids).unwrap();
        let StmtKind::Expr(expr) = stmts.into_iter().next().unwrap().kind else {
            panic!("expected expression statement");
        };
        (expr, ids)
    }

    #[test]
    fn parses_attribute_and_subscript_chains() {
        let (expr, _) = parse_expr("a.b[0].c\n");
        let qn = QualName::from_expr(&expr).unwrap();
        assert_eq!(qn.to_string(), "a.b[0].c");
        assert_eq!(qn.root(), "a");
    }

    #[test]
    fn rejects_dynamic_subscripts() {
        let (expr, _) = parse_expr("a[i]\n");
        assert_eq!(QualName::from_expr(&expr), None);
    }

    #[test]
    fn round_trips_through_expressions() {
        let (expr, mut ids) = parse_expr("a.b[1]\n");
        let qn = QualName::from_expr(&expr).unwrap();
        let rendered = qn.to_expr(&mut ids);
        assert_eq!(QualName::from_expr(&rendered), Some(qn));
    }
}
