//! Write-set analysis for control-flow constructs.
//!
//! Control-flow hooks receive, alongside the block thunks, the storage every
//! block may write. This analysis walks a block and records, per `if`,
//! `while`, and `for` statement, the qualified names its blocks assign.
//! Already-virtualized writes (calls to the overload symbol's `assign`) count
//! too, so the analysis gives the same answer before and after the variable
//! pass has run.
//!
//! Names handed out by the conversion's [`Namer`] are excluded: they are
//! rewrite plumbing (unpacking temporaries, fresh loop variables), not the
//! entity's storage, and may not even be bound yet where the hook call
//! evaluates its write tuple.
//!
//! Function bodies are scope boundaries: a nested `def` writes its own name
//! into the enclosing block, but nothing inside it does.

use indexmap::IndexSet;

use crate::anno::Annotations;
use crate::ast::{Expr, ExprKind, Stmt, StmtKind};
use crate::naming::Namer;
use crate::qual_names::QualName;

/// Analyze `stmts`, storing a write set for every control-flow construct
/// into `anno`. `overload_symbol` is the bound overload's name, used to
/// recognize virtualized assignments.
pub fn resolve(stmts: &[Stmt], overload_symbol: &str, namer: &Namer, anno: &mut Annotations) {
    let mut collector = Collector {
        overload_symbol,
        namer,
    };
    collector.block(stmts, anno);
}

struct Collector<'a> {
    overload_symbol: &'a str,
    namer: &'a Namer,
}

impl Collector<'_> {
    fn block(&mut self, stmts: &[Stmt], anno: &mut Annotations) -> IndexSet<QualName> {
        let mut writes = IndexSet::new();
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::FunctionDef { name, .. } => {
                    if !self.namer.generated(name) {
                        writes.insert(QualName::name(name.clone()));
                    }
                }
                StmtKind::Assign { targets, .. } => {
                    for target in targets {
                        self.target(target, &mut writes);
                    }
                }
                StmtKind::AugAssign { target, .. } => self.target(target, &mut writes),
                StmtKind::Expr(expr) => {
                    if let Some(name) = self.virtualized_write(expr) {
                        writes.insert(name);
                    }
                }
                StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                    let mut inner = self.block(body, anno);
                    inner.extend(self.block(orelse, anno));
                    anno.set_writes(stmt.id, inner.clone());
                    writes.extend(inner);
                }
                StmtKind::For {
                    target,
                    body,
                    orelse,
                    ..
                } => {
                    let mut inner = IndexSet::new();
                    self.target(target, &mut inner);
                    inner.extend(self.block(body, anno));
                    inner.extend(self.block(orelse, anno));
                    anno.set_writes(stmt.id, inner.clone());
                    writes.extend(inner);
                }
                StmtKind::Return(_)
                | StmtKind::Global(_)
                | StmtKind::Nonlocal(_)
                | StmtKind::Pass
                | StmtKind::Break
                | StmtKind::Continue => {}
            }
        }
        writes
    }

    fn target(&self, target: &Expr, writes: &mut IndexSet<QualName>) {
        match &target.kind {
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                for elt in elts {
                    self.target(elt, writes);
                }
            }
            ExprKind::Starred { value } => self.target(value, writes),
            _ => {
                if let Some(name) = QualName::from_expr(target) {
                    if !self.namer.generated(name.root()) {
                        writes.insert(name);
                    }
                }
            }
        }
    }

    /// Matches `<overload_symbol>.assign(name, …)` and returns the written name.
    fn virtualized_write(&self, expr: &Expr) -> Option<QualName> {
        let ExprKind::Call { func, args, .. } = &expr.kind else {
            return None;
        };
        let ExprKind::Attribute { value, attr, .. } = &func.kind else {
            return None;
        };
        if attr != "assign" || value.as_name() != Some(self.overload_symbol) {
            return None;
        }
        QualName::from_expr(args.first()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeIds;
    use crate::parse::parse_block;

    fn writes_with_namer(src: &str, kind: &str, namer: &Namer) -> Vec<String> {
        let mut ids = NodeIds::new();
        let stmts = parse_block(src, &mut ids).unwrap();
        let mut anno = Annotations::default();
        resolve(&stmts, "overload", namer, &mut anno);
        fn find(stmts: &[Stmt], kind: &str, anno: &Annotations) -> Option<Vec<String>> {
            for stmt in stmts {
                if stmt.kind_name() == kind {
                    return Some(
                        anno.writes(stmt.id)
                            .map(|w| w.iter().map(ToString::to_string).collect())
                            .unwrap_or_default(),
                    );
                }
                if let StmtKind::FunctionDef { body, .. } = &stmt.kind {
                    if let Some(found) = find(body, kind, anno) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(&stmts, kind, &anno).expect("construct present")
    }

    fn writes_of(src: &str, kind: &str) -> Vec<String> {
        writes_with_namer(src, kind, &Namer::default())
    }

    #[test]
    fn if_writes_cover_both_branches() {
        let writes = writes_of(
            "def f(c):\n    if c:\n        x = 1\n    else:\n        y = 2\n    return 0\n",
            "If",
        );
        assert_eq!(writes, vec!["x", "y"]);
    }

    #[test]
    fn method_calls_are_not_writes() {
        let writes = writes_of(
            "def f(items):\n    while items:\n        items.pop()\n        seen = 1\n",
            "While",
        );
        assert_eq!(writes, vec!["seen"]);
    }

    #[test]
    fn for_targets_count_as_writes() {
        let writes = writes_of(
            "def f(pairs):\n    for a, b in pairs:\n        total = a + b\n",
            "For",
        );
        assert_eq!(writes, vec!["a", "b", "total"]);
    }

    #[test]
    fn virtualized_assignments_are_recognized() {
        let writes = writes_of(
            "def f(c):\n    if c:\n        overload.assign(x, 1)\n",
            "If",
        );
        assert_eq!(writes, vec!["x"]);
    }

    #[test]
    fn generated_temporaries_are_excluded() {
        use ahash::AHashSet;
        let mut namer = Namer::new([]);
        let tmp = namer.new_symbol("unpacked", &AHashSet::new());
        assert_eq!(tmp, "unpacked");
        let writes = writes_with_namer(
            "def f(c):\n    while c:\n        unpacked = (c, 1)\n        overload.assign(x, unpacked[0])\n",
            "While",
            &namer,
        );
        assert_eq!(writes, vec!["x"]);
    }

    #[test]
    fn nested_defs_contribute_only_their_name() {
        let writes = writes_of(
            "def f(c):\n    if c:\n        def helper():\n            hidden = 1\n            return hidden\n",
            "If",
        );
        assert_eq!(writes, vec!["helper"]);
    }

    #[test]
    fn nested_constructs_roll_up() {
        let writes = writes_of(
            "def f(c, items):\n    while c:\n        for i in items:\n            acc = i\n        c = acc\n",
            "While",
        );
        assert_eq!(writes, vec!["i", "acc", "c"]);
    }
}
