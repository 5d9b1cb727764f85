//! Static scope analysis for the variable pass.
//!
//! Builds a tree of function scopes recording, per scope, which names are
//! bound locally, declared `global`/`nonlocal`, or used free. The variable
//! pass asks one question of the result: should a given name in a given
//! scope be virtualized? Locals are; free and nonlocal names are exactly
//! when the scope that binds them is; everything else (module globals,
//! builtins) is not.

use ahash::AHashMap;
use indexmap::IndexSet;

use crate::ast::{Ctx, Expr, ExprKind, Keyword, NodeId, Stmt, StmtKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug)]
pub struct Scope {
    parent: Option<ScopeId>,
    /// Name of the function that opens this scope; empty for the root.
    pub func_name: String,
    /// Names bound in this scope, in binding order.
    pub locals: IndexSet<String>,
    /// Names read here without a local binding.
    pub free: IndexSet<String>,
    pub globals: IndexSet<String>,
    pub nonlocals: IndexSet<String>,
}

impl Scope {
    fn new(parent: Option<ScopeId>, func_name: &str) -> Self {
        Self {
            parent,
            func_name: func_name.to_string(),
            locals: IndexSet::new(),
            free: IndexSet::new(),
            globals: IndexSet::new(),
            nonlocals: IndexSet::new(),
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.globals.contains(name) || self.nonlocals.contains(name) {
            return;
        }
        self.free.shift_remove(name);
        self.locals.insert(name.to_string());
    }

    fn add_free(&mut self, name: &str) {
        if !self.locals.contains(name) {
            self.free.insert(name.to_string());
        }
    }

    fn add_global(&mut self, name: &str) {
        self.locals.shift_remove(name);
        self.globals.insert(name.to_string());
    }

    fn add_nonlocal(&mut self, name: &str) {
        self.locals.shift_remove(name);
        self.nonlocals.insert(name.to_string());
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }
}

/// The scope tree of one analyzed block.
#[derive(Debug, Default)]
pub struct Scopes {
    scopes: Vec<Scope>,
    /// `FunctionDef` statement id to the scope its body opens.
    by_node: AHashMap<NodeId, ScopeId>,
}

impl Scopes {
    /// Analyze a top-level block. The root scope stands in for the module
    /// namespace: its names are never virtualized.
    pub fn analyze(stmts: &[Stmt]) -> Self {
        let mut scopes = Self::default();
        let root = scopes.push(None, "");
        let mut analyzer = Analyzer {
            scopes: &mut scopes,
            stack: vec![root],
        };
        analyzer.block(stmts);
        scopes
    }

    fn push(&mut self, parent: Option<ScopeId>, func_name: &str) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope::new(parent, func_name));
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// The scope opened by a `def`, looked up by the statement's node id.
    pub fn of_function(&self, node: NodeId) -> Option<ScopeId> {
        self.by_node.get(&node).copied()
    }

    /// Whether reads and writes of `name` inside `scope` go through the
    /// overload. Free and nonlocal names defer to the scope that binds them.
    pub fn should_virtualize(&self, scope: ScopeId, name: &str) -> bool {
        let s = self.get(scope);
        if s.parent.is_none() {
            return false;
        }
        if s.locals.contains(name) {
            return true;
        }
        if s.nonlocals.contains(name) || s.free.contains(name) {
            return match s.parent {
                Some(parent) => self.should_virtualize(parent, name),
                None => false,
            };
        }
        false
    }
}

struct Analyzer<'a> {
    scopes: &'a mut Scopes,
    stack: Vec<ScopeId>,
}

impl Analyzer<'_> {
    fn current(&self) -> ScopeId {
        *self.stack.last().unwrap_or_else(|| unreachable!())
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef { name, params, body } => {
                // The def's name binds in the enclosing scope before the
                // body is analyzed, so recursive references resolve to it.
                let parent = self.current();
                self.scopes.get_mut(parent).add_local(name);
                for param in params.args.iter().chain(&params.kwonlyargs) {
                    if let Some(default) = &param.default {
                        self.expr(default);
                    }
                }
                let scope = self.scopes.push(Some(parent), name);
                self.scopes.by_node.insert(stmt.id, scope);
                for bound in params.bound_names() {
                    self.scopes.get_mut(scope).add_local(bound);
                }
                self.stack.push(scope);
                self.block(body);
                self.stack.pop();
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value);
                for target in targets {
                    self.expr(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value);
                self.expr(target);
            }
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(iter);
                self.expr(target);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::Global(names) => {
                let scope = self.current();
                for name in names {
                    self.scopes.get_mut(scope).add_global(name);
                }
            }
            StmtKind::Nonlocal(names) => {
                let scope = self.current();
                for name in names {
                    self.scopes.get_mut(scope).add_nonlocal(name);
                }
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name { name, ctx } => {
                let scope = self.current();
                match ctx {
                    Ctx::Store => self.scopes.get_mut(scope).add_local(name),
                    Ctx::Load | Ctx::Del => self.scopes.get_mut(scope).add_free(name),
                }
            }
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::None => {}
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                for elt in elts {
                    self.expr(elt);
                }
            }
            ExprKind::Dict { keys, values } => {
                for key in keys.iter().flatten() {
                    self.expr(key);
                }
                for value in values {
                    self.expr(value);
                }
            }
            ExprKind::Attribute { value, .. } | ExprKind::Starred { value } => self.expr(value),
            ExprKind::Subscript { value, index, .. } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
                for Keyword { value, .. } in keywords {
                    self.expr(value);
                }
            }
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    self.expr(value);
                }
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand),
            ExprKind::BinOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left);
                for comparator in comparators {
                    self.expr(comparator);
                }
            }
            // Lambdas do not open an analyzed scope; their bodies read from
            // the enclosing one.
            ExprKind::Lambda { body, .. } => self.expr(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeIds;
    use crate::parse::parse_block;

    fn analyze(src: &str) -> (Vec<Stmt>, Scopes) {
        let mut ids = NodeIds::new();
        let stmts = parse_block(src, &mut ids).unwrap();
        let scopes = Scopes::analyze(&stmts);
        (stmts, scopes)
    }

    fn function_scope(stmts: &[Stmt], scopes: &Scopes, name: &str) -> ScopeId {
        fn find(stmts: &[Stmt], scopes: &Scopes, name: &str) -> Option<ScopeId> {
            for stmt in stmts {
                if let StmtKind::FunctionDef { name: n, body, .. } = &stmt.kind {
                    if n == name {
                        return scopes.of_function(stmt.id);
                    }
                    if let Some(found) = find(body, scopes, name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(stmts, scopes, name).expect("function scope exists")
    }

    #[test]
    fn locals_include_params_and_assignments() {
        let (stmts, scopes) = analyze(
            "def f(a, b):\n    c = a + b\n    return c\n",
        );
        let scope = function_scope(&stmts, &scopes, "f");
        let s = scopes.get(scope);
        assert!(s.is_local("a"));
        assert!(s.is_local("c"));
        assert!(scopes.should_virtualize(scope, "c"));
    }

    #[test]
    fn free_names_are_not_virtualized_at_the_top() {
        let (stmts, scopes) = analyze("def f(x):\n    return x + g\n");
        let scope = function_scope(&stmts, &scopes, "f");
        assert!(scopes.get(scope).free.contains("g"));
        assert!(!scopes.should_virtualize(scope, "g"));
    }

    #[test]
    fn nested_free_names_follow_the_binding_scope() {
        let (stmts, scopes) = analyze(
            "def outer(x):\n    def inner():\n        return x\n    return inner\n",
        );
        let inner = function_scope(&stmts, &scopes, "inner");
        // `x` is local (and virtualized) in outer, so the inner use is too.
        assert!(scopes.should_virtualize(inner, "x"));
    }

    #[test]
    fn global_declarations_suppress_virtualization() {
        let (stmts, scopes) = analyze(
            "def f():\n    global counter\n    counter = 1\n    return counter\n",
        );
        let scope = function_scope(&stmts, &scopes, "f");
        assert!(!scopes.get(scope).is_local("counter"));
        assert!(!scopes.should_virtualize(scope, "counter"));
    }

    #[test]
    fn nonlocal_defers_to_the_binding_scope() {
        let (stmts, scopes) = analyze(
            "def outer():\n    n = 0\n    def bump():\n        nonlocal n\n        n = n + 1\n    return bump\n",
        );
        let bump = function_scope(&stmts, &scopes, "bump");
        assert!(!scopes.get(bump).is_local("n"));
        assert!(scopes.should_virtualize(bump, "n"));
    }

    #[test]
    fn store_before_load_keeps_a_name_local() {
        let (stmts, scopes) = analyze("def f():\n    x = 1\n    return x\n");
        let scope = function_scope(&stmts, &scopes, "f");
        assert!(scopes.get(scope).is_local("x"));
        assert!(!scopes.get(scope).free.contains("x"));
    }
}
