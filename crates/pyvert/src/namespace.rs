//! Lexical environments for the evaluator.
//!
//! An environment is a chain of frames. Each frame maps names to shared
//! cells, so closures captured from an enclosing function observe later
//! rebindings of the same variable. Module frames terminate the nonlocal
//! search; the builtins frame sits above every module.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// A shared, mutable variable cell.
pub type Cell = Rc<RefCell<Value>>;

#[derive(Debug)]
pub struct Frame {
    vars: RefCell<IndexMap<String, Cell>>,
    parent: Option<Env>,
    /// Module (and builtins) frames stop the `nonlocal`/free-variable walk.
    is_module: bool,
}

/// A handle onto one frame of an environment chain.
#[derive(Debug, Clone)]
pub struct Env {
    frame: Rc<Frame>,
}

impl Env {
    fn with_frame(parent: Option<Env>, is_module: bool) -> Self {
        Self {
            frame: Rc::new(Frame {
                vars: RefCell::new(IndexMap::new()),
                parent,
                is_module,
            }),
        }
    }

    /// The root frame holding builtin bindings.
    pub fn builtins() -> Self {
        Self::with_frame(None, true)
    }

    /// A module namespace under `parent` (normally the builtins frame).
    pub fn module(parent: &Env) -> Self {
        Self::with_frame(Some(parent.clone()), true)
    }

    /// A function-call frame under the defining environment.
    pub fn nested(parent: &Env) -> Self {
        Self::with_frame(Some(parent.clone()), false)
    }

    pub fn parent(&self) -> Option<&Env> {
        self.frame.parent.as_ref()
    }

    pub fn is_module(&self) -> bool {
        self.frame.is_module
    }

    pub fn same_frame(a: &Env, b: &Env) -> bool {
        Rc::ptr_eq(&a.frame, &b.frame)
    }

    /// Bind `name` in this frame, creating or overwriting its cell.
    pub fn define(&self, name: &str, value: Value) {
        self.frame
            .vars
            .borrow_mut()
            .insert(name.to_string(), Rc::new(RefCell::new(value)));
    }

    /// Assign through an existing cell in this frame, or create one.
    pub fn set_local(&self, name: &str, value: Value) {
        let mut vars = self.frame.vars.borrow_mut();
        if let Some(cell) = vars.get(name) {
            *cell.borrow_mut() = value;
        } else {
            vars.insert(name.to_string(), Rc::new(RefCell::new(value)));
        }
    }

    /// The cell bound to `name` in this frame only.
    pub fn local_cell(&self, name: &str) -> Option<Cell> {
        self.frame.vars.borrow().get(name).cloned()
    }

    /// Walk this frame and its ancestors for `name`.
    pub fn find_cell(&self, name: &str) -> Option<Cell> {
        let mut env = Some(self);
        while let Some(e) = env {
            if let Some(cell) = e.local_cell(name) {
                return Some(cell);
            }
            env = e.parent();
        }
        None
    }

    /// Walk enclosing function frames for `name`, stopping at the first
    /// module frame. This is the `nonlocal` resolution rule.
    pub fn find_enclosing_cell(&self, name: &str) -> Option<Cell> {
        let mut env = self.parent();
        while let Some(e) = env {
            if e.is_module() {
                return None;
            }
            if let Some(cell) = e.local_cell(name) {
                return Some(cell);
            }
            env = e.parent();
        }
        None
    }

    /// The nearest module frame at or above this one.
    pub fn module_env(&self) -> Env {
        let mut env = self.clone();
        loop {
            if env.is_module() {
                return env;
            }
            match env.parent() {
                Some(parent) => env = parent.clone(),
                None => return env,
            }
        }
    }

    /// Does `name` resolve to a cell below the first module frame? Used to
    /// decide which free variables of a converted function must be re-aimed
    /// at the original's closure cells.
    pub fn resolves_below_module(&self, name: &str) -> bool {
        let mut env = Some(self);
        while let Some(e) = env {
            if e.is_module() {
                return false;
            }
            if e.local_cell(name).is_some() {
                return true;
            }
            env = e.parent();
        }
        false
    }

    /// Replace the cell bound to `name` in this frame with `cell`, so the
    /// binding aliases storage owned elsewhere.
    pub fn adopt_cell(&self, name: &str, cell: Cell) {
        self.frame.vars.borrow_mut().insert(name.to_string(), cell);
    }

    /// Names bound in this frame, in insertion order.
    pub fn local_names(&self) -> Vec<String> {
        self.frame.vars.borrow().keys().cloned().collect()
    }

    /// Every name visible from this frame, innermost first.
    pub fn names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let mut env = Some(self);
        while let Some(e) = env {
            for name in e.frame.vars.borrow().keys() {
                if !seen.contains(name) {
                    seen.push(name.clone());
                }
            }
            env = e.parent();
        }
        seen
    }

    /// Convenience lookup returning a clone of the bound value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.find_cell(name).map(|cell| cell.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_shared_across_frames() {
        let builtins = Env::builtins();
        let module = Env::module(&builtins);
        module.define("x", Value::Int(1));
        let inner = Env::nested(&module);
        let cell = inner.find_cell("x").unwrap();
        *cell.borrow_mut() = Value::Int(2);
        assert_eq!(module.get("x"), Some(Value::Int(2)));
    }

    #[test]
    fn enclosing_search_stops_at_module() {
        let builtins = Env::builtins();
        let module = Env::module(&builtins);
        module.define("g", Value::Int(10));
        let outer = Env::nested(&module);
        outer.define("f", Value::Int(20));
        let inner = Env::nested(&outer);
        assert!(inner.find_enclosing_cell("f").is_some());
        assert!(inner.find_enclosing_cell("g").is_none());
        assert!(inner.find_cell("g").is_some());
    }

    #[test]
    fn below_module_resolution() {
        let builtins = Env::builtins();
        let module = Env::module(&builtins);
        module.define("top", Value::Int(0));
        let frame = Env::nested(&module);
        frame.define("captured", Value::Int(1));
        let call = Env::nested(&frame);
        assert!(call.resolves_below_module("captured"));
        assert!(!call.resolves_below_module("top"));
        assert!(!call.resolves_below_module("missing"));
    }

    #[test]
    fn adopt_cell_aliases_foreign_storage() {
        let builtins = Env::builtins();
        let a = Env::module(&builtins);
        let b = Env::module(&builtins);
        a.define("v", Value::Int(5));
        b.define("v", Value::None);
        b.adopt_cell("v", a.local_cell("v").unwrap());
        *b.find_cell("v").unwrap().borrow_mut() = Value::Int(9);
        assert_eq!(a.get("v"), Some(Value::Int(9)));
    }
}
