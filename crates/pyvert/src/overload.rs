//! Overload modules: the pluggable hooks that virtualized code routes
//! through.
//!
//! An [`Overload`] carries one optional hook per interception point. Which
//! hooks are present decides both what the rewrite passes virtualize and what
//! the evaluator dispatches at run time; an absent hook leaves the construct
//! untouched.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::errors::{ConvertError, ConvertResult, RunResult};
use crate::run::Interp;
use crate::value::{Kwargs, Value};

pub type InitHook = Rc<dyn Fn(&mut Interp, &str) -> RunResult<Value>>;
pub type AssignHook = Rc<dyn Fn(&mut Interp, Value, Value) -> RunResult<Value>>;
pub type UnaryHook = Rc<dyn Fn(&mut Interp, Value) -> RunResult<Value>>;
pub type CallHook = Rc<dyn Fn(&mut Interp, Value, Vec<Value>, Kwargs) -> RunResult<Value>>;
/// `(test, body, orelse, writes)` for `if`/`while`; all three blocks arrive
/// as zero-argument functions.
pub type CondHook = Rc<dyn Fn(&mut Interp, Value, Value, Value, Vec<Value>) -> RunResult<Value>>;
/// `(target, iter, body, orelse, writes)`; `target` is the storage the loop
/// variable was initialized into.
pub type ForHook =
    Rc<dyn Fn(&mut Interp, Value, Value, Value, Value, Vec<Value>) -> RunResult<Value>>;
/// `(first, rest)` where `rest` holds zero-argument thunks for the
/// short-circuited operands.
pub type BoolOpHook = Rc<dyn Fn(&mut Interp, Value, Vec<Value>) -> RunResult<Value>>;

/// A set of interception hooks. Every field is optional; construct one with
/// struct update syntax from [`Overload::default`] and fill in what the
/// overload cares about.
#[derive(Default, Clone)]
pub struct Overload {
    pub name: &'static str,
    pub init: Option<InitHook>,
    pub assign: Option<AssignHook>,
    pub read: Option<UnaryHook>,
    pub call: Option<CallHook>,
    pub if_stmt: Option<CondHook>,
    pub while_stmt: Option<CondHook>,
    pub for_stmt: Option<ForHook>,
    pub and_: Option<BoolOpHook>,
    pub or_: Option<BoolOpHook>,
    pub not_: Option<UnaryHook>,
}

impl Overload {
    /// True when the overload virtualizes variable storage at all.
    pub fn handles_variables(&self) -> bool {
        self.init.is_some() && self.assign.is_some()
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks = Vec::new();
        macro_rules! present {
            ($($field:ident),*) => {
                $(if self.$field.is_some() {
                    hooks.push(stringify!($field));
                })*
            };
        }
        present!(init, assign, read, call, if_stmt, while_stmt, for_stmt, and_, or_, not_);
        f.debug_struct("Overload")
            .field("name", &self.name)
            .field("hooks", &hooks)
            .finish()
    }
}

/// Maps function identities to their staged replacements.
///
/// Registrations key on object identity, so two distinct functions with equal
/// bodies stay distinct. Registering the same function twice is an error.
#[derive(Default)]
pub struct CallRegistry {
    replacements: RefCell<AHashMap<usize, Value>>,
}

impl CallRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn replaces(&self, original: &Value, replacement: Value) -> ConvertResult<()> {
        let Some(id) = original.identity() else {
            return Err(ConvertError::DuplicateReplacement {
                original: format!("{original:?} has no identity"),
            });
        };
        let mut map = self.replacements.borrow_mut();
        if map.contains_key(&id) {
            return Err(ConvertError::DuplicateReplacement {
                original: format!("{original:?}"),
            });
        }
        map.insert(id, replacement);
        Ok(())
    }

    pub fn replacement_for(&self, callee: &Value) -> Option<Value> {
        let id = callee.identity()?;
        self.replacements.borrow().get(&id).cloned()
    }
}

/// An overload that only intercepts calls, swapping registered functions for
/// their replacements and calling everything else unchanged.
pub fn rewriting_call(registry: &Rc<CallRegistry>) -> Rc<Overload> {
    let registry = Rc::clone(registry);
    Rc::new(Overload {
        name: "rewriting_call",
        call: Some(Rc::new(
            move |interp: &mut Interp, callee: Value, args: Vec<Value>, kwargs: Kwargs| {
                let target = registry.replacement_for(&callee).unwrap_or(callee);
                interp.call_value(target, args, kwargs)
            },
        )),
        ..Overload::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_double_registration() {
        let registry = CallRegistry::new();
        let f = Value::list(vec![]);
        let g = Value::list(vec![]);
        registry.replaces(&f, g.clone()).unwrap();
        let err = registry.replaces(&f, g).unwrap_err();
        assert!(matches!(err, ConvertError::DuplicateReplacement { .. }));
    }

    #[test]
    fn registry_keys_on_identity_not_structure() {
        let registry = CallRegistry::new();
        let f = Value::list(vec![Value::Int(1)]);
        let twin = Value::list(vec![Value::Int(1)]);
        registry.replaces(&f, Value::Int(7)).unwrap();
        assert_eq!(registry.replacement_for(&f), Some(Value::Int(7)));
        assert_eq!(registry.replacement_for(&twin), None);
    }

    #[test]
    fn debug_lists_present_hooks() {
        let overload = Overload {
            name: "probe",
            read: Some(Rc::new(|_, v| Ok(v))),
            ..Overload::default()
        };
        let repr = format!("{overload:?}");
        assert!(repr.contains("read"));
        assert!(!repr.contains("if_stmt"));
    }
}
