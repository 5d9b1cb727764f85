//! Runtime values for the evaluator.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::ast::{Params, Stmt};
use crate::errors::{RunError, RunResult};
use crate::namespace::Env;
use crate::overload::Overload;

/// Keyword arguments of a call, in declaration order.
pub type Kwargs = IndexMap<String, Value>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<Vec<Value>>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<IndexMap<DictKey, Value>>>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    Method(Rc<BoundMethod>),
    /// A virtualized storage cell handed out by an overload's `init` hook.
    Handle(Rc<RefCell<Handle>>),
    /// An overload module bound into a generated wrapper.
    Overload(Rc<Overload>),
}

/// Boxed storage for one virtualized variable. Unassigned until the first
/// `assign`; reading it before that is an unbound-storage error.
#[derive(Debug)]
pub struct Handle {
    pub name: String,
    pub val: Option<Value>,
}

impl Handle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            val: None,
        }
    }
}

/// A user-defined function value.
///
/// Everything the evaluator needs at call time is resolved when the `def`
/// executes: parameter defaults are evaluated, the defining environment is
/// captured, and the body's binding structure is analyzed once.
pub struct Function {
    pub name: String,
    pub params: Params,
    pub body: Rc<Vec<Stmt>>,
    /// Defining environment (lexical, not the call stack).
    pub env: Env,
    /// Evaluated defaults for positional parameters, aligned with
    /// `params.args`.
    pub defaults: Vec<Option<Value>>,
    /// Evaluated defaults for keyword-only parameters.
    pub kw_defaults: Vec<Option<Value>>,
    /// Names assigned somewhere in the body (and parameters), minus
    /// `global`/`nonlocal` declarations.
    pub local_names: AHashSet<String>,
    pub global_names: AHashSet<String>,
    pub nonlocal_names: AHashSet<String>,
    /// Names captured from enclosing function scopes, in first-use order.
    pub free_names: Vec<String>,
    /// Whole-line source slice covering the `def`, when the defining source
    /// is known. This is what entity extraction starts from.
    pub snippet: Option<String>,
    /// Source text of the module the function was defined in; inherited by
    /// nested definitions.
    pub module_source: Option<Rc<str>>,
}

/// A native function exposed to evaluated code.
pub struct Builtin {
    pub name: String,
    #[expect(clippy::type_complexity)]
    pub call: Box<dyn Fn(&mut crate::run::Interp, Vec<Value>, Kwargs) -> RunResult<Value>>,
}

impl Builtin {
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&mut crate::run::Interp, Vec<Value>, Kwargs) -> RunResult<Value> + 'static,
    ) -> Value {
        Value::Builtin(Rc::new(Self {
            name: name.into(),
            call: Box::new(call),
        }))
    }
}

/// A method bound to its receiver (`some_list.append`).
pub struct BoundMethod {
    pub recv: Value,
    pub name: String,
}

/// Hashable subset of values usable as dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> RunResult<Self> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Str(s) => Ok(Self::Str(Rc::clone(s))),
            other => Err(RunError::type_error(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Str(Rc::clone(s)),
        }
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    pub fn tuple(values: Vec<Self>) -> Self {
        Self::Tuple(Rc::new(values))
    }

    pub fn list(values: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(values)))
    }

    pub fn new_handle(name: &str) -> Self {
        Self::Handle(Rc::new(RefCell::new(Handle::new(name))))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Method(_) => "builtin_function_or_method",
            Self::Handle(_) => "handle",
            Self::Overload(_) => "overload",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Dict(d) => !d.borrow().is_empty(),
            Self::Function(_)
            | Self::Builtin(_)
            | Self::Method(_)
            | Self::Handle(_)
            | Self::Overload(_) => true,
        }
    }

    /// Stable identity for reference types, used by the call-replacement
    /// registry. Value types have no identity.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Function(f) => Some(Rc::as_ptr(f) as usize),
            Self::Builtin(b) => Some(Rc::as_ptr(b) as usize),
            Self::List(l) => Some(Rc::as_ptr(l) as usize),
            Self::Dict(d) => Some(Rc::as_ptr(d) as usize),
            Self::Handle(h) => Some(Rc::as_ptr(h) as usize),
            Self::Overload(o) => Some(Rc::as_ptr(o) as usize),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            #[expect(clippy::cast_precision_loss)]
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Self::Dict(a), Self::Dict(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => Rc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => Rc::ptr_eq(a, b),
            (Self::Handle(a), Self::Handle(b)) => Rc::ptr_eq(a, b),
            (Self::Overload(a), Self::Overload(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(t) => {
                write!(f, "(")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                if t.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Self::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, "]")
            }
            Self::Dict(d) => {
                write!(f, "{{")?;
                for (i, (k, v)) in d.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {v:?}", k.to_value())?;
                }
                write!(f, "}}")
            }
            Self::Function(func) => write!(f, "<function {}>", func.name),
            Self::Builtin(b) => write!(f, "<builtin {}>", b.name),
            Self::Method(m) => write!(f, "<method {} of {}>", m.name, m.recv.type_name()),
            Self::Handle(h) => {
                let h = h.borrow();
                match &h.val {
                    Some(v) => write!(f, "<handle {}={v:?}>", h.name),
                    None => write!(f, "<handle {} unbound>", h.name),
                }
            }
            Self::Overload(_) => write!(f, "<overload>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_host_semantics() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::tuple(vec![Value::None]).is_truthy());
    }

    #[test]
    fn structural_equality_for_containers() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(a, b);
        assert_ne!(a, Value::list(vec![Value::Int(2)]));
    }

    #[test]
    fn numeric_cross_type_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
    }
}
