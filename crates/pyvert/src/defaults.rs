//! The pass-through overload: hooks that reproduce host semantics.
//!
//! Converting with these hooks should leave behavior observably unchanged,
//! which makes them both the reference implementation the tests compare
//! against and the base other overloads copy from when they only care about
//! one interception point.

use std::rc::Rc;

use crate::errors::{RunError, RunResult};
use crate::overload::Overload;
use crate::run::{Interp, iter_values};
use crate::value::{Kwargs, Value};

/// Read through a storage handle, unwrapping chained handles. Unassigned
/// storage is the variable-used-before-assignment error, attributed to the
/// innermost handle's name.
fn read_handle(value: &Value) -> RunResult<Value> {
    match value {
        Value::Handle(h) => {
            let h = h.borrow();
            match &h.val {
                Some(inner @ Value::Handle(_)) => read_handle(inner),
                Some(inner) => Ok(inner.clone()),
                None => Err(RunError::unbound_storage(&h.name)),
            }
        }
        other => Err(RunError::type_error(format!(
            "read expects a storage handle, got {}",
            other.type_name()
        ))),
    }
}

fn as_handle(value: &Value, hook: &str) -> RunResult<Rc<std::cell::RefCell<crate::value::Handle>>> {
    match value {
        Value::Handle(h) => Ok(Rc::clone(h)),
        other => Err(RunError::type_error(format!(
            "{hook} expects a storage handle, got {}",
            other.type_name()
        ))),
    }
}

fn call_thunk(interp: &mut Interp, thunk: &Value) -> RunResult<Value> {
    interp.call_value(thunk.clone(), Vec::new(), Kwargs::new())
}

/// An overload implementing every hook with the host's own semantics.
pub fn host_defaults() -> Rc<Overload> {
    Rc::new(Overload {
        name: "host_defaults",
        init: Some(Rc::new(|_interp: &mut Interp, name: &str| {
            Ok(Value::new_handle(name))
        })),
        assign: Some(Rc::new(|_interp, lhs: Value, rhs: Value| {
            let handle = as_handle(&lhs, "assign")?;
            handle.borrow_mut().val = Some(rhs);
            Ok(lhs)
        })),
        read: Some(Rc::new(|_interp, value: Value| read_handle(&value))),
        call: Some(Rc::new(
            |interp: &mut Interp, callee: Value, args: Vec<Value>, kwargs: Kwargs| {
                interp.call_value(callee, args, kwargs)
            },
        )),
        if_stmt: Some(Rc::new(
            |interp: &mut Interp, test, body, orelse, _writes| {
                if call_thunk(interp, &test)?.is_truthy() {
                    call_thunk(interp, &body)?;
                } else {
                    call_thunk(interp, &orelse)?;
                }
                Ok(Value::None)
            },
        )),
        while_stmt: Some(Rc::new(
            |interp: &mut Interp, test, body, orelse, _writes| {
                while call_thunk(interp, &test)?.is_truthy() {
                    call_thunk(interp, &body)?;
                }
                call_thunk(interp, &orelse)?;
                Ok(Value::None)
            },
        )),
        for_stmt: Some(Rc::new(
            |interp: &mut Interp, target, iter, body, orelse, _writes| {
                let handle = as_handle(&target, "for_stmt")?;
                for item in iter_values(&iter)? {
                    handle.borrow_mut().val = Some(item);
                    call_thunk(interp, &body)?;
                }
                call_thunk(interp, &orelse)?;
                Ok(Value::None)
            },
        )),
        // Like the host operators, these return the deciding operand, not a
        // bool.
        and_: Some(Rc::new(|interp: &mut Interp, first: Value, rest| {
            let mut current = first;
            for thunk in rest {
                if !current.is_truthy() {
                    break;
                }
                current = call_thunk(interp, &thunk)?;
            }
            Ok(current)
        })),
        or_: Some(Rc::new(|interp: &mut Interp, first: Value, rest| {
            let mut current = first;
            for thunk in rest {
                if current.is_truthy() {
                    break;
                }
                current = call_thunk(interp, &thunk)?;
            }
            Ok(current)
        })),
        not_: Some(Rc::new(|_interp, value: Value| {
            Ok(Value::Bool(!value.is_truthy()))
        })),
    })
}
