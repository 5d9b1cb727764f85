use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use pyvert::convert::{convert, convert_with_passes, Pass};
use pyvert::errors::RunError;
use pyvert::{host_defaults, Interp, Kwargs, Overload, Value};

fn storage_key(value: &Value, hook: &str) -> Result<String, RunError> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(RunError::type_error(format!(
            "{hook} expected a storage key, got {}",
            other.type_name()
        ))),
    }
}

/// An overload that keeps every variable in one shared map, keyed by name.
fn dict_storage(store: &Rc<RefCell<IndexMap<String, Value>>>) -> Rc<Overload> {
    let mut ov = Overload {
        name: "dict_storage",
        ..Overload::default()
    };
    ov.init = Some(Rc::new(|_interp: &mut Interp, name: &str| {
        Ok(Value::str(name))
    }));
    let s = Rc::clone(store);
    ov.assign = Some(Rc::new(move |_interp, lhs: Value, rhs: Value| {
        let key = storage_key(&lhs, "assign")?;
        s.borrow_mut().insert(key, rhs);
        Ok(lhs)
    }));
    let s = Rc::clone(store);
    ov.read = Some(Rc::new(move |_interp, value: Value| {
        let key = storage_key(&value, "read")?;
        s.borrow()
            .get(&key)
            .cloned()
            .ok_or_else(|| RunError::unbound_storage(&key))
    }));
    Rc::new(ov)
}

#[test]
fn variables_can_live_in_a_dict() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def poly(x):\n    a = x + 1\n    b = a * a\n    return b\n")
        .unwrap();
    let poly = env.get("poly").unwrap();
    let store = Rc::new(RefCell::new(IndexMap::new()));
    let converted = convert_with_passes(
        &mut interp,
        &poly,
        dict_storage(&store),
        &[Pass::Variables],
    )
    .unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(3)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(16));
    let store = store.borrow();
    assert_eq!(store.get("x"), Some(&Value::Int(3)));
    assert_eq!(store.get("a"), Some(&Value::Int(4)));
    assert_eq!(store.get("b"), Some(&Value::Int(16)));
}

#[test]
fn read_hooks_observe_every_load() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def add3(x):\n    return x + x + x\n")
        .unwrap();
    let add3 = env.get("add3").unwrap();
    let mut ov = (*host_defaults()).clone();
    let base = ov.read.clone().expect("host defaults implement read");
    let reads = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&reads);
    ov.read = Some(Rc::new(move |interp, value| {
        counter.set(counter.get() + 1);
        base(interp, value)
    }));
    let converted = convert(&mut interp, &add3, Rc::new(ov)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(2)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(6));
    assert_eq!(reads.get(), 3);
}

#[test]
fn conditionals_can_be_reversed() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def sign(x):\n    if x > 0:\n        r = 1\n    else:\n        r = 2\n    return r\n")
        .unwrap();
    let sign = env.get("sign").unwrap();
    let mut ov = (*host_defaults()).clone();
    ov.if_stmt = Some(Rc::new(
        |interp: &mut Interp, test, body, orelse, _writes| {
            let decided = interp.call_value(test, Vec::new(), Kwargs::new())?;
            let branch = if decided.is_truthy() { orelse } else { body };
            interp.call_value(branch, Vec::new(), Kwargs::new())
        },
    ));
    let converted = convert(&mut interp, &sign, Rc::new(ov)).unwrap();
    let got = interp
        .call_value(converted.clone(), vec![Value::Int(5)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(2));
    let got = interp
        .call_value(converted, vec![Value::Int(-5)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(1));
}

#[test]
fn or_can_be_made_eager() {
    let mut interp = Interp::new();
    let env = interp
        .run_module(
            "calls = 0\ndef bump():\n    global calls\n    calls = calls + 1\n    return 0\ndef f(x):\n    return x or bump()\n",
        )
        .unwrap();
    let f = env.get("f").unwrap();
    let mut ov = (*host_defaults()).clone();
    ov.or_ = Some(Rc::new(|interp: &mut Interp, first, rest| {
        let mut result = first;
        for thunk in rest {
            let value = interp.call_value(thunk, Vec::new(), Kwargs::new())?;
            if !result.is_truthy() {
                result = value;
            }
        }
        Ok(result)
    }));
    let converted = convert(&mut interp, &f, Rc::new(ov)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(1)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(1));
    // The eager hook evaluated the second operand despite the truthy first.
    assert_eq!(env.get("calls"), Some(Value::Int(1)));
}

#[test]
fn not_can_be_inverted() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def flip(x):\n    return not x\n")
        .unwrap();
    let flip = env.get("flip").unwrap();
    let mut ov = (*host_defaults()).clone();
    ov.not_ = Some(Rc::new(|_interp, value: Value| {
        Ok(Value::Bool(value.is_truthy()))
    }));
    let converted = convert(&mut interp, &flip, Rc::new(ov)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Bool(true)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Bool(true));
}

/// A staging hook: run the branch body in isolation, observe what it would
/// have written, and discard the writes.
#[test]
fn branch_writes_can_be_staged_and_discarded() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def stage(x):\n    r = 0\n    if x:\n        r = 5\n    return r\n")
        .unwrap();
    let stage = env.get("stage").unwrap();
    let mut ov = (*host_defaults()).clone();
    let staged = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&staged);
    ov.if_stmt = Some(Rc::new(
        move |interp: &mut Interp, test, body, _orelse, writes| {
            let decided = interp.call_value(test, Vec::new(), Kwargs::new())?;
            if decided.is_truthy() {
                let (after, _result) = interp.execute_isolated(body, &writes)?;
                sink.borrow_mut().extend(after);
            }
            Ok(Value::None)
        },
    ));
    let converted = convert(&mut interp, &stage, Rc::new(ov)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(1)], Kwargs::new())
        .unwrap();
    // The write to `r` was rolled back, but was visible to the hook.
    assert_eq!(got, Value::Int(0));
    assert_eq!(*staged.borrow(), vec![Value::Int(5)]);
}
