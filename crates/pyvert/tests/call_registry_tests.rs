use pyvert::{
    convert, rewriting_call, CallRegistry, ConvertError, Interp, Kwargs, Value,
};

const MODULE: &str = "\
def double(x):
    return x * 2
def triple(x):
    return x * 3
def apply(x):
    return double(x)
";

#[test]
fn registered_callees_are_swapped() {
    let mut interp = Interp::new();
    let env = interp.run_module(MODULE).unwrap();
    let double = env.get("double").unwrap();
    let triple = env.get("triple").unwrap();
    let apply = env.get("apply").unwrap();

    let registry = CallRegistry::new();
    registry.replaces(&double, triple).unwrap();
    let converted = convert(&mut interp, &apply, rewriting_call(&registry)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(4)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(12));
    // The original is untouched.
    let got = interp
        .call_value(apply, vec![Value::Int(4)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(8));
}

#[test]
fn unregistered_callees_pass_through() {
    let mut interp = Interp::new();
    let env = interp.run_module(MODULE).unwrap();
    let apply = env.get("apply").unwrap();

    let registry = CallRegistry::new();
    let converted = convert(&mut interp, &apply, rewriting_call(&registry)).unwrap();
    let got = interp
        .call_value(converted, vec![Value::Int(4)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(8));
}

#[test]
fn a_callee_can_only_be_replaced_once() {
    let mut interp = Interp::new();
    let env = interp.run_module(MODULE).unwrap();
    let double = env.get("double").unwrap();
    let triple = env.get("triple").unwrap();

    let registry = CallRegistry::new();
    registry.replaces(&double, triple.clone()).unwrap();
    let err = registry.replaces(&double, triple).unwrap_err();
    assert!(
        matches!(err, ConvertError::DuplicateReplacement { .. }),
        "got: {err}"
    );
}

#[test]
fn values_without_identity_cannot_be_replaced() {
    let registry = CallRegistry::new();
    let err = registry
        .replaces(&Value::Int(1), Value::Int(2))
        .unwrap_err();
    assert!(matches!(err, ConvertError::DuplicateReplacement { .. }));
}
