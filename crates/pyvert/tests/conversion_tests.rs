use pretty_assertions::assert_eq;
use pyvert::{
    convert, host_defaults, ConvertError, Interp, Kwargs, RunErrorKind, Value,
};

/// Run `source` as a module, convert `name` with the pass-through overload,
/// and return both the original and the converted function.
fn converted_pair(interp: &mut Interp, source: &str, name: &str) -> (Value, Value) {
    let env = interp.run_module(source).expect("module runs");
    let original = env.get(name).expect("function defined");
    let converted = convert(interp, &original, host_defaults()).expect("conversion succeeds");
    (original, converted)
}

fn call(interp: &mut Interp, func: &Value, args: Vec<Value>) -> Value {
    interp
        .call_value(func.clone(), args, Kwargs::new())
        .expect("call succeeds")
}

#[test]
fn arithmetic_round_trips() {
    let mut interp = Interp::new();
    let (original, converted) = converted_pair(
        &mut interp,
        "def poly(x):\n    a = x + 1\n    b = a * a\n    return b - x\n",
        "poly",
    );
    for n in [-3, 0, 7] {
        let want = call(&mut interp, &original, vec![Value::Int(n)]);
        let got = call(&mut interp, &converted, vec![Value::Int(n)]);
        assert_eq!(got, want);
    }
}

#[test]
fn while_loops_round_trip() {
    let mut interp = Interp::new();
    let (original, converted) = converted_pair(
        &mut interp,
        "def fib(n):\n    a = 0\n    b = 1\n    i = 0\n    while i < n:\n        a, b = b, a + b\n        i = i + 1\n    return a\n",
        "fib",
    );
    let want = call(&mut interp, &original, vec![Value::Int(12)]);
    let got = call(&mut interp, &converted, vec![Value::Int(12)]);
    assert_eq!(got, want);
    assert_eq!(got, Value::Int(144));
}

#[test]
fn for_loops_over_builtin_range_round_trip() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def triangle(n):\n    total = 0\n    for i in range(n + 1):\n        total = total + i\n    return total\n",
        "triangle",
    );
    assert_eq!(call(&mut interp, &converted, vec![Value::Int(4)]), Value::Int(10));
}

#[test]
fn tuple_targets_in_for_loops_round_trip() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def dot(pairs):\n    total = 0\n    for a, b in pairs:\n        total = total + a * b\n    return total\n",
        "dot",
    );
    let pairs = Value::list(vec![
        Value::tuple(vec![Value::Int(1), Value::Int(2)]),
        Value::tuple(vec![Value::Int(3), Value::Int(4)]),
    ]);
    assert_eq!(call(&mut interp, &converted, vec![pairs]), Value::Int(14));
}

#[test]
fn tuple_targets_over_an_empty_iterable_round_trip() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def dot(pairs):\n    total = 0\n    for a, b in pairs:\n        total = total + a * b\n    return total\n",
        "dot",
    );
    // Zero iterations: the unpacking machinery never runs, the accumulator
    // keeps its initial value.
    let got = call(&mut interp, &converted, vec![Value::list(vec![])]);
    assert_eq!(got, Value::Int(0));
}

#[test]
fn loop_variable_is_unbound_after_zero_iterations() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def last(items):\n    for i in items:\n        t = i\n    return i\n",
        "last",
    );
    let err = interp
        .call_value(converted, vec![Value::list(vec![])], Kwargs::new())
        .unwrap_err();
    assert_eq!(err.kind, RunErrorKind::UnboundStorage);
    assert!(err.message.contains("'i'"), "got: {err}");
}

#[test]
fn parameter_defaults_survive() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def scale(a, b=10, factor=1):\n    return (a + b) * factor\n",
        "scale",
    );
    assert_eq!(call(&mut interp, &converted, vec![Value::Int(2)]), Value::Int(12));
    let got = call(
        &mut interp,
        &converted,
        vec![Value::Int(2), Value::Int(10), Value::Int(3)],
    );
    assert_eq!(got, Value::Int(36));
}

#[test]
fn converting_a_function_that_returns_a_closure() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def make_adder(n):\n    def add(x):\n        return x + n\n    return add\n",
        "make_adder",
    );
    let adder = call(&mut interp, &converted, vec![Value::Int(5)]);
    assert_eq!(call(&mut interp, &adder, vec![Value::Int(3)]), Value::Int(8));
}

#[test]
fn recursion_through_the_module_binding() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def fact(n):\n    r = 1\n    if n > 1:\n        r = n * fact(n - 1)\n    return r\n",
        "fact",
    );
    assert_eq!(call(&mut interp, &converted, vec![Value::Int(5)]), Value::Int(120));
}

#[test]
fn boolean_operators_still_return_operands() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def pick(a, b):\n    return a or b\n",
        "pick",
    );
    let got = call(
        &mut interp,
        &converted,
        vec![Value::None, Value::str("fallback")],
    );
    assert_eq!(got, Value::str("fallback"));
    let got = call(
        &mut interp,
        &converted,
        vec![Value::Int(3), Value::str("fallback")],
    );
    assert_eq!(got, Value::Int(3));
}

#[test]
fn and_stays_lazy_under_the_default_hooks() {
    let mut interp = Interp::new();
    let env = interp
        .run_module(
            "calls = 0\ndef bump():\n    global calls\n    calls = calls + 1\n    return 7\ndef f(x):\n    return x and bump()\n",
        )
        .unwrap();
    let f = env.get("f").unwrap();
    let converted = convert(&mut interp, &f, host_defaults()).unwrap();

    // Falsy first operand: the thunk for the second is never invoked.
    let got = call(&mut interp, &converted, vec![Value::Int(0)]);
    assert_eq!(got, Value::Int(0));
    assert_eq!(env.get("calls"), Some(Value::Int(0)));

    // Truthy first operand: exactly one invocation, result is the operand.
    let got = call(&mut interp, &converted, vec![Value::Int(1)]);
    assert_eq!(got, Value::Int(7));
    assert_eq!(env.get("calls"), Some(Value::Int(1)));
}

#[test]
fn calls_with_star_arguments_round_trip() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def spread(args):\n    return max3(*args)\ndef max3(a, b, c):\n    m = a\n    if b > m:\n        m = b\n    if c > m:\n        m = c\n    return m\n",
        "spread",
    );
    let args = Value::tuple(vec![Value::Int(2), Value::Int(9), Value::Int(4)]);
    assert_eq!(call(&mut interp, &converted, vec![args]), Value::Int(9));
}

#[test]
fn unbound_local_reads_report_unbound_storage() {
    let mut interp = Interp::new();
    let (_, converted) = converted_pair(
        &mut interp,
        "def f(flag):\n    if flag:\n        x = 1\n    return x\n",
        "f",
    );
    let err = interp
        .call_value(converted, vec![Value::Bool(false)], Kwargs::new())
        .unwrap_err();
    assert_eq!(err.kind, RunErrorKind::UnboundStorage);
    assert!(err.message.contains('x'), "got: {err}");
}

#[test]
fn return_inside_virtualized_control_flow_is_rejected() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def early(x):\n    if x:\n        return 1\n    return 0\n")
        .unwrap();
    let early = env.get("early").unwrap();
    let err = convert(&mut interp, &early, host_defaults()).unwrap_err();
    assert!(
        matches!(err, ConvertError::UnsupportedConstruct { .. }),
        "got: {err}"
    );
}

#[test]
fn break_inside_virtualized_loops_is_rejected() {
    let mut interp = Interp::new();
    let env = interp
        .run_module(
            "def find(items, needle):\n    found = 0\n    for item in items:\n        if item == needle:\n            found = 1\n            break\n    return found\n",
        )
        .unwrap();
    let find = env.get("find").unwrap();
    let err = convert(&mut interp, &find, host_defaults()).unwrap_err();
    assert!(
        matches!(err, ConvertError::UnsupportedConstruct { .. }),
        "got: {err}"
    );
}

#[test]
fn augmented_assignment_is_rejected() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("def inc(x):\n    x += 1\n    return x\n")
        .unwrap();
    let inc = env.get("inc").unwrap();
    let err = convert(&mut interp, &inc, host_defaults()).unwrap_err();
    assert!(
        matches!(err, ConvertError::UnsupportedConstruct { .. }),
        "got: {err}"
    );
}

#[test]
fn converted_and_original_share_module_state() {
    let mut interp = Interp::new();
    let env = interp
        .run_module("count = 0\ndef tick():\n    global count\n    count = count + 1\n    return count\n")
        .unwrap();
    let tick = env.get("tick").unwrap();
    let converted = convert(&mut interp, &tick, host_defaults()).unwrap();
    call(&mut interp, &tick, Vec::new());
    call(&mut interp, &converted, Vec::new());
    assert_eq!(env.get("count"), Some(Value::Int(2)));
}
