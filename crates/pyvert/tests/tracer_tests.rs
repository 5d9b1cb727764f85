use pyvert::{
    convert, host_defaults, Interp, Kwargs, PipelinePhase, RecordingTracer, TraceEvent, Value,
};

#[test]
fn conversion_and_execution_are_observable() {
    let tracer = RecordingTracer::new();
    let log = tracer.events();
    let mut interp = Interp::with_tracer(Box::new(tracer));
    let env = interp
        .run_module("def double(x):\n    y = x + x\n    return y\n")
        .unwrap();
    let double = env.get("double").unwrap();
    let converted = convert(&mut interp, &double, host_defaults()).unwrap();

    // Conversion alone dispatches no hooks; the rewritten code has not run.
    assert!(
        !log.borrow().iter().any(|e| matches!(e, TraceEvent::Hook(_))),
        "no hooks expected during conversion, got {:?}",
        log.borrow()
    );
    let phases: Vec<PipelinePhase> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Phase(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            PipelinePhase::Extract,
            PipelinePhase::Transform,
            PipelinePhase::Wrap,
            PipelinePhase::Compile,
            PipelinePhase::Rebind,
        ]
    );

    let got = interp
        .call_value(converted, vec![Value::Int(21)], Kwargs::new())
        .unwrap();
    assert_eq!(got, Value::Int(42));

    let hooks: Vec<&'static str> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Hook(name) => Some(*name),
            _ => None,
        })
        .collect();
    // Storage is initialized, the parameter forwarded, `x` read twice, `y`
    // assigned and read back.
    assert_eq!(hooks.iter().filter(|h| **h == "init").count(), 2);
    assert_eq!(hooks.iter().filter(|h| **h == "assign").count(), 2);
    assert_eq!(hooks.iter().filter(|h| **h == "read").count(), 3);
}

#[test]
fn recorded_traces_serialize_to_json() {
    let tracer = RecordingTracer::new();
    let log = tracer.events();
    let mut interp = Interp::with_tracer(Box::new(tracer));
    let env = interp.run_module("def ident(x):\n    return x\n").unwrap();
    let ident = env.get("ident").unwrap();
    convert(&mut interp, &ident, host_defaults()).unwrap();

    let json = serde_json::to_string(&*log.borrow()).unwrap();
    assert!(json.contains(r#"{"Phase":"Extract"}"#), "got: {json}");
    assert!(json.contains(r#"{"PassBegin":"variables"}"#), "got: {json}");
}

#[test]
fn passes_report_begin_and_end_in_order() {
    let tracer = RecordingTracer::new();
    let log = tracer.events();
    let mut interp = Interp::with_tracer(Box::new(tracer));
    let env = interp.run_module("def ident(x):\n    return x\n").unwrap();
    let ident = env.get("ident").unwrap();
    convert(&mut interp, &ident, host_defaults()).unwrap();

    let pass_events: Vec<String> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            TraceEvent::PassBegin(name) => Some(format!("begin {name}")),
            TraceEvent::PassEnd(name) => Some(format!("end {name}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        pass_events,
        vec![
            "begin variables",
            "end variables",
            "begin control_flow",
            "end control_flow",
            "begin function_calls",
            "end function_calls",
            "begin logical_ops",
            "end logical_ops",
        ]
    );
}
