use krait::{
    BinaryOpKind, Code, CodeBuilder, CollectStringPrint, CompareOpKind, Const, CountingTracer, Instr, NoopTracer,
    Object, Opcode, RunFailure, Runner,
};

fn run_collect(code: Code) -> (Result<Object, RunFailure>, String, String) {
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let result = Runner::new(code).run_with(&mut writer, &mut tracer);
    let (stdout, stderr) = writer.into_outputs();
    (result, stdout, stderr)
}

fn return_expr(build: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut b = CodeBuilder::new("t.py", "<module>");
    build(&mut b);
    b.emit(Opcode::ReturnValue);
    b.build()
}

#[test]
fn prints_arithmetic() {
    // print(1 + 2 * 3)
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("print");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Int(3));
    b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Mul as u32);
    b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::PopTop);
    b.load_const(Const::None);
    b.emit(Opcode::ReturnValue);

    let (result, stdout, stderr) = run_collect(b.build());
    assert_eq!(result.unwrap(), Object::None);
    assert_eq!(stdout, "7\n");
    assert_eq!(stderr, "");
}

#[test]
fn reruns_are_deterministic() {
    let code = return_expr(|b| {
        b.load_const(Const::Int(40));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    });
    let runner = Runner::new(code);
    let first = runner.run().unwrap();
    let second = runner.run().unwrap();
    assert_eq!(first, Object::Int(42));
    assert_eq!(first, second);
}

#[test]
fn small_int_constants_are_interned() {
    // `1 is 1` observes interned identity.
    let code = return_expr(|b| {
        b.load_const(Const::Int(1));
        b.load_const(Const::Int(1));
        b.emit_arg(Opcode::CompareOp, CompareOpKind::Is as u32);
    });
    assert_eq!(run_collect(code).0.unwrap(), Object::Bool(true));
}

#[test]
fn arbitrary_precision_integers() {
    let code = return_expr(|b| {
        b.load_const(Const::Int(2));
        b.load_const(Const::Int(100));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Pow as u32);
    });
    let result = run_collect(code).0.unwrap();
    assert_eq!(result.to_string(), "1267650600228229401496703205376");
}

#[test]
fn true_division_is_exact_or_an_error() {
    let exact = return_expr(|b| {
        b.load_const(Const::Int(10));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::TrueDiv as u32);
    });
    assert_eq!(run_collect(exact).0.unwrap(), Object::Int(5));

    let inexact = return_expr(|b| {
        b.load_const(Const::Int(7));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::TrueDiv as u32);
    });
    let failure = run_collect(inexact).0.unwrap_err();
    match failure {
        RunFailure::Exception(exc) => assert_eq!(exc.exc_type(), krait::ExcType::ValueError),
        other => panic!("expected a ValueError, got {other}"),
    }
}

#[test]
fn floor_division_and_modulo_follow_python() {
    // -7 // 2 == -4 and -7 % 2 == 1
    let floor = return_expr(|b| {
        b.load_const(Const::Int(-7));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::FloorDiv as u32);
    });
    assert_eq!(run_collect(floor).0.unwrap(), Object::Int(-4));

    let modulo = return_expr(|b| {
        b.load_const(Const::Int(-7));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Mod as u32);
    });
    assert_eq!(run_collect(modulo).0.unwrap(), Object::Int(1));
}

#[test]
fn seeded_globals_are_visible() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("limit");
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Mul as u32);
    b.emit(Opcode::ReturnValue);
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let result = Runner::new(b.build())
        .with_global("limit", Object::Int(21))
        .run_with(&mut writer, &mut tracer)
        .unwrap();
    assert_eq!(result, Object::Int(42));
}

#[test]
fn container_literals_round_trip() {
    let code = return_expr(|b| {
        b.load_const(Const::Int(1));
        b.load_const(Const::Int(2));
        b.emit_arg(Opcode::BuildList, 2);
        b.load_const(Const::Str("key".into()));
        b.load_const(Const::Int(3));
        b.emit_arg(Opcode::BuildMap, 1);
        b.emit_arg(Opcode::BuildTuple, 2);
    });
    let result = run_collect(code).0.unwrap();
    assert_eq!(
        result,
        Object::Tuple(vec![
            Object::List(vec![Object::Int(1), Object::Int(2)]),
            Object::Dict(vec![(Object::String("key".to_owned()), Object::Int(3))]),
        ])
    );
}

#[test]
fn subscription_reads_and_writes() {
    // d = {}; d["x"] = 5; return d["x"] + [10, 20][1]
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.emit_arg(Opcode::BuildMap, 0);
    b.store_global("d");
    b.load_const(Const::Int(5));
    b.load_global("d");
    b.load_const(Const::Str("x".into()));
    b.emit(Opcode::StoreSubscr);
    b.load_global("d");
    b.load_const(Const::Str("x".into()));
    b.emit(Opcode::BinarySubscr);
    b.load_const(Const::Int(10));
    b.load_const(Const::Int(20));
    b.emit_arg(Opcode::BuildList, 2);
    b.load_const(Const::Int(1));
    b.emit(Opcode::BinarySubscr);
    b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(25));
}

#[test]
fn negative_indices_and_slices() {
    // "hello"[-1] + "hello"[1:4]
    let code = return_expr(|b| {
        b.load_const(Const::Str("hello".into()));
        b.load_const(Const::Int(-1));
        b.emit(Opcode::BinarySubscr);
        b.load_const(Const::Str("hello".into()));
        b.load_const(Const::Int(1));
        b.load_const(Const::Int(4));
        b.emit_arg(Opcode::BuildSlice, 2);
        b.emit(Opcode::BinarySubscr);
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    });
    assert_eq!(run_collect(code).0.unwrap(), Object::String("oell".to_owned()));
}

#[test]
fn executed_stack_depth_stays_within_declared_maximum() {
    // A straight-line block mixing pushes and arithmetic; the observed peak
    // must not exceed the builder's computed stack_size.
    let mut b = CodeBuilder::new("t.py", "<module>");
    let mut seed = 0x2545f491u64;
    let mut pushed = 0u32;
    for _ in 0..60 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        if pushed >= 2 && seed % 3 == 0 {
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            pushed -= 1;
        } else {
            b.load_const(Const::Int((seed % 97) as i64));
            pushed += 1;
        }
    }
    while pushed > 1 {
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
        pushed -= 1;
    }
    b.emit(Opcode::ReturnValue);
    let code = b.build();
    let declared = code.stack_size as usize;

    let mut writer = CollectStringPrint::new();
    let mut tracer = CountingTracer::new();
    Runner::new(code).run_with(&mut writer, &mut tracer).unwrap();
    assert!(tracer.max_stack_depth() <= declared);
    assert!(tracer.instructions() > 60);
}

#[test]
fn malformed_operands_are_fatal_not_catchable() {
    // A LoadFast past the locals array is a defect in the code object, not a
    // user-level exception.
    let code = Code::new(
        vec![Instr::new(Opcode::LoadFast, 3), Instr::new(Opcode::ReturnValue, 0)],
        vec![1, 1],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        0,
        0,
        krait::CodeFlags::empty(),
        4,
        "t.py".into(),
        "<module>".into(),
        1,
    );
    match run_collect(code).0.unwrap_err() {
        RunFailure::Fatal(fatal) => {
            let rendered = fatal.to_string();
            assert!(rendered.contains("fatal interpreter error"), "got: {rendered}");
            assert!(rendered.contains("LoadFast"), "got: {rendered}");
        }
        other => panic!("expected a fatal error, got {other}"),
    }
}

#[test]
fn running_off_the_end_is_fatal() {
    let code = Code::new(
        vec![Instr::new(Opcode::Nop, 0)],
        vec![1],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        0,
        0,
        krait::CodeFlags::empty(),
        0,
        "t.py".into(),
        "<module>".into(),
        1,
    );
    assert!(matches!(run_collect(code).0.unwrap_err(), RunFailure::Fatal(_)));
}

#[test]
fn code_objects_serialize_round_trip() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Int(7));
    b.load_const(Const::Str("x".into()));
    b.emit(Opcode::PopTop);
    b.emit(Opcode::ReturnValue);
    let code = b.build();
    let json = serde_json::to_string(&code).unwrap();
    let decoded: Code = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.instructions, code.instructions);
    assert_eq!(decoded.stack_size, code.stack_size);
    assert_eq!(run_collect(decoded).0.unwrap(), Object::Int(7));
}
