use std::rc::Rc;

use krait::{
    BinaryOpKind, Code, CodeBuilder, CodeFlags, CollectStringPrint, CompareOpKind, Const, ExcType, NoopTracer,
    Object, Opcode, ResourceLimits, RunFailure, Runner,
};

fn run_collect(code: Code) -> (Result<Object, RunFailure>, String, String) {
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let result = Runner::new(code).run_with(&mut writer, &mut tracer);
    let (stdout, stderr) = writer.into_outputs();
    (result, stdout, stderr)
}

fn expect_exception(result: Result<Object, RunFailure>) -> krait::Exception {
    match result.unwrap_err() {
        RunFailure::Exception(exc) => exc,
        other => panic!("expected an exception, got {other}"),
    }
}

/// `def f(n): return n if n <= 1 else f(n-1) + f(n-2)` as decoded code.
fn fib_function() -> Const {
    let mut f = CodeBuilder::new("t.py", "f");
    f.param("n");
    let recurse = f.new_label();
    f.load_fast("n");
    f.load_const(Const::Int(1));
    f.emit_arg(Opcode::CompareOp, CompareOpKind::Le as u32);
    f.emit_jump(Opcode::PopJumpIfFalse, recurse);
    f.load_fast("n");
    f.emit(Opcode::ReturnValue);
    f.bind(recurse);
    f.load_global("f");
    f.load_fast("n");
    f.load_const(Const::Int(1));
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Sub as u32);
    f.emit_arg(Opcode::CallFunction, 1);
    f.load_global("f");
    f.load_fast("n");
    f.load_const(Const::Int(2));
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Sub as u32);
    f.emit_arg(Opcode::CallFunction, 1);
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    f.emit(Opcode::ReturnValue);
    Const::Code(Rc::new(f.build()))
}

#[test]
fn recursive_fibonacci() {
    // def f(n): ... ; print(f(10))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(fib_function());
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("f");
    b.load_global("print");
    b.load_global("f");
    b.load_const(Const::Int(10));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::PopTop);
    b.load_const(Const::None);
    b.emit(Opcode::ReturnValue);

    let (result, stdout, _) = run_collect(b.build());
    assert_eq!(result.unwrap(), Object::None);
    assert_eq!(stdout, "55\n");
}

/// `def add(a, b=10): return a + b`
fn add_with_default() -> Const {
    let mut f = CodeBuilder::new("t.py", "add");
    f.param("a");
    f.param("b");
    f.load_fast("a");
    f.load_fast("b");
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    f.emit(Opcode::ReturnValue);
    Const::Code(Rc::new(f.build()))
}

fn make_add(b: &mut CodeBuilder) {
    b.load_const(Const::Int(10));
    b.emit_arg(Opcode::BuildTuple, 1);
    b.load_const(add_with_default());
    b.emit_arg(Opcode::MakeFunction, 0x01);
    b.store_global("add");
}

#[test]
fn positional_defaults_fill_missing_parameters() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.load_const(Const::Int(5));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(15));
}

#[test]
fn keyword_arguments_bind_by_name() {
    // add(b=1, a=2)
    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Tuple(vec![Const::Str("b".into()), Const::Str("a".into())]));
    b.emit_arg(Opcode::CallFunctionKw, 2);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(3));
}

#[test]
fn binding_errors_name_the_parameters() {
    // add() -> missing 'a'; add(1, 2, 3) -> too many.
    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("add() missing 1 required positional argument: 'a'"));

    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Int(3));
    b.emit_arg(Opcode::CallFunction, 3);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("add() takes 2 positional arguments but 3 were given"));
}

#[test]
fn unknown_and_duplicate_keywords_are_rejected() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Tuple(vec![Const::Str("zz".into())]));
    b.emit_arg(Opcode::CallFunctionKw, 2);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("add() got an unexpected keyword argument 'zz'"));

    let mut b = CodeBuilder::new("t.py", "<module>");
    make_add(&mut b);
    b.load_global("add");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Tuple(vec![Const::Str("a".into())]));
    b.emit_arg(Opcode::CallFunctionKw, 2);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("add() got multiple values for argument 'a'"));
}

/// `def spread(first, *rest, scale=1, **extra): ...`
fn spread_function() -> Const {
    let mut f = CodeBuilder::new("t.py", "spread");
    f.param("first");
    f.kwonly_param("scale");
    f.local("rest");
    f.local("extra");
    f.add_flags(CodeFlags::VARARGS | CodeFlags::VARKWARGS);
    // return (first + len(rest)) * scale + len(extra)
    f.load_fast("first");
    f.load_global("len");
    f.load_fast("rest");
    f.emit_arg(Opcode::CallFunction, 1);
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    f.load_fast("scale");
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Mul as u32);
    f.load_global("len");
    f.load_fast("extra");
    f.emit_arg(Opcode::CallFunction, 1);
    f.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    f.emit(Opcode::ReturnValue);
    Const::Code(Rc::new(f.build()))
}

#[test]
fn star_args_and_star_kwargs_collect_the_rest() {
    // spread(3, 8, 9, scale=2, tag=1) == (3 + 2) * 2 + 1 == 11
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(spread_function());
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("spread");
    b.load_global("spread");
    b.load_const(Const::Int(3));
    b.load_const(Const::Int(8));
    b.load_const(Const::Int(9));
    b.load_const(Const::Int(2));
    b.load_const(Const::Int(1));
    b.load_const(Const::Tuple(vec![Const::Str("scale".into()), Const::Str("tag".into())]));
    b.emit_arg(Opcode::CallFunctionKw, 5);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(11));
}

#[test]
fn call_function_ex_spreads_iterables_and_mappings() {
    // args = (3, 8); kw = {"scale": 2}; spread(*args, **kw)
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(spread_function());
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("spread");
    b.load_global("spread");
    b.load_const(Const::Tuple(vec![Const::Int(3), Const::Int(8)]));
    b.load_const(Const::Str("scale".into()));
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::BuildMap, 1);
    b.emit_arg(Opcode::CallFunctionEx, 1);
    b.emit(Opcode::ReturnValue);
    // (3 + 1) * 2 + 0 == 8
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(8));
}

#[test]
fn closures_observe_the_defining_scope() {
    // def outer():
    //   x = 10
    //   def inner(): return x
    //   return inner
    // print(outer()())
    let mut inner = CodeBuilder::new("t.py", "inner");
    let x_free = inner.freevar("x");
    inner.emit_arg(Opcode::LoadDeref, x_free);
    inner.emit(Opcode::ReturnValue);
    let inner_code = Const::Code(Rc::new(inner.build()));

    let mut outer = CodeBuilder::new("t.py", "outer");
    let x_cell = outer.cellvar("x");
    outer.load_const(Const::Int(10));
    outer.emit_arg(Opcode::StoreDeref, x_cell);
    outer.emit_arg(Opcode::LoadClosure, x_cell);
    outer.emit_arg(Opcode::BuildTuple, 1);
    outer.load_const(inner_code);
    outer.emit_arg(Opcode::MakeFunction, 0x08);
    outer.emit(Opcode::ReturnValue);
    let outer_code = Const::Code(Rc::new(outer.build()));

    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(outer_code);
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("outer");
    b.load_global("print");
    b.load_global("outer");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::PopTop);
    b.load_const(Const::None);
    b.emit(Opcode::ReturnValue);

    let (result, stdout, _) = run_collect(b.build());
    assert_eq!(result.unwrap(), Object::None);
    assert_eq!(stdout, "10\n");
}

#[test]
fn one_cell_is_shared_by_every_capture() {
    // def make():
    //   x = 0
    //   def bump(): x = x + 1 (via cell)
    //   def read(): return x
    //   return (bump, read)
    let mut bump = CodeBuilder::new("t.py", "bump");
    let x_in_bump = bump.freevar("x");
    bump.emit_arg(Opcode::LoadDeref, x_in_bump);
    bump.load_const(Const::Int(1));
    bump.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
    bump.emit_arg(Opcode::StoreDeref, x_in_bump);
    bump.load_const(Const::None);
    bump.emit(Opcode::ReturnValue);
    let bump_code = Const::Code(Rc::new(bump.build()));

    let mut read = CodeBuilder::new("t.py", "read");
    let x_in_read = read.freevar("x");
    read.emit_arg(Opcode::LoadDeref, x_in_read);
    read.emit(Opcode::ReturnValue);
    let read_code = Const::Code(Rc::new(read.build()));

    let mut make = CodeBuilder::new("t.py", "make");
    let x_cell = make.cellvar("x");
    make.load_const(Const::Int(0));
    make.emit_arg(Opcode::StoreDeref, x_cell);
    make.emit_arg(Opcode::LoadClosure, x_cell);
    make.emit_arg(Opcode::BuildTuple, 1);
    make.load_const(bump_code);
    make.emit_arg(Opcode::MakeFunction, 0x08);
    make.emit_arg(Opcode::LoadClosure, x_cell);
    make.emit_arg(Opcode::BuildTuple, 1);
    make.load_const(read_code);
    make.emit_arg(Opcode::MakeFunction, 0x08);
    make.emit_arg(Opcode::BuildTuple, 2);
    make.emit(Opcode::ReturnValue);
    let make_code = Const::Code(Rc::new(make.build()));

    // bump, read = make(); bump(); bump(); return read()
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(make_code);
    b.emit_arg(Opcode::MakeFunction, 0);
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit_arg(Opcode::UnpackSequence, 2);
    b.store_global("bump");
    b.store_global("read");
    b.load_global("bump");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::PopTop);
    b.load_global("bump");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::PopTop);
    b.load_global("read");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(2));
}

#[test]
fn unbounded_recursion_raises_recursion_error() {
    // def loop(): return loop()
    let mut f = CodeBuilder::new("t.py", "loop");
    f.load_global("loop");
    f.emit_arg(Opcode::CallFunction, 0);
    f.emit(Opcode::ReturnValue);
    let loop_code = Const::Code(Rc::new(f.build()));

    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(loop_code);
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("loop");
    b.load_global("loop");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);

    let code = b.build();
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let result = Runner::new(code)
        .with_limits(ResourceLimits {
            max_recursion_depth: 64,
            ..ResourceLimits::default()
        })
        .run_with(&mut writer, &mut tracer);
    let exc = expect_exception(result);
    assert_eq!(exc.exc_type(), ExcType::RecursionError);
    assert_eq!(exc.message(), Some("maximum recursion depth exceeded"));
}

#[test]
fn calling_a_non_callable_is_a_type_error() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Int(3));
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("'int' object is not callable"));
}
