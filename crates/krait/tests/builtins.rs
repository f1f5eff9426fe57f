use krait::{
    BinaryOpKind, Code, CodeBuilder, CollectStringPrint, CompareOpKind, Const, ExcType, NoopTracer, Object, Opcode,
    RunFailure, Runner,
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

#[test]
fn len_answers_for_every_sized_kind() {
    // return (len("abc"), len([1]), len({"a": 1}), len(range(10)))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("len");
    b.load_const(Const::Str("abc".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("len");
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildList, 1);
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("len");
    b.load_const(Const::Str("a".into()));
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildMap, 1);
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("len");
    b.load_global("range");
    b.load_const(Const::Int(10));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::BuildTuple, 4);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![Object::Int(3), Object::Int(1), Object::Int(1), Object::Int(10)])
    );
}

#[test]
fn len_rejects_unsized_kinds() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("len");
    b.load_const(Const::Int(5));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("object of type 'int' has no len()"));
}

#[test]
fn print_accepts_sep_and_end_keywords() {
    // print(1, 2, sep="-", end="!")
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("print");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.load_const(Const::Str("-".into()));
    b.load_const(Const::Str("!".into()));
    b.load_const(Const::Tuple(vec![Const::Str("sep".into()), Const::Str("end".into())]));
    b.emit_arg(Opcode::CallFunctionKw, 4);
    b.emit(Opcode::PopTop);
    b.load_const(Const::None);
    b.emit(Opcode::ReturnValue);
    let (result, stdout, _) = run_collect(b.build());
    assert_eq!(result.unwrap(), Object::None);
    assert_eq!(stdout, "1-2!");
}

#[test]
fn isinstance_walks_the_descriptor_chain() {
    // (isinstance(True, int), isinstance(1, bool), isinstance("x", (int, str)))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("isinstance");
    b.load_const(Const::Bool(true));
    b.load_global("int");
    b.emit_arg(Opcode::CallFunction, 2);
    b.load_global("isinstance");
    b.load_const(Const::Int(1));
    b.load_global("bool");
    b.emit_arg(Opcode::CallFunction, 2);
    b.load_global("isinstance");
    b.load_const(Const::Str("x".into()));
    b.load_global("int");
    b.load_global("str");
    b.emit_arg(Opcode::BuildTuple, 2);
    b.emit_arg(Opcode::CallFunction, 2);
    b.emit_arg(Opcode::BuildTuple, 3);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![Object::Bool(true), Object::Bool(false), Object::Bool(true)])
    );
}

#[test]
fn type_of_a_value_is_its_type_object() {
    // type(1) is int
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("type");
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("int");
    b.emit_arg(Opcode::CompareOp, CompareOpKind::Is as u32);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Bool(true));
}

#[test]
fn repr_quotes_strings() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("repr");
    b.load_const(Const::Str("a\nb".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::String("'a\\nb'".to_owned()));
}

#[test]
fn abs_handles_ints_and_rejects_text() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("abs");
    b.load_const(Const::Int(-5));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::Int(5));

    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("abs");
    b.load_const(Const::Str("x".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("bad operand type for abs(): 'str'"));
}

#[test]
fn list_methods_bind_through_attribute_lookup() {
    // acc = []; acc.append(3); acc.append(4); return (acc, acc.pop())
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.emit_arg(Opcode::BuildList, 0);
    b.store_global("acc");
    for value in [3, 4] {
        b.load_global("acc");
        b.load_attr("append");
        b.load_const(Const::Int(value));
        b.emit_arg(Opcode::CallFunction, 1);
        b.emit(Opcode::PopTop);
    }
    b.load_global("acc");
    b.load_attr("pop");
    b.emit_arg(Opcode::CallFunction, 0);
    b.load_global("acc");
    b.emit_arg(Opcode::BuildTuple, 2);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![Object::Int(4), Object::List(vec![Object::Int(3)])])
    );
}

#[test]
fn dict_methods_preserve_insertion_order() {
    // d = {"b": 2, "a": 1}; return (d.keys(), d.values(), d.get("zz", 9))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Str("b".into()));
    b.load_const(Const::Int(2));
    b.load_const(Const::Str("a".into()));
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildMap, 2);
    b.store_global("d");
    b.load_global("d");
    b.load_attr("keys");
    b.emit_arg(Opcode::CallFunction, 0);
    b.load_global("d");
    b.load_attr("values");
    b.emit_arg(Opcode::CallFunction, 0);
    b.load_global("d");
    b.load_attr("get");
    b.load_const(Const::Str("zz".into()));
    b.load_const(Const::Int(9));
    b.emit_arg(Opcode::CallFunction, 2);
    b.emit_arg(Opcode::BuildTuple, 3);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![
            Object::List(vec![Object::String("b".to_owned()), Object::String("a".to_owned())]),
            Object::List(vec![Object::Int(2), Object::Int(1)]),
            Object::Int(9),
        ])
    );
}

#[test]
fn str_split_and_join_round_trip() {
    // "-".join("a b  c".split())
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Str("-".into()));
    b.load_attr("join");
    b.load_const(Const::Str("a b  c".into()));
    b.load_attr("split");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::String("a-b-c".to_owned()));
}

#[test]
fn iter_and_next_walk_any_iterable() {
    // it = iter("ab"); return (next(it), next(it), next(it, "done"))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("iter");
    b.load_const(Const::Str("ab".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.store_global("it");
    for _ in 0..2 {
        b.load_global("next");
        b.load_global("it");
        b.emit_arg(Opcode::CallFunction, 1);
    }
    b.load_global("next");
    b.load_global("it");
    b.load_const(Const::Str("done".into()));
    b.emit_arg(Opcode::CallFunction, 2);
    b.emit_arg(Opcode::BuildTuple, 3);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![
            Object::String("a".to_owned()),
            Object::String("b".to_owned()),
            Object::String("done".to_owned()),
        ])
    );
}

#[test]
fn type_constructors_convert_values() {
    // (int("42"), str(7), bool([]), list("ab"), tuple([1, 2]))
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("int");
    b.load_const(Const::Str("42".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("str");
    b.load_const(Const::Int(7));
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("bool");
    b.emit_arg(Opcode::BuildList, 0);
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("list");
    b.load_const(Const::Str("ab".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.load_global("tuple");
    b.load_const(Const::Int(1));
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::BuildList, 2);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::BuildTuple, 5);
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::Tuple(vec![
            Object::Int(42),
            Object::String("7".to_owned()),
            Object::Bool(false),
            Object::List(vec![Object::String("a".to_owned()), Object::String("b".to_owned())]),
            Object::Tuple(vec![Object::Int(1), Object::Int(2)]),
        ])
    );
}

#[test]
fn int_parsing_failures_are_value_errors() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("int");
    b.load_const(Const::Str("4x".into()));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.message(), Some("invalid literal for int() with base 10: '4x'"));
}

#[test]
fn range_rejects_a_zero_step() {
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_global("range");
    b.load_const(Const::Int(0));
    b.load_const(Const::Int(5));
    b.load_const(Const::Int(0));
    b.emit_arg(Opcode::CallFunction, 3);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.message(), Some("range() arg 3 must not be zero"));
}

#[test]
fn generators_feed_str_join() {
    // def parts(): yield "a"; yield "b"
    // return ",".join(parts())
    let mut g = CodeBuilder::new("t.py", "parts");
    g.add_flags(krait::CodeFlags::GENERATOR);
    g.load_const(Const::Str("a".into()));
    g.emit(Opcode::YieldValue);
    g.load_const(Const::Str("b".into()));
    g.emit(Opcode::YieldValue);
    g.load_const(Const::None);
    g.emit(Opcode::ReturnValue);
    let g_code = Const::Code(std::rc::Rc::new(g.build()));

    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(g_code);
    b.emit_arg(Opcode::MakeFunction, 0);
    b.store_global("parts");
    b.load_const(Const::Str(",".into()));
    b.load_attr("join");
    b.load_global("parts");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    assert_eq!(run_collect(b.build()).0.unwrap(), Object::String("a,b".to_owned()));
}

#[test]
fn augmented_assignment_mutates_lists_in_place() {
    // xs = [1]; ys = xs; xs += [2]; return ys
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildList, 1);
    b.store_global("xs");
    b.load_global("xs");
    b.store_global("ys");
    b.load_global("xs");
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::BuildList, 1);
    b.emit_arg(Opcode::InplaceOp, BinaryOpKind::Add as u32);
    b.store_global("xs");
    b.load_global("ys");
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::List(vec![Object::Int(1), Object::Int(2)])
    );
}

#[test]
fn list_inplace_add_extends_from_any_iterable() {
    // xs = [1]; xs += "ab"; xs += range(2); return xs
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildList, 1);
    b.store_global("xs");
    b.load_global("xs");
    b.load_const(Const::Str("ab".into()));
    b.emit_arg(Opcode::InplaceOp, BinaryOpKind::Add as u32);
    b.store_global("xs");
    b.load_global("xs");
    b.load_global("range");
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::InplaceOp, BinaryOpKind::Add as u32);
    b.store_global("xs");
    b.load_global("xs");
    b.emit(Opcode::ReturnValue);
    assert_eq!(
        run_collect(b.build()).0.unwrap(),
        Object::List(vec![
            Object::Int(1),
            Object::String("a".to_owned()),
            Object::String("b".to_owned()),
            Object::Int(0),
            Object::Int(1),
        ])
    );
}

#[test]
fn list_inplace_add_rejects_non_iterables() {
    // xs = [1]; xs += 2
    let mut b = CodeBuilder::new("t.py", "<module>");
    b.load_const(Const::Int(1));
    b.emit_arg(Opcode::BuildList, 1);
    b.store_global("xs");
    b.load_global("xs");
    b.load_const(Const::Int(2));
    b.emit_arg(Opcode::InplaceOp, BinaryOpKind::Add as u32);
    b.store_global("xs");
    b.load_const(Const::None);
    b.emit(Opcode::ReturnValue);
    let exc = expect_exception(run_collect(b.build()).0);
    assert_eq!(exc.exc_type(), ExcType::TypeError);
    assert_eq!(exc.message(), Some("'int' object is not iterable"));
}
