//! Builtin functions and builtin-type methods.
//!
//! Each builtin declares a signature; the evaluator binds call arguments
//! against it and hands the implementation a name→value mapping (the
//! builtin-function contract). Implementations raise by returning an error
//! from the user exception plane.

mod abs;
mod isinstance;
mod iter;
mod len;
mod methods;
mod print;
mod repr;

use strum::{Display, IntoStaticStr};

use crate::{
    except::RunResult,
    io::PrintWriter,
    signature::{BoundArgs, BuiltinDefault, BuiltinParam, BuiltinSignature},
    tracer::VmTracer,
    value::PyRef,
    vm::Vm,
};

/// Every interpreter-native builtin callable.
///
/// Dotted names are unbound methods of builtin types; they reach the
/// evaluator through the attribute protocol as bound methods, with the
/// receiver bound to the leading `self` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub(crate) enum BuiltinKind {
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "len")]
    Len,
    #[strum(serialize = "repr")]
    Repr,
    #[strum(serialize = "iter")]
    Iter,
    #[strum(serialize = "next")]
    Next,
    #[strum(serialize = "isinstance")]
    Isinstance,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "list.append")]
    ListAppend,
    #[strum(serialize = "list.pop")]
    ListPop,
    #[strum(serialize = "dict.get")]
    DictGet,
    #[strum(serialize = "dict.items")]
    DictItems,
    #[strum(serialize = "dict.keys")]
    DictKeys,
    #[strum(serialize = "dict.values")]
    DictValues,
    #[strum(serialize = "set.add")]
    SetAdd,
    #[strum(serialize = "str.join")]
    StrJoin,
    #[strum(serialize = "str.split")]
    StrSplit,
}

const PRINT_PARAMS: &[BuiltinParam] = &[
    BuiltinParam::star("args"),
    BuiltinParam::keyword("sep", BuiltinDefault::Str(" ")),
    BuiltinParam::keyword("end", BuiltinDefault::Str("\n")),
];
const ONE_OBJ: &[BuiltinParam] = &[BuiltinParam::required("obj")];
const ITER_PARAMS: &[BuiltinParam] = &[BuiltinParam::required("iterable")];
const NEXT_PARAMS: &[BuiltinParam] = &[
    BuiltinParam::required("iterator"),
    BuiltinParam::optional_absent("default"),
];
const ISINSTANCE_PARAMS: &[BuiltinParam] = &[BuiltinParam::required("obj"), BuiltinParam::required("classinfo")];
const ABS_PARAMS: &[BuiltinParam] = &[BuiltinParam::required("x")];
const SELF_ONLY: &[BuiltinParam] = &[BuiltinParam::required("self")];
const SELF_ITEM: &[BuiltinParam] = &[BuiltinParam::required("self"), BuiltinParam::required("item")];
const LIST_POP_PARAMS: &[BuiltinParam] = &[
    BuiltinParam::required("self"),
    BuiltinParam::optional("index", BuiltinDefault::Int(-1)),
];
const DICT_GET_PARAMS: &[BuiltinParam] = &[
    BuiltinParam::required("self"),
    BuiltinParam::required("key"),
    BuiltinParam::optional("default", BuiltinDefault::None),
];
const STR_JOIN_PARAMS: &[BuiltinParam] = &[BuiltinParam::required("self"), BuiltinParam::required("iterable")];
const STR_SPLIT_PARAMS: &[BuiltinParam] = &[
    BuiltinParam::required("self"),
    BuiltinParam::optional_absent("sep"),
    BuiltinParam::optional("maxsplit", BuiltinDefault::Int(-1)),
];

impl BuiltinKind {
    /// The display name (`print`, `list.append`, ...).
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// The declared signature argument binding runs against.
    pub fn signature(self) -> BuiltinSignature {
        let params = match self {
            Self::Print => PRINT_PARAMS,
            Self::Len | Self::Repr => ONE_OBJ,
            Self::Iter => ITER_PARAMS,
            Self::Next => NEXT_PARAMS,
            Self::Isinstance => ISINSTANCE_PARAMS,
            Self::Abs => ABS_PARAMS,
            Self::ListAppend | Self::SetAdd => SELF_ITEM,
            Self::ListPop => LIST_POP_PARAMS,
            Self::DictGet => DICT_GET_PARAMS,
            Self::DictItems | Self::DictKeys | Self::DictValues => SELF_ONLY,
            Self::StrJoin => STR_JOIN_PARAMS,
            Self::StrSplit => STR_SPLIT_PARAMS,
        };
        BuiltinSignature { params }
    }
}

/// Invokes a builtin with its bound arguments.
pub(crate) fn invoke<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    kind: BuiltinKind,
    bound: BoundArgs,
) -> RunResult<PyRef> {
    match kind {
        BuiltinKind::Print => print::builtin_print(vm, bound),
        BuiltinKind::Len => len::builtin_len(vm, bound),
        BuiltinKind::Repr => repr::builtin_repr(vm, bound),
        BuiltinKind::Iter => iter::builtin_iter(vm, bound),
        BuiltinKind::Next => iter::builtin_next(vm, bound),
        BuiltinKind::Isinstance => isinstance::builtin_isinstance(bound),
        BuiltinKind::Abs => abs::builtin_abs(bound),
        BuiltinKind::ListAppend => methods::list_append(bound),
        BuiltinKind::ListPop => methods::list_pop(bound),
        BuiltinKind::DictGet => methods::dict_get(bound),
        BuiltinKind::DictItems => methods::dict_items(bound),
        BuiltinKind::DictKeys => methods::dict_keys(bound),
        BuiltinKind::DictValues => methods::dict_values(bound),
        BuiltinKind::SetAdd => methods::set_add(bound),
        BuiltinKind::StrJoin => methods::str_join(vm, bound),
        BuiltinKind::StrSplit => methods::str_split(bound),
    }
}
