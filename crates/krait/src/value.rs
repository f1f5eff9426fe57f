//! The universal value representation.
//!
//! Every runtime value is a [`PyObject`] behind an `Rc`: a shared type
//! descriptor, an optional insertion-ordered instance dictionary, and a
//! kind-specific [`Payload`]. Dynamic dispatch is driven by the tagged
//! payload for builtin kinds and by the type descriptor's attribute chain for
//! everything else. Reference cycles (frames, closures, generators) are
//! left to the host's reclamation and may leak.

use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt::Write as _,
    rc::Rc,
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    builtins::BuiltinKind,
    code::{Code, Const},
    except::{ExcData, ExcType, RunResult, TraceRecord},
    function::FunctionData,
    generator::GeneratorData,
    module::ModuleData,
    py_hash::HashKey,
    types::{self, TypeRef},
};

/// Shared handle to a runtime value.
pub(crate) type PyRef = Rc<PyObject>;

/// One runtime value: type descriptor + optional instance dict + payload.
#[derive(Debug)]
pub(crate) struct PyObject {
    ty: TypeRef,
    dict: Option<RefCell<IndexMap<Rc<str>, PyRef>>>,
    payload: Payload,
}

impl PyObject {
    /// Creates a dictless value (numbers, strings, tuples, and most other
    /// builtin kinds opt out of carrying an instance dictionary).
    pub fn new(ty: TypeRef, payload: Payload) -> PyRef {
        Rc::new(Self {
            ty,
            dict: None,
            payload,
        })
    }

    /// Creates a value that carries an instance dictionary (instances of
    /// user types and exception instances).
    pub fn with_dict(ty: TypeRef, payload: Payload) -> PyRef {
        Rc::new(Self {
            ty,
            dict: Some(RefCell::new(IndexMap::new())),
            payload,
        })
    }

    /// The value's type descriptor. Fixed for the value's lifetime.
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    /// The type descriptor's name.
    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    /// The kind-specific payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The instance dictionary, when this kind carries one.
    pub fn instance_dict(&self) -> Option<&RefCell<IndexMap<Rc<str>, PyRef>>> {
        self.dict.as_ref()
    }

    /// The exception payload, when this value is an exception instance.
    pub fn as_exception(&self) -> Option<&ExcData> {
        match &self.payload {
            Payload::Exception(data) => Some(data),
            _ => None,
        }
    }

    /// Whether this value is the `None` singleton.
    pub fn is_none(&self) -> bool {
        matches!(self.payload, Payload::None)
    }

    /// A stable identity for repr addresses and `is` comparisons.
    pub fn id(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self) as usize
    }
}

/// Kind-specific payload of a value.
#[derive(Debug)]
pub(crate) enum Payload {
    /// The `None` singleton.
    None,
    /// The `NotImplemented` singleton used by binary-operator dispatch.
    NotImplemented,
    /// `True` / `False` singletons; bool is an int subtype.
    Bool(bool),
    /// Arbitrary-precision integer.
    Int(BigInt),
    /// Immutable text.
    Str(Rc<str>),
    /// Immutable sequence.
    Tuple(Vec<PyRef>),
    /// Mutable sequence.
    List(RefCell<Vec<PyRef>>),
    /// Insertion-ordered mapping with unique keys.
    Dict(RefCell<Dict>),
    /// Unordered collection of unique hashables.
    Set(RefCell<Set>),
    /// Lazy arithmetic progression.
    Range(RangeData),
    /// Subscription slice (start, stop, step; each possibly `None`).
    Slice(SliceData),
    /// An immutable code object.
    Code(Rc<Code>),
    /// A single-slot mutable box shared between frames and closures.
    Cell(RefCell<Option<PyRef>>),
    /// A user-defined function.
    Function(FunctionData),
    /// A builtin function with a declared signature.
    Builtin(BuiltinKind),
    /// A function bound to a receiver by attribute lookup.
    BoundMethod {
        func: PyRef,
        receiver: PyRef,
    },
    /// A type descriptor as a first-class value.
    Type(TypeRef),
    /// A module namespace.
    Module(Rc<ModuleData>),
    /// An iterator backed by a suspended frame.
    Generator(GeneratorData),
    /// An exception instance.
    Exception(ExcData),
    /// A native iterator over a builtin container kind.
    Iterator(RefCell<IterState>),
    /// A materialized traceback chain (pushed for except handlers).
    Traceback(Vec<TraceRecord>),
    /// An instance of a user type; all state lives in the instance dict.
    Instance,
}

/// Insertion-ordered mapping used by the dict kind.
///
/// Entries are keyed by their pure [`HashKey`] projection; the original key
/// object is stored alongside the value so iteration yields the object the
/// program inserted (first insertion wins on key replacement, as in Python).
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    entries: IndexMap<HashKey, DictEntry>,
}

#[derive(Debug, Clone)]
pub(crate) struct DictEntry {
    pub key: PyRef,
    pub value: PyRef,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<PyRef> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or updates; an existing entry keeps its position and original
    /// key object.
    pub fn insert(&mut self, hash: HashKey, key: PyRef, value: PyRef) {
        match self.entries.get_mut(&hash) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(hash, DictEntry { key, value });
            }
        }
    }

    /// Removes an entry, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &HashKey) -> Option<PyRef> {
        self.entries.shift_remove(key).map(|entry| entry.value)
    }

    pub fn get_index(&self, index: usize) -> Option<(&PyRef, &PyRef)> {
        self.entries.get_index(index).map(|(_, entry)| (&entry.key, &entry.value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PyRef, &PyRef)> {
        self.entries.values().map(|entry| (&entry.key, &entry.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.entries.keys()
    }
}

/// Unordered unique collection used by the set kind.
///
/// Iteration order is insertion order (an implementation detail the language
/// does not promise, but deterministic output keeps runs reproducible).
#[derive(Debug, Clone, Default)]
pub(crate) struct Set {
    entries: IndexMap<HashKey, PyRef>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts an element; a duplicate keeps the first-inserted object.
    pub fn insert(&mut self, hash: HashKey, value: PyRef) {
        self.entries.entry(hash).or_insert(value);
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<PyRef> {
        self.entries.shift_remove(key)
    }

    pub fn get_index(&self, index: usize) -> Option<&PyRef> {
        self.entries.get_index(index).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PyRef> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.entries.keys()
    }

    /// Iterates `(hash, element)` pairs in insertion order.
    pub fn iter_entries(&self) -> impl Iterator<Item = (&HashKey, &PyRef)> {
        self.entries.iter()
    }

    /// Whether every element of `self` is in `other`.
    pub fn is_subset(&self, other: &Set) -> bool {
        self.entries.keys().all(|key| other.contains(key))
    }
}

/// Payload of the range kind: a lazy arithmetic progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeData {
    pub start: BigInt,
    pub stop: BigInt,
    pub step: BigInt,
}

impl RangeData {
    /// Number of values the range produces.
    ///
    /// The direction of the comparison follows the sign of the step, so
    /// `range(5, 0, -1)` has five elements and `range(0, 5, -1)` none.
    pub fn len(&self) -> BigInt {
        let (span, step) = if self.step.is_positive() {
            (&self.stop - &self.start, self.step.clone())
        } else {
            (&self.start - &self.stop, -self.step.clone())
        };
        if span.is_positive() {
            (span + &step - 1i32) / step
        } else {
            BigInt::zero()
        }
    }

    /// The element at (non-negative, in-bounds) position `index`.
    pub fn item(&self, index: &BigInt) -> BigInt {
        &self.start + &self.step * index
    }
}

/// Payload of the slice kind; fields are value refs so absent bounds stay
/// the `None` singleton.
#[derive(Debug)]
pub(crate) struct SliceData {
    pub start: PyRef,
    pub stop: PyRef,
    pub step: PyRef,
}

/// State of a native iterator over a builtin container.
#[derive(Debug)]
pub(crate) enum IterState {
    /// Index-walk over a tuple or list.
    Seq {
        seq: PyRef,
        index: usize,
    },
    /// Character-walk over text (yields 1-character strings).
    Chars {
        string: Rc<str>,
        byte_index: usize,
    },
    /// Lazy range progression.
    Range {
        next: BigInt,
        stop: BigInt,
        step: BigInt,
    },
    /// Index-walk over dict keys or set elements.
    Entries {
        container: PyRef,
        index: usize,
    },
    /// Exhausted; stays exhausted forever.
    Done,
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// The shared `None` singleton.
pub(crate) fn none() -> PyRef {
    types::registry().none.clone()
}

/// The shared `True`/`False` singleton for `b`.
pub(crate) fn bool_value(b: bool) -> PyRef {
    let registry = types::registry();
    if b {
        registry.true_value.clone()
    } else {
        registry.false_value.clone()
    }
}

/// The shared `NotImplemented` singleton.
pub(crate) fn not_implemented() -> PyRef {
    types::registry().not_implemented.clone()
}

/// An integer value; small integers come from the interned pool.
pub(crate) fn int_value(value: BigInt) -> PyRef {
    let registry = types::registry();
    if let Some(small) = value.to_i64().and_then(|i| registry.small_int(i)) {
        return small;
    }
    PyObject::new(registry.int_type.clone(), Payload::Int(value))
}

/// An integer value from a machine integer.
pub(crate) fn int_from_i64(value: i64) -> PyRef {
    let registry = types::registry();
    if let Some(small) = registry.small_int(value) {
        return small;
    }
    PyObject::new(registry.int_type.clone(), Payload::Int(BigInt::from(value)))
}

/// A text value.
pub(crate) fn str_value(text: impl Into<Rc<str>>) -> PyRef {
    PyObject::new(types::registry().str_type.clone(), Payload::Str(text.into()))
}

/// A tuple value.
pub(crate) fn tuple(items: Vec<PyRef>) -> PyRef {
    PyObject::new(types::registry().tuple_type.clone(), Payload::Tuple(items))
}

/// A list value.
pub(crate) fn list(items: Vec<PyRef>) -> PyRef {
    PyObject::new(types::registry().list_type.clone(), Payload::List(RefCell::new(items)))
}

/// A dict value.
pub(crate) fn dict_value(dict: Dict) -> PyRef {
    PyObject::new(types::registry().dict_type.clone(), Payload::Dict(RefCell::new(dict)))
}

/// A set value.
pub(crate) fn set_value(set: Set) -> PyRef {
    PyObject::new(types::registry().set_type.clone(), Payload::Set(RefCell::new(set)))
}

/// A range value; a zero step is rejected at construction.
pub(crate) fn range_value(start: BigInt, stop: BigInt, step: BigInt) -> RunResult<PyRef> {
    if step.is_zero() {
        return Err(ExcType::value_error("range() arg 3 must not be zero"));
    }
    Ok(PyObject::new(
        types::registry().range_type.clone(),
        Payload::Range(RangeData { start, stop, step }),
    ))
}

/// A slice value.
pub(crate) fn slice_value(start: PyRef, stop: PyRef, step: PyRef) -> PyRef {
    PyObject::new(
        types::registry().slice_type.clone(),
        Payload::Slice(SliceData { start, stop, step }),
    )
}

/// A code-object value.
pub(crate) fn code_value(code: Rc<Code>) -> PyRef {
    PyObject::new(types::registry().code_type.clone(), Payload::Code(code))
}

/// A cell value, optionally pre-filled.
pub(crate) fn cell_value(initial: Option<PyRef>) -> PyRef {
    PyObject::new(types::registry().cell_type.clone(), Payload::Cell(RefCell::new(initial)))
}

/// A user-function value.
pub(crate) fn function_value(data: FunctionData) -> PyRef {
    PyObject::new(types::registry().function_type.clone(), Payload::Function(data))
}

/// A bound-method value pairing a callable with its receiver.
pub(crate) fn bound_method(func: PyRef, receiver: PyRef) -> PyRef {
    PyObject::new(
        types::registry().bound_method_type.clone(),
        Payload::BoundMethod { func, receiver },
    )
}

/// A type descriptor as a value.
///
/// Builtin descriptors come back as their canonical shared type object, so
/// `type(x) is int` holds; host-built user types get a fresh wrapper.
pub(crate) fn type_value(ty: TypeRef) -> PyRef {
    let registry = types::registry();
    if let Some(canonical) = registry.type_object(&ty) {
        return canonical;
    }
    PyObject::new(registry.type_type.clone(), Payload::Type(ty))
}

/// A module value.
pub(crate) fn module_value(module: Rc<ModuleData>) -> PyRef {
    PyObject::new(types::registry().module_type.clone(), Payload::Module(module))
}

/// A generator value.
pub(crate) fn generator_value(data: GeneratorData) -> PyRef {
    PyObject::new(types::registry().generator_type.clone(), Payload::Generator(data))
}

/// An exception instance of the given (possibly user-defined) type.
pub(crate) fn exception_value(ty: TypeRef, data: ExcData) -> PyRef {
    PyObject::with_dict(ty, Payload::Exception(data))
}

/// A native iterator value.
pub(crate) fn iterator_value(state: IterState) -> PyRef {
    PyObject::new(types::registry().iterator_type.clone(), Payload::Iterator(RefCell::new(state)))
}

/// A traceback value.
pub(crate) fn traceback_value(records: Vec<TraceRecord>) -> PyRef {
    PyObject::new(types::registry().traceback_type.clone(), Payload::Traceback(records))
}

/// A bare instance of a user type; state lives in its instance dict.
pub(crate) fn instance_value(ty: TypeRef) -> PyRef {
    PyObject::with_dict(ty, Payload::Instance)
}

/// Materializes a constant-pool entry as a runtime value.
///
/// Small integers and singletons come back interned, so two loads of the
/// same constant are identical objects.
pub(crate) fn const_to_value(constant: &Const) -> PyRef {
    match constant {
        Const::None => none(),
        Const::Bool(b) => bool_value(*b),
        Const::Int(i) => int_from_i64(*i),
        Const::BigInt(i) => int_value(i.clone()),
        Const::Str(s) => str_value(Rc::clone(s)),
        Const::Tuple(items) => tuple(items.iter().map(const_to_value).collect()),
        Const::Code(code) => code_value(Rc::clone(code)),
    }
}

// ---------------------------------------------------------------------------
// Native operations (no dispatch re-entry)
// ---------------------------------------------------------------------------

/// The integer content of an int or bool value.
pub(crate) fn int_of(value: &PyRef) -> Option<BigInt> {
    match value.payload() {
        Payload::Int(i) => Some(i.clone()),
        Payload::Bool(b) => Some(BigInt::from(u8::from(*b))),
        _ => None,
    }
}

/// The truth value, for kinds that can answer without dispatch.
///
/// Returns `None` for instances of user types, which route through
/// `__bool__`/`__len__` in the evaluator.
pub(crate) fn is_truthy_native(value: &PyRef) -> Option<bool> {
    match value.payload() {
        Payload::None => Some(false),
        Payload::Bool(b) => Some(*b),
        Payload::Int(i) => Some(!i.is_zero()),
        Payload::Str(s) => Some(!s.is_empty()),
        Payload::Tuple(items) => Some(!items.is_empty()),
        Payload::List(items) => Some(!items.borrow().is_empty()),
        Payload::Dict(dict) => Some(!dict.borrow().is_empty()),
        Payload::Set(set) => Some(!set.borrow().is_empty()),
        Payload::Range(range) => Some(range.len().is_positive()),
        Payload::Instance => None,
        _ => Some(true),
    }
}

/// The length, for kinds that have one.
pub(crate) fn py_len(value: &PyRef) -> Option<usize> {
    match value.payload() {
        Payload::Str(s) => Some(s.chars().count()),
        Payload::Tuple(items) => Some(items.len()),
        Payload::List(items) => Some(items.borrow().len()),
        Payload::Dict(dict) => Some(dict.borrow().len()),
        Payload::Set(set) => Some(set.borrow().len()),
        Payload::Range(range) => range.len().to_usize(),
        _ => None,
    }
}

/// Structural equality between builtin kinds.
///
/// Returns `None` when neither side can answer natively (the
/// `NotImplemented` fallthrough: dispatch then consults magic methods and
/// finally defaults to identity). Bool and int compare as numbers.
pub(crate) fn native_eq(a: &PyRef, b: &PyRef) -> Option<bool> {
    if Rc::ptr_eq(a, b) {
        return Some(true);
    }
    match (a.payload(), b.payload()) {
        (Payload::None, Payload::None) | (Payload::NotImplemented, Payload::NotImplemented) => Some(true),
        (Payload::Int(_) | Payload::Bool(_), Payload::Int(_) | Payload::Bool(_)) => {
            Some(int_of(a) == int_of(b))
        }
        (Payload::Str(x), Payload::Str(y)) => Some(x == y),
        (Payload::Tuple(x), Payload::Tuple(y)) => seq_eq(x, y),
        (Payload::List(x), Payload::List(y)) => seq_eq(&x.borrow(), &y.borrow()),
        (Payload::Dict(x), Payload::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Some(false);
            }
            for (key, entry) in x.entries.iter() {
                match y.entries.get(key) {
                    Some(other) => match native_eq(&entry.value, &other.value) {
                        Some(true) => {}
                        Some(false) => return Some(false),
                        None => {
                            if !Rc::ptr_eq(&entry.value, &other.value) {
                                return Some(false);
                            }
                        }
                    },
                    None => return Some(false),
                }
            }
            Some(true)
        }
        (Payload::Set(x), Payload::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            Some(x.len() == y.len() && x.is_subset(&y))
        }
        (Payload::Range(x), Payload::Range(y)) => {
            // Ranges compare as the sequences they produce.
            let len = x.len();
            if len != y.len() {
                return Some(false);
            }
            if len.is_zero() {
                return Some(true);
            }
            if x.start != y.start {
                return Some(false);
            }
            Some(len == BigInt::from(1) || x.step == y.step)
        }
        _ => None,
    }
}

fn seq_eq(a: &[PyRef], b: &[PyRef]) -> Option<bool> {
    if a.len() != b.len() {
        return Some(false);
    }
    for (x, y) in a.iter().zip(b) {
        match native_eq(x, y) {
            Some(true) => {}
            Some(false) => return Some(false),
            None => {
                if !Rc::ptr_eq(x, y) {
                    return Some(false);
                }
            }
        }
    }
    Some(true)
}

/// Native ordering between builtin kinds (ints/bools, text, sequences).
///
/// Returns `None` for pairs with no native order; the evaluator then
/// consults magic methods and finally raises `TypeError`.
pub(crate) fn native_cmp(a: &PyRef, b: &PyRef) -> Option<Ordering> {
    match (a.payload(), b.payload()) {
        (Payload::Int(_) | Payload::Bool(_), Payload::Int(_) | Payload::Bool(_)) => {
            Some(int_of(a)?.cmp(&int_of(b)?))
        }
        (Payload::Str(x), Payload::Str(y)) => Some(x.cmp(y)),
        (Payload::Tuple(x), Payload::Tuple(y)) => seq_cmp(x, y),
        (Payload::List(x), Payload::List(y)) => seq_cmp(&x.borrow(), &y.borrow()),
        _ => None,
    }
}

fn seq_cmp(a: &[PyRef], b: &[PyRef]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match native_eq(x, y) {
            Some(true) => {}
            _ => return native_cmp(x, y),
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Builds a native iterator over a builtin container, or returns `None`
/// for kinds that need protocol dispatch.
pub(crate) fn make_iterator(value: &PyRef) -> Option<PyRef> {
    let state = match value.payload() {
        Payload::Tuple(_) | Payload::List(_) => IterState::Seq {
            seq: value.clone(),
            index: 0,
        },
        Payload::Str(s) => IterState::Chars {
            string: Rc::clone(s),
            byte_index: 0,
        },
        Payload::Range(range) => IterState::Range {
            next: range.start.clone(),
            stop: range.stop.clone(),
            step: range.step.clone(),
        },
        Payload::Dict(_) | Payload::Set(_) => IterState::Entries {
            container: value.clone(),
            index: 0,
        },
        _ => return None,
    };
    Some(iterator_value(state))
}

/// Advances a native iterator; `None` means exhausted (and exhaustion is
/// sticky: the state collapses to `Done`).
pub(crate) fn native_iter_next(iterator: &PyRef) -> Option<PyRef> {
    let Payload::Iterator(state) = iterator.payload() else {
        return None;
    };
    let mut state = state.borrow_mut();
    let produced = match &mut *state {
        IterState::Seq { seq, index } => {
            let item = match seq.payload() {
                Payload::Tuple(items) => items.get(*index).cloned(),
                Payload::List(items) => items.borrow().get(*index).cloned(),
                _ => None,
            };
            if item.is_some() {
                *index += 1;
            }
            item
        }
        IterState::Chars { string, byte_index } => {
            let rest = &string[*byte_index..];
            match rest.chars().next() {
                Some(ch) => {
                    *byte_index += ch.len_utf8();
                    Some(str_value(ch.to_string()))
                }
                None => None,
            }
        }
        IterState::Range { next, stop, step } => {
            let in_bounds = if step.is_positive() { &*next < &*stop } else { &*next > &*stop };
            if in_bounds {
                let item = next.clone();
                *next += &*step;
                Some(int_value(item))
            } else {
                None
            }
        }
        IterState::Entries { container, index } => {
            let item = match container.payload() {
                Payload::Dict(dict) => dict.borrow().get_index(*index).map(|(key, _)| key.clone()),
                Payload::Set(set) => set.borrow().get_index(*index).cloned(),
                _ => None,
            };
            if item.is_some() {
                *index += 1;
            }
            item
        }
        IterState::Done => None,
    };
    if produced.is_none() {
        *state = IterState::Done;
    }
    produced
}

// ---------------------------------------------------------------------------
// repr / str
// ---------------------------------------------------------------------------

/// Python `repr()` for builtin kinds, with a cycle guard so self-referential
/// containers render as `[...]`/`{...}` instead of recursing forever.
pub(crate) fn py_repr(value: &PyRef) -> String {
    let mut out = String::new();
    repr_into(value, &mut out, &mut Vec::new());
    out
}

/// Python `str()` for builtin kinds: text verbatim, exception messages, and
/// `repr` for everything else.
pub(crate) fn py_str(value: &PyRef) -> String {
    match value.payload() {
        Payload::Str(s) => s.to_string(),
        Payload::Exception(data) => data.message().unwrap_or_default().to_owned(),
        _ => py_repr(value),
    }
}

fn repr_into(value: &PyRef, out: &mut String, seen: &mut Vec<*const PyObject>) {
    let ptr = Rc::as_ptr(value);
    match value.payload() {
        Payload::None => out.push_str("None"),
        Payload::NotImplemented => out.push_str("NotImplemented"),
        Payload::Bool(true) => out.push_str("True"),
        Payload::Bool(false) => out.push_str("False"),
        Payload::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Payload::Str(s) => push_str_repr(s, out),
        Payload::Tuple(items) => {
            if seen.contains(&ptr) {
                out.push_str("(...)");
                return;
            }
            seen.push(ptr);
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_into(item, out, seen);
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
            seen.pop();
        }
        Payload::List(items) => {
            if seen.contains(&ptr) {
                out.push_str("[...]");
                return;
            }
            seen.push(ptr);
            out.push('[');
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_into(item, out, seen);
            }
            out.push(']');
            seen.pop();
        }
        Payload::Dict(dict) => {
            if seen.contains(&ptr) {
                out.push_str("{...}");
                return;
            }
            seen.push(ptr);
            out.push('{');
            for (i, (key, entry)) in dict.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_into(key, out, seen);
                out.push_str(": ");
                repr_into(entry, out, seen);
            }
            out.push('}');
            seen.pop();
        }
        Payload::Set(set) => {
            let set = set.borrow();
            if set.is_empty() {
                out.push_str("set()");
                return;
            }
            if seen.contains(&ptr) {
                out.push_str("set(...)");
                return;
            }
            seen.push(ptr);
            out.push('{');
            for (i, item) in set.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_into(item, out, seen);
            }
            out.push('}');
            seen.pop();
        }
        Payload::Range(range) => {
            if range.step == BigInt::from(1) {
                let _ = write!(out, "range({}, {})", range.start, range.stop);
            } else {
                let _ = write!(out, "range({}, {}, {})", range.start, range.stop, range.step);
            }
        }
        Payload::Slice(slice) => {
            out.push_str("slice(");
            repr_into(&slice.start, out, seen);
            out.push_str(", ");
            repr_into(&slice.stop, out, seen);
            out.push_str(", ");
            repr_into(&slice.step, out, seen);
            out.push(')');
        }
        Payload::Code(code) => {
            let _ = write!(out, "{code}");
        }
        Payload::Cell(_) => {
            let _ = write!(out, "<cell at 0x{:x}>", ptr as usize);
        }
        Payload::Function(data) => {
            let _ = write!(out, "<function {} at 0x{:x}>", data.name(), ptr as usize);
        }
        Payload::Builtin(kind) => {
            let _ = write!(out, "<built-in function {kind}>");
        }
        Payload::BoundMethod { func, receiver } => {
            out.push_str("<bound method ");
            out.push_str(callable_name(func));
            out.push_str(" of ");
            repr_into(receiver, out, seen);
            out.push('>');
        }
        Payload::Type(ty) => {
            let _ = write!(out, "<class '{}'>", ty.name());
        }
        Payload::Module(module) => {
            let _ = write!(out, "<module '{}'>", module.name());
        }
        Payload::Generator(data) => {
            let _ = write!(out, "<generator object {} at 0x{:x}>", data.name(), ptr as usize);
        }
        Payload::Exception(data) => {
            out.push_str(value.type_name());
            out.push('(');
            if let Some(message) = data.message() {
                push_str_repr(message, out);
            }
            out.push(')');
        }
        Payload::Iterator(_) => {
            let _ = write!(out, "<iterator object at 0x{:x}>", ptr as usize);
        }
        Payload::Traceback(_) => {
            let _ = write!(out, "<traceback object at 0x{:x}>", ptr as usize);
        }
        Payload::Instance => {
            let _ = write!(out, "<{} object at 0x{:x}>", value.type_name(), ptr as usize);
        }
    }
}

/// The display name of a callable (functions, builtins, methods).
pub(crate) fn callable_name(value: &PyRef) -> &str {
    match value.payload() {
        Payload::Function(data) => data.name(),
        Payload::Builtin(kind) => kind.as_str(),
        Payload::BoundMethod { func, .. } => callable_name(func),
        Payload::Type(ty) => ty.name(),
        _ => value.type_name(),
    }
}

fn push_str_repr(text: &str, out: &mut String) {
    // Prefer single quotes; switch to double quotes when the text contains a
    // single quote but no double quote, as Python does.
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if (ch as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
}
