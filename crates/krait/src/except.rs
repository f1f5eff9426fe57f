use std::{
    cell::{Cell, RefCell},
    fmt::{self, Write as _},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    types,
    value::{PyRef, bool_value, exception_value, none, str_value, tuple},
};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Builtin exception types supported by the evaluation engine.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Root of the exception hierarchy; `except BaseException:` catches everything.
    BaseException,
    /// Primary exception class; base of every ordinary exception.
    Exception,
    /// Raised into a generator frame when the generator is closed.
    /// Inherits from BaseException, not Exception.
    GeneratorExit,

    // --- ArithmeticError hierarchy ---
    /// Intermediate class for arithmetic errors.
    ArithmeticError,
    /// Subclass of ArithmeticError.
    OverflowError,
    /// Subclass of ArithmeticError.
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    /// Intermediate class for lookup errors.
    LookupError,
    /// Subclass of LookupError.
    IndexError,
    /// Subclass of LookupError.
    KeyError,

    // --- RuntimeError hierarchy ---
    /// Intermediate class for runtime errors.
    RuntimeError,
    /// Subclass of RuntimeError.
    NotImplementedError,
    /// Subclass of RuntimeError.
    RecursionError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - for accessing a local variable before assignment.
    UnboundLocalError,

    // --- Standalone exception types ---
    AttributeError,
    StopIteration,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Returns the direct parent in the builtin exception hierarchy.
    ///
    /// `BaseException` is the root and has no parent; the type registry gives
    /// it the root object type as its descriptor parent instead.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::GeneratorExit => Some(Self::BaseException),
            Self::ArithmeticError
            | Self::LookupError
            | Self::RuntimeError
            | Self::NameError
            | Self::AttributeError
            | Self::StopIteration
            | Self::TypeError
            | Self::ValueError => Some(Self::Exception),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
        }
    }

    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = self;
        loop {
            if current == handler_type {
                return true;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Creates a fresh exception instance value of this type.
    pub(crate) fn instance(self, message: Option<String>) -> PyRef {
        exception_value(types::registry().exc_type(self), ExcData::new(self, message))
    }

    /// Creates a raise-able error of this type with a message.
    pub(crate) fn with_message(self, message: impl Into<String>) -> RunError {
        RunError::Exc(self.instance(Some(message.into())))
    }

    /// Creates a raise-able error of this type with no message.
    pub(crate) fn without_message(self) -> RunError {
        RunError::Exc(self.instance(None))
    }

    /// Creates a TypeError with the given message.
    pub(crate) fn type_error(message: impl Into<String>) -> RunError {
        Self::TypeError.with_message(message)
    }

    /// Creates a ValueError with the given message.
    pub(crate) fn value_error(message: impl Into<String>) -> RunError {
        Self::ValueError.with_message(message)
    }

    /// Creates a NameError for an undefined global or builtin name.
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.with_message(format!("name '{name}' is not defined"))
    }

    /// Creates an UnboundLocalError for a local slot read before assignment.
    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        Self::UnboundLocalError.with_message(format!("local variable '{name}' referenced before assignment"))
    }

    /// Creates an AttributeError for a missing attribute.
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.with_message(format!("'{type_name}' object has no attribute '{attr}'"))
    }
}

/// A single traceback entry: where a frame was executing when an exception
/// passed through it.
///
/// Holds only code identity and a line, never the frame itself, so tracebacks
/// do not keep frames (and everything they reference) alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TraceRecord {
    pub filename: Rc<str>,
    pub line: u32,
    pub function: Rc<str>,
}

/// Payload of an exception instance value.
///
/// `context` is set implicitly when an exception is raised while another is
/// being handled; `cause` is set by `raise X from Y` (which also suppresses
/// the implicit context). The StopIteration return-value payload rides in
/// `stop_value`.
#[derive(Debug)]
pub(crate) struct ExcData {
    kind: ExcType,
    message: Option<String>,
    stop_value: RefCell<Option<PyRef>>,
    context: RefCell<Option<PyRef>>,
    cause: RefCell<Option<PyRef>>,
    suppress_context: Cell<bool>,
    traceback: RefCell<Vec<TraceRecord>>,
}

impl ExcData {
    /// Creates a new exception payload with no traceback.
    pub fn new(kind: ExcType, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            stop_value: RefCell::new(None),
            context: RefCell::new(None),
            cause: RefCell::new(None),
            suppress_context: Cell::new(false),
            traceback: RefCell::new(Vec::new()),
        }
    }

    /// The nearest builtin exception type (for `except` matching).
    pub fn kind(&self) -> ExcType {
        self.kind
    }

    /// The message text, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Appends a traceback record (innermost-first order).
    pub fn push_record(&self, record: TraceRecord) {
        self.traceback.borrow_mut().push(record);
    }

    /// Returns a copy of the traceback chain, innermost-first.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.traceback.borrow().clone()
    }

    /// Sets the implicit context exception, unless one is already present.
    pub fn set_context(&self, context: PyRef) {
        let mut slot = self.context.borrow_mut();
        if slot.is_none() {
            *slot = Some(context);
        }
    }

    /// The implicit context exception, if any.
    pub fn context(&self) -> Option<PyRef> {
        self.context.borrow().clone()
    }

    /// Sets the explicit cause (`raise X from Y`) and suppresses the context.
    pub fn set_cause(&self, cause: Option<PyRef>) {
        *self.cause.borrow_mut() = cause;
        self.suppress_context.set(true);
    }

    /// The explicit cause exception, if any.
    pub fn cause(&self) -> Option<PyRef> {
        self.cause.borrow().clone()
    }

    /// Whether implicit-context display is suppressed.
    pub fn suppresses_context(&self) -> bool {
        self.suppress_context.get()
    }

    /// Stores the generator return value on a StopIteration instance.
    pub fn set_stop_value(&self, value: PyRef) {
        *self.stop_value.borrow_mut() = Some(value);
    }

    /// The generator return value carried by a StopIteration instance.
    pub fn stop_value(&self) -> Option<PyRef> {
        self.stop_value.borrow().clone()
    }

    /// Builds the value for a `__next__`-style raise: `(message,)` args tuple
    /// equivalent, reduced to the payload actually used by the core.
    pub fn value_payload(&self) -> PyRef {
        if let Some(value) = self.stop_value() {
            return value;
        }
        match self.message() {
            Some(message) => str_value(message),
            None => none(),
        }
    }

    /// The exception's `args`-equivalent tuple used by repr.
    pub fn args_tuple(&self) -> PyRef {
        match &self.message {
            Some(message) => tuple(vec![str_value(message.as_str())]),
            None => tuple(Vec::new()),
        }
    }

    /// A best-effort copy of some well-known attributes (`args`) for
    /// attribute lookup on exception instances.
    pub fn attr(&self, name: &str) -> Option<PyRef> {
        match name {
            "args" => Some(self.args_tuple()),
            "value" if self.kind == ExcType::StopIteration => Some(self.value_payload()),
            "__cause__" => Some(self.cause().unwrap_or_else(none)),
            "__context__" => Some(self.context().unwrap_or_else(none)),
            "__suppress_context__" => Some(bool_value(self.suppresses_context())),
            _ => None,
        }
    }
}

/// An interpreter-fatal error: a bug in the code object or the engine.
///
/// Fatal errors are never converted to user-level exceptions and cannot be
/// caught by `try`/`except`; they terminate the run with a diagnostic
/// identifying the offending instruction and frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    message: String,
    opcode: Option<String>,
    ip: Option<usize>,
    frame: Option<String>,
}

impl FatalError {
    /// Creates a fatal error with a bare message.
    #[must_use]
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            opcode: None,
            ip: None,
            frame: None,
        }
    }

    /// Attaches the instruction/frame context, if not already present.
    pub(crate) fn with_context(mut self, opcode: &str, ip: usize, frame: &str) -> Self {
        if self.opcode.is_none() {
            self.opcode = Some(opcode.to_owned());
            self.ip = Some(ip);
            self.frame = Some(frame.to_owned());
        }
        self
    }

    /// The diagnostic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal interpreter error: {}", self.message)?;
        if let (Some(opcode), Some(ip), Some(frame)) = (&self.opcode, self.ip, &self.frame) {
            write!(f, " (while executing {opcode} at ip {ip} in {frame})")?;
        }
        Ok(())
    }
}

impl std::error::Error for FatalError {}

/// Error produced while the evaluator is running.
///
/// The two variants are the two strictly separated error planes: `Exc` is a
/// user-level exception instance that unwinds through the block stack, and
/// `Fatal` terminates the interpreter.
#[derive(Debug)]
pub(crate) enum RunError {
    /// A user-level exception instance (always `Payload::Exception`).
    Exc(PyRef),
    /// An interpreter-fatal error; never catchable.
    Fatal(FatalError),
}

impl RunError {
    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(FatalError::new(message))
    }

    /// The builtin exception kind carried by this error, if it is one.
    pub fn exc_kind(&self) -> Option<ExcType> {
        match self {
            Self::Exc(value) => value.as_exception().map(ExcData::kind),
            Self::Fatal(_) => None,
        }
    }

    /// Whether this error is a user exception matching the given type.
    pub fn is_exc_kind(&self, handler: ExcType) -> bool {
        self.exc_kind().is_some_and(|kind| kind.is_subclass_of(handler))
    }
}

/// One rendered traceback frame of a reported exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Filename from the code object the frame was executing.
    pub filename: String,
    /// Source line active when the exception passed through.
    pub line: u32,
    /// Function name, or `<module>` for module-level code.
    pub function: String,
}

impl From<&TraceRecord> for StackFrame {
    fn from(record: &TraceRecord) -> Self {
        Self {
            filename: record.filename.to_string(),
            line: record.line,
            function: record.function.to_string(),
        }
    }
}

/// A reported, unhandled exception: the public face of a failed run.
///
/// `Display` renders the canonical multi-line traceback:
///
/// ```text
/// Traceback (most recent call last):
///   File "example.py", line 2, in <module>
///   File "example.py", line 1, in h
/// ZeroDivisionError: division by zero
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    exc_type: ExcType,
    type_name: String,
    message: Option<String>,
    frames: Vec<StackFrame>,
}

impl Exception {
    /// Builds the public exception from a runtime exception instance.
    ///
    /// Traceback records are stored innermost-first at runtime and reversed
    /// here into display order (outermost-first).
    pub(crate) fn from_value(value: &PyRef) -> Self {
        let data = value.as_exception().expect("exception value carries ExcData");
        let frames = data.records().iter().rev().map(StackFrame::from).collect();
        Self {
            exc_type: data.kind(),
            type_name: value.type_name().to_owned(),
            message: data.message().map(str::to_owned),
            frames,
        }
    }

    /// Creates an exception report directly (used by hosts and tests).
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>, frames: Vec<StackFrame>) -> Self {
        Self {
            exc_type,
            type_name: exc_type.to_string(),
            message,
            frames,
        }
    }

    /// The nearest builtin exception type.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    /// The exception's type name as displayed (user subclass name if any).
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The message text, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Traceback frames, outermost-first.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Converts this report back into a runtime exception instance.
    pub(crate) fn into_value(self) -> PyRef {
        let instance = self.exc_type.instance(self.message);
        if let Some(data) = instance.as_exception() {
            for frame in self.frames.iter().rev() {
                data.push_record(TraceRecord {
                    filename: Rc::from(frame.filename.as_str()),
                    line: frame.line,
                    function: Rc::from(frame.function.as_str()),
                });
            }
        }
        instance
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if !self.frames.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for frame in &self.frames {
                let _ = writeln!(
                    out,
                    "  File \"{}\", line {}, in {}",
                    frame.filename, frame.line, frame.function
                );
            }
        }
        match &self.message {
            Some(message) => {
                let _ = write!(out, "{}: {}", self.type_name, message);
            }
            None => out.push_str(&self.type_name),
        }
        f.write_str(&out)
    }
}

impl std::error::Error for Exception {}

/// Converts an exception instance into a StopIteration-style raise carrying
/// a generator return value.
pub(crate) fn stop_iteration_with_value(value: PyRef) -> RunError {
    let instance = ExcType::StopIteration.instance(None);
    if let Some(data) = instance.as_exception()
        && !value.is_none()
    {
        data.set_stop_value(value);
    }
    RunError::Exc(instance)
}

/// Formats an IndexError message for sequence kinds.
pub(crate) fn index_error(kind_name: &str) -> RunError {
    ExcType::IndexError.with_message(format!("{kind_name} index out of range"))
}

/// Creates a KeyError whose message is the repr of the missing key.
pub(crate) fn key_error(key_repr: String) -> RunError {
    ExcType::KeyError.with_message(key_repr)
}

/// Creates the ZeroDivisionError for true/floor division and modulo.
pub(crate) fn zero_division(modulo: bool) -> RunError {
    if modulo {
        ExcType::ZeroDivisionError.with_message("integer division or modulo by zero")
    } else {
        ExcType::ZeroDivisionError.with_message("division by zero")
    }
}

/// Creates an OverflowError for an out-of-range shift or repeat count.
pub(crate) fn overflow_error(message: impl Into<String>) -> RunError {
    ExcType::OverflowError.with_message(message)
}
