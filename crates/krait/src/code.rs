//! The immutable code object.
//!
//! A [`Code`] is pure data produced by the external decoder (or by
//! [`CodeBuilder`](crate::CodeBuilder)): the decoded instruction stream plus
//! the pools it indexes into. The evaluator reads it and never mutates it.

use std::{cell::OnceCell, fmt, rc::Rc};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::{opcode::Instr, signature::Signature};

/// Code-object flag bits.
///
/// `VARARGS`/`VARKWARGS` mark the trailing `*args`/`**kwargs` slots in
/// `varnames`; `GENERATOR` makes calls produce a generator instead of
/// executing; `ASYNC` and `NESTED` are carried through from the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// The function accepts `*args`.
    pub const VARARGS: Self = Self(1 << 0);
    /// The function accepts `**kwargs`.
    pub const VARKWARGS: Self = Self(1 << 1);
    /// The body contains `yield`; calling creates a generator.
    pub const GENERATOR: Self = Self(1 << 2);
    /// The function was declared `async def`.
    pub const ASYNC: Self = Self(1 << 3);
    /// The code object is nested inside another function.
    pub const NESTED: Self = Self(1 << 4);

    /// The empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Reconstructs flags from a raw bit pattern.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A constant-pool entry.
///
/// Constants are plain data so code objects stay serializable; the evaluator
/// materializes runtime values on `LoadConst` (interned where applicable, so
/// repeated loads of small ints and singletons share one object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Const {
    /// The `None` singleton.
    None,
    /// `True` or `False`.
    Bool(bool),
    /// A machine-width integer constant.
    Int(i64),
    /// An integer constant beyond machine width.
    BigInt(BigInt),
    /// A text constant.
    Str(Rc<str>),
    /// A tuple of constants.
    Tuple(Vec<Const>),
    /// A nested code object (function bodies).
    Code(Rc<Code>),
}

impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            // Code constants are deduplicated by identity only.
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The immutable compiled representation of one function or module body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Code {
    /// Decoded instruction stream, indexed by the logical instruction pointer.
    pub instructions: Vec<Instr>,
    /// Source line per instruction (parallel to `instructions`).
    pub lines: Vec<u32>,
    /// Constant pool referenced by `LoadConst`.
    pub consts: Vec<Const>,
    /// Global and attribute names referenced by index.
    pub names: Vec<Rc<str>>,
    /// Parameter names then local variables, by slot index.
    pub varnames: Vec<Rc<str>>,
    /// Names of variables enclosed by inner functions.
    pub cellvars: Vec<Rc<str>>,
    /// Names of variables captured from the enclosing scope.
    pub freevars: Vec<Rc<str>>,
    /// Number of positional parameters.
    pub arg_count: u32,
    /// Number of keyword-only parameters.
    pub kwonly_arg_count: u32,
    /// Flag set (`VARARGS`, `VARKWARGS`, `GENERATOR`, `ASYNC`, `NESTED`).
    pub flags: CodeFlags,
    /// Declared maximum value-stack depth.
    pub stack_size: u32,
    /// Filename for tracebacks.
    pub filename: Rc<str>,
    /// Function name, or `<module>` for module bodies.
    pub codename: Rc<str>,
    /// First source line of the body.
    pub first_line: u32,
    /// Signature derived once from the parameter metadata above.
    #[serde(skip)]
    signature: OnceCell<Rc<Signature>>,
}

impl Code {
    /// Creates a code object from decoded parts.
    ///
    /// `lines` may be shorter than `instructions`; missing entries fall back
    /// to `first_line`.
    #[expect(clippy::too_many_arguments, reason = "mirrors the decoder's schema")]
    #[must_use]
    pub fn new(
        instructions: Vec<Instr>,
        lines: Vec<u32>,
        consts: Vec<Const>,
        names: Vec<Rc<str>>,
        varnames: Vec<Rc<str>>,
        cellvars: Vec<Rc<str>>,
        freevars: Vec<Rc<str>>,
        arg_count: u32,
        kwonly_arg_count: u32,
        flags: CodeFlags,
        stack_size: u32,
        filename: Rc<str>,
        codename: Rc<str>,
        first_line: u32,
    ) -> Self {
        Self {
            instructions,
            lines,
            consts,
            names,
            varnames,
            cellvars,
            freevars,
            arg_count,
            kwonly_arg_count,
            flags,
            stack_size,
            filename,
            codename,
            first_line,
            signature: OnceCell::new(),
        }
    }

    /// The source line for the instruction at `ip`.
    #[must_use]
    pub fn line_for(&self, ip: usize) -> u32 {
        self.lines.get(ip).copied().unwrap_or(self.first_line)
    }

    /// The cached signature derived from this code object.
    pub(crate) fn signature(&self) -> &Rc<Signature> {
        self.signature.get_or_init(|| Rc::new(Signature::from_code(self)))
    }

    /// Whether calls to this code produce a generator.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Total number of cell slots a frame of this code carries
    /// (cellvars then freevars).
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code object {}, file \"{}\", line {}>", self.codename, self.filename, self.first_line)
    }
}
