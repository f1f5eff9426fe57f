//! The decoded instruction model.
//!
//! The core consumes instructions already decoded by the external reader:
//! a flat sequence of [`Instr`] (opcode + integer argument) indexed by a
//! logical instruction pointer. Jump arguments are absolute logical indices;
//! the mapping from raw byte offsets is the decoder's concern.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// One decoded instruction: opcode plus integer argument.
///
/// Opcodes without an operand carry `arg == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    /// The operation to perform.
    pub op: Opcode,
    /// Operand: pool index, jump target, count, or operator kind.
    pub arg: u32,
}

impl Instr {
    /// Creates an instruction.
    #[must_use]
    pub fn new(op: Opcode, arg: u32) -> Self {
        Self { op, arg }
    }
}

/// Canonical decoded opcodes.
///
/// Names are canonical rather than source-specific; the external decoder maps
/// its raw opcode stream onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum Opcode {
    /// Does nothing.
    Nop,
    /// Pops and discards the top of stack.
    PopTop,
    /// Duplicates the top of stack.
    DupTop,
    /// Rotates the top `arg` values: TOS moves down to depth `arg`.
    RotN,
    /// Swaps the top two values.
    Swap,

    /// Pushes constant `arg` from the const pool.
    LoadConst,
    /// Pushes local slot `arg`; raises UnboundLocalError if empty.
    LoadFast,
    /// Pops into local slot `arg`.
    StoreFast,
    /// Marks local slot `arg` empty; raises UnboundLocalError if already empty.
    DeleteFast,
    /// Pushes global `names[arg]`: module globals, then builtins, else NameError.
    LoadGlobal,
    /// Pops into global `names[arg]`.
    StoreGlobal,
    /// Removes global `names[arg]`; raises NameError if absent.
    DeleteGlobal,
    /// Pushes the dereferenced cell `arg` (cellvars then freevars).
    LoadDeref,
    /// Pops into cell `arg`.
    StoreDeref,
    /// Pushes cell `arg` itself (for closure construction).
    LoadClosure,

    /// Arithmetic negation of TOS.
    UnaryNeg,
    /// Arithmetic identity of TOS (still type-checks the operand).
    UnaryPos,
    /// Bitwise inversion of TOS.
    UnaryInvert,
    /// Boolean negation of TOS.
    UnaryNot,
    /// Binary operation; `arg` is a [`BinaryOpKind`] discriminant.
    BinaryOp,
    /// In-place binary operation; `arg` is a [`BinaryOpKind`] discriminant.
    InplaceOp,
    /// Comparison; `arg` is a [`CompareOpKind`] discriminant.
    CompareOp,

    /// Pops `arg` values, pushes a tuple.
    BuildTuple,
    /// Pops `arg` values, pushes a list.
    BuildList,
    /// Pops `arg` values, pushes a set.
    BuildSet,
    /// Pops `2*arg` values (key/value pairs), pushes a dict.
    BuildMap,
    /// Pops `arg` (2 or 3) values, pushes a slice.
    BuildSlice,
    /// Unpacks TOS iterable into exactly `arg` values, pushed right-to-left.
    UnpackSequence,
    /// Appends TOS to the list at stack depth `arg` (comprehensions).
    ListAppend,
    /// Adds TOS to the set at stack depth `arg` (comprehensions).
    SetAdd,
    /// Pops value then key, inserts into the dict at stack depth `arg`.
    MapAdd,

    /// Pushes attribute `names[arg]` of the popped object.
    LoadAttr,
    /// Pops object then value, sets attribute `names[arg]`.
    StoreAttr,
    /// Pops object, deletes attribute `names[arg]`.
    DeleteAttr,
    /// Pops index then container, pushes `container[index]`.
    BinarySubscr,
    /// Pops index, container, value; performs `container[index] = value`.
    StoreSubscr,
    /// Pops index then container; performs `del container[index]`.
    DeleteSubscr,

    /// Unconditional jump to instruction `arg`.
    Jump,
    /// Pops TOS; jumps to `arg` when truthy.
    PopJumpIfTrue,
    /// Pops TOS; jumps to `arg` when falsy.
    PopJumpIfFalse,
    /// Jumps to `arg` keeping TOS when truthy, else pops.
    JumpIfTrueOrPop,
    /// Jumps to `arg` keeping TOS when falsy, else pops.
    JumpIfFalseOrPop,

    /// Replaces TOS with an iterator over it.
    GetIter,
    /// Pushes the next value from the iterator at TOS, or on exhaustion pops
    /// the iterator and jumps to `arg`.
    ForIter,

    /// Pushes a LOOP block; `arg` is the after-loop target.
    SetupLoop,
    /// Pushes an EXCEPT block; `arg` is the handler target.
    SetupExcept,
    /// Pushes a FINALLY block; `arg` is the finally-body target.
    SetupFinally,
    /// Enters a context manager: pops it, pushes its bound `__exit__` and the
    /// `__enter__` result, and pushes a WITH block with handler `arg`.
    SetupWith,
    /// Pops the innermost block.
    PopBlock,
    /// Clears the frame's handled-exception state at the end of a handler.
    PopExcept,
    /// Pushes the no-exception marker before falling into a finally body.
    BeginFinally,
    /// Pops the finally marker: re-raises a pending exception or falls through.
    EndFinally,
    /// Unwinds the block stack to the innermost LOOP block and jumps to its
    /// after-loop target.
    BreakLoop,

    /// Calls TOS-`arg` with `arg` positional arguments.
    CallFunction,
    /// Calls with `arg` total arguments; TOS is a const tuple naming the
    /// trailing keyword arguments.
    CallFunctionKw,
    /// Calls with an iterable of positional args (and a mapping of keyword
    /// args when `arg & 1`).
    CallFunctionEx,
    /// Pops the return value and leaves the frame.
    ReturnValue,
    /// Pops a value and suspends the generator frame.
    YieldValue,
    /// Raises: `arg` 0 re-raises the handled exception, 1 raises TOS,
    /// 2 raises TOS1 from TOS.
    RaiseVarargs,
    /// Builds a function object; `arg` bits: 0x01 defaults tuple, 0x02
    /// keyword-only defaults dict, 0x08 closure tuple; code object on top.
    MakeFunction,

    /// Import is outside the core: always raises NotImplementedError.
    ImportName,
}

impl Opcode {
    /// Whether the operand is an absolute jump target.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::PopJumpIfTrue
                | Self::PopJumpIfFalse
                | Self::JumpIfTrueOrPop
                | Self::JumpIfFalseOrPop
                | Self::ForIter
                | Self::SetupLoop
                | Self::SetupExcept
                | Self::SetupFinally
                | Self::SetupWith
        )
    }

    /// Net value-stack effect of executing this opcode with operand `arg`,
    /// along the fall-through path.
    ///
    /// Used by `CodeBuilder` to compute the declared maximum stack depth.
    /// Call-shaped opcodes derive their effect from the operand; jump-taken
    /// paths are accounted separately by the builder.
    #[must_use]
    pub(crate) fn stack_effect(self, arg: u32) -> i32 {
        let arg_i = arg as i32;
        match self {
            Self::Nop
            | Self::RotN
            | Self::Swap
            | Self::DeleteFast
            | Self::DeleteGlobal
            | Self::UnaryNeg
            | Self::UnaryPos
            | Self::UnaryInvert
            | Self::UnaryNot
            | Self::LoadAttr
            | Self::Jump
            | Self::GetIter
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally
            | Self::PopBlock
            | Self::PopExcept
            | Self::EndFinally
            | Self::BreakLoop
            | Self::ImportName => 0,
            Self::PopTop
            | Self::StoreFast
            | Self::StoreGlobal
            | Self::StoreDeref
            | Self::BinaryOp
            | Self::InplaceOp
            | Self::CompareOp
            | Self::DeleteAttr
            | Self::BinarySubscr
            | Self::PopJumpIfTrue
            | Self::PopJumpIfFalse
            | Self::JumpIfTrueOrPop
            | Self::JumpIfFalseOrPop
            | Self::ListAppend
            | Self::SetAdd
            | Self::ReturnValue
            | Self::YieldValue => -1,
            Self::DupTop
            | Self::LoadConst
            | Self::LoadFast
            | Self::LoadGlobal
            | Self::LoadDeref
            | Self::LoadClosure
            | Self::BeginFinally
            | Self::ForIter => 1,
            Self::SetupWith => 1,
            Self::StoreAttr | Self::MapAdd | Self::DeleteSubscr => -2,
            Self::StoreSubscr => -3,
            Self::BuildTuple | Self::BuildList | Self::BuildSet | Self::BuildSlice => 1 - arg_i,
            Self::BuildMap => 1 - 2 * arg_i,
            Self::UnpackSequence => arg_i - 1,
            Self::CallFunction => -arg_i,
            // Pops the kw-names tuple, the arg values, and the callable.
            Self::CallFunctionKw => -arg_i - 1,
            // Pops the callable, the args iterable, and the optional mapping.
            Self::CallFunctionEx => {
                if arg & 1 == 1 {
                    -2
                } else {
                    -1
                }
            }
            Self::RaiseVarargs => -arg_i,
            Self::MakeFunction => {
                let mut popped = 1; // code object
                if arg & 0x01 != 0 {
                    popped += 1;
                }
                if arg & 0x02 != 0 {
                    popped += 1;
                }
                if arg & 0x08 != 0 {
                    popped += 1;
                }
                1 - popped
            }
        }
    }
}

/// Operator kinds carried by `BinaryOp`/`InplaceOp` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, Serialize, Deserialize)]
#[repr(u32)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOpKind {
    /// The operator's surface syntax, for error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }

    /// The magic method consulted on the left operand.
    #[must_use]
    pub(crate) fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::Sub => "__sub__",
            Self::Mul => "__mul__",
            Self::TrueDiv => "__truediv__",
            Self::FloorDiv => "__floordiv__",
            Self::Mod => "__mod__",
            Self::Pow => "__pow__",
            Self::LShift => "__lshift__",
            Self::RShift => "__rshift__",
            Self::BitAnd => "__and__",
            Self::BitOr => "__or__",
            Self::BitXor => "__xor__",
        }
    }

    /// The reflected magic method consulted on the right operand.
    #[must_use]
    pub(crate) fn reflected_dunder(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::Sub => "__rsub__",
            Self::Mul => "__rmul__",
            Self::TrueDiv => "__rtruediv__",
            Self::FloorDiv => "__rfloordiv__",
            Self::Mod => "__rmod__",
            Self::Pow => "__rpow__",
            Self::LShift => "__rlshift__",
            Self::RShift => "__rrshift__",
            Self::BitAnd => "__rand__",
            Self::BitOr => "__ror__",
            Self::BitXor => "__rxor__",
        }
    }

    /// The in-place magic method consulted first by `InplaceOp`.
    #[must_use]
    pub(crate) fn inplace_dunder(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::Sub => "__isub__",
            Self::Mul => "__imul__",
            Self::TrueDiv => "__itruediv__",
            Self::FloorDiv => "__ifloordiv__",
            Self::Mod => "__imod__",
            Self::Pow => "__ipow__",
            Self::LShift => "__ilshift__",
            Self::RShift => "__irshift__",
            Self::BitAnd => "__iand__",
            Self::BitOr => "__ior__",
            Self::BitXor => "__ixor__",
        }
    }
}

/// Comparison kinds carried by `CompareOp` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, Serialize, Deserialize)]
#[repr(u32)]
pub enum CompareOpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    In,
    NotIn,
    /// Exception-handler matching; left is the raised exception (or its
    /// type), right is the handler class or a tuple of classes.
    ExcMatch,
}

impl CompareOpKind {
    /// The comparison's surface syntax, for error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::ExcMatch => "exception match",
        }
    }
}
