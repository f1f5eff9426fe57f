//! Per-invocation execution context.
//!
//! A frame owns one call's mutable state: the slot-addressed locals, the
//! bounded value stack, the block stack used for exception unwinding, the
//! instruction pointer, and the handled-exception slot. Frames belong to the
//! evaluator's call stack, except generator frames, which are owned by their
//! generator across suspensions.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    code::Code,
    except::{RunError, RunResult},
    module::ModuleData,
    value::{Payload, PyRef, cell_value},
};

/// Block kinds an active frame may have open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// A loop; popped and skipped during unwinding.
    Loop,
    /// A `try` with handlers; receives the exception, its type, and a
    /// traceback marker on entry.
    Except,
    /// A `try`/`finally`; receives the in-flight exception on entry.
    Finally,
    /// A `with` body; the unwinder calls the saved `__exit__`.
    With,
}

/// One entry on the block stack: kind, handler target, and the value-stack
/// depth to restore when unwinding into the handler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    pub level: usize,
}

/// One invocation's mutable execution context.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The code being executed.
    pub code: Rc<Code>,
    /// Module whose mapping serves as this frame's globals.
    pub module: Rc<ModuleData>,
    /// The function being executed; `None` for module-level code.
    pub function: Option<PyRef>,
    /// Local slots, one per varname; `None` means unbound.
    pub locals: Vec<Option<PyRef>>,
    /// Cells: one per cellvar (created here) then one per freevar (shared
    /// with the defining frame through the function's closure).
    pub cells: Vec<PyRef>,
    /// The value stack, bounded by the code's declared maximum.
    pub stack: Vec<PyRef>,
    /// Open blocks, innermost last.
    pub blocks: SmallVec<[Block; 4]>,
    /// Logical index of the next instruction.
    pub ip: usize,
    /// Source line of the last fetched instruction.
    pub line: u32,
    /// The exception currently being handled by an except block, for bare
    /// `raise` and implicit context chaining.
    pub pending_exc: Option<PyRef>,
    /// Whether this frame is a generator body.
    pub in_generator: bool,
}

impl Frame {
    /// Creates the frame for module-level code.
    pub fn for_module(code: Rc<Code>, module: Rc<ModuleData>) -> Self {
        let line = code.first_line;
        let nlocals = code.varnames.len();
        let cells = code.cellvars.iter().map(|_| cell_value(None)).collect();
        let stack = Vec::with_capacity(code.stack_size as usize);
        Self {
            code,
            module,
            function: None,
            locals: vec![None; nlocals],
            cells,
            stack,
            blocks: SmallVec::new(),
            ip: 0,
            line,
            pending_exc: None,
            in_generator: false,
        }
    }

    /// Creates a frame for a bound function call.
    ///
    /// `locals` comes from signature binding. Cellvars that shadow a
    /// parameter start filled with the bound value; freevar cells are shared
    /// from the function's closure.
    pub fn for_call(function: PyRef, locals: Vec<Option<PyRef>>) -> RunResult<Self> {
        let Payload::Function(data) = function.payload() else {
            return Err(RunError::fatal("frame construction requires a function value"));
        };
        let code = Rc::clone(data.code());
        let module = Rc::clone(data.module());
        if data.closure().len() != code.freevars.len() {
            return Err(RunError::fatal(format!(
                "closure size mismatch in {}: {} cells for {} free variables",
                data.name(),
                data.closure().len(),
                code.freevars.len(),
            )));
        }
        let mut cells = Vec::with_capacity(code.cell_count());
        for name in &code.cellvars {
            let captured_param = code
                .varnames
                .iter()
                .position(|varname| varname == name)
                .and_then(|slot| locals.get(slot).cloned().flatten());
            cells.push(cell_value(captured_param));
        }
        cells.extend(data.closure().iter().cloned());
        let line = code.first_line;
        let stack = Vec::with_capacity(code.stack_size as usize);
        Ok(Self {
            code,
            module,
            function: Some(function),
            locals,
            cells,
            stack,
            blocks: SmallVec::new(),
            ip: 0,
            line,
            pending_exc: None,
            in_generator: false,
        })
    }

    /// The name shown in tracebacks: the function name, or `<module>`.
    pub fn name(&self) -> &str {
        if self.function.is_some() { &self.code.codename } else { "<module>" }
    }

    /// Pushes a value; exceeding the declared maximum depth is fatal.
    pub fn push(&mut self, value: PyRef) -> RunResult<()> {
        if self.stack.len() >= self.code.stack_size as usize {
            return Err(RunError::fatal(format!(
                "value stack overflow: depth {} exceeds declared maximum {}",
                self.stack.len() + 1,
                self.code.stack_size,
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pops a value; an empty stack is fatal.
    pub fn pop(&mut self) -> RunResult<PyRef> {
        self.stack.pop().ok_or_else(|| RunError::fatal("value stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> RunResult<Vec<PyRef>> {
        if self.stack.len() < n {
            return Err(RunError::fatal(format!(
                "value stack underflow: need {n} values, have {}",
                self.stack.len(),
            )));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// The value at TOS without popping.
    pub fn peek(&self) -> RunResult<&PyRef> {
        self.stack.last().ok_or_else(|| RunError::fatal("value stack underflow"))
    }

    /// The value `depth` slots below TOS (1 = TOS).
    pub fn peek_at(&self, depth: usize) -> RunResult<&PyRef> {
        if depth == 0 || depth > self.stack.len() {
            return Err(RunError::fatal("value stack underflow"));
        }
        Ok(&self.stack[self.stack.len() - depth])
    }
}
