//! Evaluator tracing hooks.
//!
//! The dispatch loop is parameterized over a [`VmTracer`], so the production
//! default [`NoopTracer`] monomorphizes every hook away to nothing. Passing
//! [`StderrTracer`] instead turns on the debug-trace toggle: one line per
//! executed instruction on the standard error stream.

use ahash::AHashMap;

use crate::opcode::Opcode;

/// Trait for evaluator execution tracing.
///
/// All methods have default no-op implementations; implementations only
/// override the hooks they care about. The instruction hook is the hottest
/// path in the interpreter, so keep overrides lightweight.
pub trait VmTracer {
    /// Called before each instruction is executed.
    ///
    /// # Arguments
    /// * `ip` - Logical index of the instruction in the code object
    /// * `opcode` - The opcode about to be executed
    /// * `stack_depth` - Current frame's value-stack depth
    /// * `frame_depth` - Number of frames on the call stack
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    /// Called when a new call frame is pushed.
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when a call frame is popped (return or unwind).
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when an exception begins unwinding.
    #[inline(always)]
    fn on_raise(&mut self, _exc_name: &str, _frame_depth: usize) {}
}

/// A tracer that does nothing; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [    0] LoadConst        stack=0  frames=1
/// [    1] ReturnValue      stack=1  frames=1
///   >>> call f             depth=2
///   <<< return             depth=1
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl StderrTracer {
    /// Creates a new `StderrTracer`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        eprintln!("[{ip:>5}] {opcode:<16} stack={stack_depth}  frames={frame_depth}");
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        eprintln!("  >>> call {func_name:<14} depth={depth}");
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("  <<< return             depth={depth}");
    }

    fn on_raise(&mut self, exc_name: &str, frame_depth: usize) {
        eprintln!("  !!! raise {exc_name:<13} frames={frame_depth}");
    }
}

/// Tracer that counts executed instructions and records stack high-water marks.
///
/// Cheap enough for tests that assert on execution shape (instruction counts,
/// peak stack depth vs the code object's declared maximum).
#[derive(Debug, Clone, Default)]
pub struct CountingTracer {
    instructions: u64,
    max_stack_depth: usize,
    max_frame_depth: usize,
    opcode_counts: AHashMap<Opcode, u64>,
}

impl CountingTracer {
    /// Creates a new `CountingTracer`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of instructions executed.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Highest value-stack depth observed before any instruction.
    #[must_use]
    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    /// Highest call-frame depth observed.
    #[must_use]
    pub fn max_frame_depth(&self) -> usize {
        self.max_frame_depth
    }

    /// Number of times a given opcode was executed.
    #[must_use]
    pub fn count_of(&self, opcode: Opcode) -> u64 {
        self.opcode_counts.get(&opcode).copied().unwrap_or(0)
    }
}

impl VmTracer for CountingTracer {
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, stack_depth: usize, frame_depth: usize) {
        self.instructions += 1;
        self.max_stack_depth = self.max_stack_depth.max(stack_depth);
        self.max_frame_depth = self.max_frame_depth.max(frame_depth);
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
    }
}
