//! Builder for constructing decoded code objects.
//!
//! `CodeBuilder` is the construction API the external decoder (and the test
//! suite) uses to produce [`Code`] values: it registers pool entries, emits
//! instructions with per-instruction line tracking, resolves forward jumps
//! through labels, and computes the declared maximum stack depth from the
//! opcodes' stack effects.

use std::rc::Rc;

use crate::{
    code::{Code, CodeFlags, Const},
    opcode::{Instr, Opcode},
};

/// A jump target to be resolved when [`CodeBuilder::bind`] is called.
#[derive(Debug, Clone, Copy)]
pub struct Label(usize);

#[derive(Debug)]
struct LabelInfo {
    /// Resolved instruction index, once bound.
    target: Option<u32>,
    /// Value-stack depth on entry via a jump, recorded by the first jump
    /// emitted to this label.
    entry_depth: Option<i32>,
    /// Instruction indices whose operand awaits the resolved target.
    patch_sites: Vec<usize>,
}

/// Builder for one code object.
///
/// # Usage
///
/// ```ignore
/// let mut b = CodeBuilder::new("example.py", "<module>");
/// b.load_global("print");
/// b.load_const(Const::Int(7));
/// b.emit_arg(Opcode::CallFunction, 1);
/// b.emit(Opcode::PopTop);
/// b.load_const(Const::None);
/// b.emit(Opcode::ReturnValue);
/// let code = b.build();
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
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
    filename: Rc<str>,
    codename: Rc<str>,
    first_line: u32,
    current_line: u32,
    labels: Vec<LabelInfo>,
    depth: i32,
    max_depth: i32,
}

impl CodeBuilder {
    /// Creates a builder for the given filename and code name.
    #[must_use]
    pub fn new(filename: &str, codename: &str) -> Self {
        Self {
            instructions: Vec::new(),
            lines: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            arg_count: 0,
            kwonly_arg_count: 0,
            flags: CodeFlags::empty(),
            filename: Rc::from(filename),
            codename: Rc::from(codename),
            first_line: 1,
            current_line: 1,
            labels: Vec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    /// Sets the source line for subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Sets the first source line of the body.
    pub fn set_first_line(&mut self, line: u32) {
        self.first_line = line;
        self.current_line = line;
    }

    /// Adds flag bits (`VARARGS`, `GENERATOR`, ...).
    pub fn add_flags(&mut self, flags: CodeFlags) {
        self.flags |= flags;
    }

    /// Registers a constant-pool entry, deduplicating equal constants.
    pub fn constant(&mut self, value: Const) -> u32 {
        if let Some(index) = self.consts.iter().position(|existing| *existing == value) {
            return index as u32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    /// Registers a name-pool entry (globals and attributes).
    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(index) = self.names.iter().position(|existing| &**existing == name) {
            return index as u32;
        }
        self.names.push(Rc::from(name));
        (self.names.len() - 1) as u32
    }

    /// Registers a local-variable slot.
    pub fn local(&mut self, name: &str) -> u32 {
        if let Some(index) = self.varnames.iter().position(|existing| &**existing == name) {
            return index as u32;
        }
        self.varnames.push(Rc::from(name));
        (self.varnames.len() - 1) as u32
    }

    /// Registers a positional parameter (a local slot counted in
    /// `arg_count`). Parameters must be registered before other locals.
    pub fn param(&mut self, name: &str) -> u32 {
        let slot = self.local(name);
        self.arg_count += 1;
        slot
    }

    /// Registers a keyword-only parameter.
    pub fn kwonly_param(&mut self, name: &str) -> u32 {
        let slot = self.local(name);
        self.kwonly_arg_count += 1;
        slot
    }

    /// Registers a cell variable (enclosed by inner functions), returning its
    /// cell index. Cellvars must all be registered before any freevar.
    pub fn cellvar(&mut self, name: &str) -> u32 {
        debug_assert!(self.freevars.is_empty(), "declare cellvars before freevars");
        if let Some(index) = self.cellvars.iter().position(|existing| &**existing == name) {
            return index as u32;
        }
        self.cellvars.push(Rc::from(name));
        (self.cellvars.len() - 1) as u32
    }

    /// Registers a free variable (captured from the enclosing scope),
    /// returning its cell index (offset past the cellvars).
    pub fn freevar(&mut self, name: &str) -> u32 {
        if let Some(index) = self.freevars.iter().position(|existing| &**existing == name) {
            return (self.cellvars.len() + index) as u32;
        }
        self.freevars.push(Rc::from(name));
        (self.cellvars.len() + self.freevars.len() - 1) as u32
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.emit_arg(op, 0);
    }

    /// Emits an instruction with an operand, tracking stack depth.
    pub fn emit_arg(&mut self, op: Opcode, arg: u32) {
        debug_assert!(!op.is_jump() || matches!(op, Opcode::Jump), "use emit_jump for jump opcodes");
        self.push_instr(op, arg);
    }

    /// Creates an unresolved label.
    #[must_use]
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelInfo {
            target: None,
            entry_depth: None,
            patch_sites: Vec::new(),
        });
        Label(self.labels.len() - 1)
    }

    /// Emits a jump-family instruction targeting `label`, recording the
    /// stack depth on the jump-taken path for later rebinding.
    pub fn emit_jump(&mut self, op: Opcode, label: Label) {
        debug_assert!(op.is_jump(), "emit_jump requires a jump opcode");
        // Depth on entry at the target, per opcode family.
        let entry = match op {
            Opcode::Jump | Opcode::SetupLoop | Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => self.depth,
            Opcode::PopJumpIfTrue | Opcode::PopJumpIfFalse => self.depth - 1,
            // Exhaustion pops the iterator.
            Opcode::ForIter => self.depth - 1,
            // Handler entry pushes traceback marker, exception, and type.
            Opcode::SetupExcept => self.depth + 3,
            // Handler entry pushes the in-flight exception (or the normal
            // path pushes the no-exception marker).
            Opcode::SetupFinally => self.depth + 1,
            // Suppressed unwind resumes below the consumed exit slot; the
            // operand (the context manager) has been replaced.
            Opcode::SetupWith => self.depth - 1,
            _ => self.depth,
        };
        let info = &mut self.labels[label.0];
        match info.entry_depth {
            None => info.entry_depth = Some(entry),
            Some(existing) => debug_assert_eq!(existing, entry, "conflicting stack depths at jump target"),
        }
        self.max_depth = self.max_depth.max(entry);
        let site = self.instructions.len();
        let arg = match info.target {
            Some(target) => target,
            None => {
                self.labels[label.0].patch_sites.push(site);
                0
            }
        };
        self.push_instr(op, arg);
    }

    /// Binds a label to the next emitted instruction.
    ///
    /// When the label has only been reached by jumps (a handler, or code
    /// after an unconditional jump), the tracked depth is reset to the
    /// recorded jump-entry depth.
    pub fn bind(&mut self, label: Label) {
        let target = self.instructions.len() as u32;
        let info = &mut self.labels[label.0];
        debug_assert!(info.target.is_none(), "label bound twice");
        info.target = Some(target);
        if let Some(entry) = info.entry_depth {
            self.depth = entry;
        }
    }

    /// Emits `LoadConst` for a (deduplicated) constant.
    pub fn load_const(&mut self, value: Const) {
        let index = self.constant(value);
        self.emit_arg(Opcode::LoadConst, index);
    }

    /// Emits `LoadGlobal` for a name.
    pub fn load_global(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_arg(Opcode::LoadGlobal, index);
    }

    /// Emits `StoreGlobal` for a name.
    pub fn store_global(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_arg(Opcode::StoreGlobal, index);
    }

    /// Emits `LoadFast` for a local.
    pub fn load_fast(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit_arg(Opcode::LoadFast, slot);
    }

    /// Emits `StoreFast` for a local.
    pub fn store_fast(&mut self, name: &str) {
        let slot = self.local(name);
        self.emit_arg(Opcode::StoreFast, slot);
    }

    /// Emits `LoadAttr` for an attribute name.
    pub fn load_attr(&mut self, name: &str) {
        let index = self.name(name);
        self.emit_arg(Opcode::LoadAttr, index);
    }

    /// The current tracked stack depth (fall-through path).
    #[must_use]
    pub fn current_depth(&self) -> i32 {
        self.depth
    }

    /// Finishes the build: resolves forward jumps and stamps the computed
    /// maximum stack depth.
    ///
    /// # Panics
    /// Panics on builder misuse: an unbound label with pending jumps, or a
    /// stack that went negative (the emitted code would underflow).
    #[must_use]
    pub fn build(mut self) -> Code {
        for info in &self.labels {
            if info.patch_sites.is_empty() {
                continue;
            }
            let target = info.target.expect("jump target label was never bound");
            for &site in &info.patch_sites {
                self.instructions[site].arg = target;
            }
        }
        Code::new(
            self.instructions,
            self.lines,
            self.consts,
            self.names,
            self.varnames,
            self.cellvars,
            self.freevars,
            self.arg_count,
            self.kwonly_arg_count,
            self.flags,
            self.max_depth.max(0) as u32,
            self.filename,
            self.codename,
            self.first_line,
        )
    }

    fn push_instr(&mut self, op: Opcode, arg: u32) {
        self.instructions.push(Instr::new(op, arg));
        self.lines.push(self.current_line);
        let depth_after = self.depth + op.stack_effect(arg);
        assert!(
            depth_after >= 0,
            "stack underflow at instruction {} ({op})",
            self.instructions.len() - 1,
        );
        self.depth = depth_after;
        self.max_depth = self.max_depth.max(depth_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_depth_is_the_sum_of_effects() {
        let mut b = CodeBuilder::new("t.py", "<module>");
        b.load_const(Const::Int(1));
        b.load_const(Const::Int(2));
        b.load_const(Const::Int(3));
        assert_eq!(b.current_depth(), 3);
        b.emit_arg(Opcode::BinaryOp, 0);
        b.emit_arg(Opcode::BinaryOp, 0);
        assert_eq!(b.current_depth(), 1);
        b.emit(Opcode::ReturnValue);
        let code = b.build();
        assert_eq!(code.stack_size, 3);
        assert_eq!(code.instructions.len(), 6);
    }

    #[test]
    fn forward_jumps_are_patched() {
        let mut b = CodeBuilder::new("t.py", "<module>");
        b.load_const(Const::Bool(true));
        let skip = b.new_label();
        b.emit_jump(Opcode::PopJumpIfFalse, skip);
        b.load_const(Const::Int(1));
        b.emit(Opcode::PopTop);
        b.bind(skip);
        b.load_const(Const::None);
        b.emit(Opcode::ReturnValue);
        let code = b.build();
        assert_eq!(code.instructions[1].arg, 4);
    }

    #[test]
    fn constants_and_names_are_deduplicated() {
        let mut b = CodeBuilder::new("t.py", "<module>");
        let a = b.constant(Const::Int(42));
        let c = b.constant(Const::Int(42));
        assert_eq!(a, c);
        let x = b.name("x");
        let y = b.name("y");
        let x_again = b.name("x");
        assert_eq!(x, x_again);
        assert_ne!(x, y);
    }

    #[test]
    fn except_handlers_reserve_depth_for_the_pushed_triple() {
        let mut b = CodeBuilder::new("t.py", "<module>");
        let handler = b.new_label();
        let after = b.new_label();
        b.emit_jump(Opcode::SetupExcept, handler);
        b.load_const(Const::Int(1));
        b.emit(Opcode::PopTop);
        b.emit(Opcode::PopBlock);
        b.emit_jump(Opcode::Jump, after);
        b.bind(handler);
        // Handler entry: [traceback, exception, type].
        assert_eq!(b.current_depth(), 3);
        b.emit(Opcode::PopTop);
        b.emit(Opcode::PopTop);
        b.emit(Opcode::PopTop);
        b.emit(Opcode::PopExcept);
        b.bind(after);
        b.load_const(Const::None);
        b.emit(Opcode::ReturnValue);
        let code = b.build();
        assert!(code.stack_size >= 3);
    }

    #[test]
    fn line_table_tracks_set_line() {
        let mut b = CodeBuilder::new("t.py", "<module>");
        b.set_line(10);
        b.load_const(Const::None);
        b.set_line(11);
        b.emit(Opcode::ReturnValue);
        let code = b.build();
        assert_eq!(code.lines, vec![10, 11]);
        assert_eq!(code.line_for(1), 11);
    }
}
