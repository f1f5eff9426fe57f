//! The bytecode evaluator.
//!
//! A single fetch-execute loop drives a stack of [`Frame`]s: fetch the
//! instruction at the current frame's IP, advance, execute. Plain calls push
//! frames onto the same stack (no host recursion), so user-level recursion
//! depth is bounded only by the configured limit. Nested executions of the
//! loop (generator resumption and magic-method calls made from inside an
//! instruction) run the same loop against a watermark: the segment ends
//! when the frame stack drops back to the watermark depth.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;

use std::{borrow::Cow, rc::Rc};

use crate::{
    code::Code,
    except::{ExcType, RunError, RunResult},
    frame::{Block, BlockKind, Frame},
    generator::GenState,
    intern::magic,
    io::PrintWriter,
    module::ModuleData,
    opcode::{BinaryOpKind, CompareOpKind, Opcode},
    resource::ResourceLimits,
    tracer::VmTracer,
    types::{self, PyType},
    value::{
        Payload, PyRef, const_to_value, int_of, is_truthy_native, make_iterator, native_iter_next,
        none, py_repr, py_str,
    },
};

/// How one executed instruction affects the control loop.
pub(crate) enum Flow {
    /// Fall through to the next fetch.
    Continue,
    /// The current frame returned with a value.
    Return(PyRef),
    /// The current (generator) frame suspended with a value.
    Yield(PyRef),
}

/// How a watermarked segment of execution ended.
pub(crate) enum ExecExit {
    /// The segment's base frame returned.
    Return(PyRef),
    /// The segment's base frame yielded; the suspended frame comes back to
    /// its owning generator.
    Yield { value: PyRef, frame: Frame },
}

/// The evaluator: frame stack, limits, output boundary, tracer.
pub(crate) struct Vm<'io, W: PrintWriter, Tr: VmTracer> {
    frames: Vec<Frame>,
    limits: ResourceLimits,
    writer: &'io mut W,
    tracer: &'io mut Tr,
}

impl<'io, W: PrintWriter, Tr: VmTracer> Vm<'io, W, Tr> {
    /// Creates an evaluator with no active frames.
    pub fn new(limits: ResourceLimits, writer: &'io mut W, tracer: &'io mut Tr) -> Self {
        Self {
            frames: Vec::new(),
            limits,
            writer,
            tracer,
        }
    }

    /// Runs a module body to completion against its module namespace.
    pub fn run_module(&mut self, code: Rc<Code>, module: Rc<ModuleData>) -> RunResult<PyRef> {
        if code.stack_size > self.limits.max_stack_size {
            return Err(RunError::fatal(format!(
                "code declares stack depth {} beyond the configured cap {}",
                code.stack_size, self.limits.max_stack_size,
            )));
        }
        let watermark = self.frames.len();
        self.frames.push(Frame::for_module(code, module));
        match self.execute(watermark)? {
            ExecExit::Return(value) => Ok(value),
            ExecExit::Yield { .. } => Err(RunError::fatal("module body cannot yield")),
        }
    }

    pub(super) fn current_frame(&self) -> &Frame {
        self.frames.last().expect("the evaluator has an active frame")
    }

    pub(super) fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("the evaluator has an active frame")
    }

    pub(super) fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn current_code(&self) -> Rc<Code> {
        Rc::clone(&self.current_frame().code)
    }

    /// Writes to the stdout channel of the output boundary.
    pub(crate) fn write_stdout(&mut self, text: &str) {
        self.writer.stdout_write(Cow::Borrowed(text));
    }

    /// Writes to the stderr channel of the output boundary.
    pub(crate) fn write_stderr(&mut self, text: &str) {
        self.writer.stderr_write(Cow::Borrowed(text));
    }

    /// Executes instructions until the frame stack returns to `watermark`.
    pub(crate) fn execute(&mut self, watermark: usize) -> RunResult<ExecExit> {
        debug_assert!(self.frames.len() > watermark, "segment needs a frame to run");
        loop {
            let (op, arg, ip) = {
                let frame = self.current_frame_mut();
                let ip = frame.ip;
                match frame.code.instructions.get(ip).copied() {
                    Some(instr) => {
                        frame.line = frame.code.line_for(ip);
                        frame.ip += 1;
                        (instr.op, instr.arg, ip)
                    }
                    None => {
                        let message = format!(
                            "instruction pointer {ip} out of range ({} instructions) in {}",
                            frame.code.instructions.len(),
                            frame.name(),
                        );
                        return Err(RunError::fatal(message));
                    }
                }
            };
            self.tracer
                .on_instruction(ip, op, self.current_frame().stack.len(), self.frames.len());

            match self.dispatch(op, arg) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => {
                    let finished = self.frames.pop().expect("a frame just executed ReturnValue");
                    self.tracer.on_return(self.frames.len());
                    if self.frames.len() == watermark {
                        return Ok(ExecExit::Return(value));
                    }
                    debug_assert!(!finished.in_generator, "generator frames run at their own watermark");
                    self.current_frame_mut().push(value)?;
                }
                Ok(Flow::Yield(value)) => {
                    let frame = self.frames.pop().expect("a frame just executed YieldValue");
                    if !frame.in_generator || self.frames.len() != watermark {
                        return Err(RunError::fatal("yield outside a generator frame"));
                    }
                    return Ok(ExecExit::Yield { value, frame });
                }
                Err(RunError::Fatal(fatal)) => {
                    // Fatal errors are never converted to user exceptions;
                    // attach the offending instruction once and terminate.
                    let frame_name = self.current_frame().name().to_owned();
                    return Err(RunError::Fatal(fatal.with_context(op.into(), ip, &frame_name)));
                }
                Err(error) => self.handle_exception(error, watermark)?,
            }
        }
    }

    fn dispatch(&mut self, op: Opcode, arg: u32) -> RunResult<Flow> {
        match op {
            Opcode::Nop => Ok(Flow::Continue),
            Opcode::PopTop => {
                self.current_frame_mut().pop()?;
                Ok(Flow::Continue)
            }
            Opcode::DupTop => {
                let top = self.current_frame().peek()?.clone();
                self.current_frame_mut().push(top)?;
                Ok(Flow::Continue)
            }
            Opcode::RotN => {
                let n = arg as usize;
                let frame = self.current_frame_mut();
                if n > frame.stack.len() {
                    return Err(RunError::fatal("rotation deeper than the value stack"));
                }
                if n > 1 {
                    let len = frame.stack.len();
                    frame.stack[len - n..].rotate_right(1);
                }
                Ok(Flow::Continue)
            }
            Opcode::Swap => {
                let frame = self.current_frame_mut();
                let len = frame.stack.len();
                if len < 2 {
                    return Err(RunError::fatal("value stack underflow"));
                }
                frame.stack.swap(len - 1, len - 2);
                Ok(Flow::Continue)
            }

            Opcode::LoadConst => {
                let code = self.current_code();
                let Some(constant) = code.consts.get(arg as usize) else {
                    return Err(RunError::fatal(format!("constant index {arg} out of range")));
                };
                let value = const_to_value(constant);
                self.current_frame_mut().push(value)?;
                Ok(Flow::Continue)
            }
            Opcode::LoadFast => {
                let code = self.current_code();
                let frame = self.current_frame_mut();
                match frame.locals.get(arg as usize) {
                    Some(Some(value)) => {
                        let value = value.clone();
                        frame.push(value)?;
                        Ok(Flow::Continue)
                    }
                    Some(None) => Err(ExcType::unbound_local_error(&code.varnames[arg as usize])),
                    None => Err(RunError::fatal(format!("local slot {arg} out of range"))),
                }
            }
            Opcode::StoreFast => {
                let value = self.current_frame_mut().pop()?;
                let frame = self.current_frame_mut();
                match frame.locals.get_mut(arg as usize) {
                    Some(slot) => {
                        *slot = Some(value);
                        Ok(Flow::Continue)
                    }
                    None => Err(RunError::fatal(format!("local slot {arg} out of range"))),
                }
            }
            Opcode::DeleteFast => {
                let code = self.current_code();
                let frame = self.current_frame_mut();
                match frame.locals.get_mut(arg as usize) {
                    Some(slot) => match slot.take() {
                        Some(_) => Ok(Flow::Continue),
                        None => Err(ExcType::unbound_local_error(&code.varnames[arg as usize])),
                    },
                    None => Err(RunError::fatal(format!("local slot {arg} out of range"))),
                }
            }
            Opcode::LoadGlobal => {
                let name = self.name_operand(arg)?;
                let value = match self.current_frame().module.get(&name) {
                    Some(value) => value,
                    None => match types::registry().builtin_lookup(&name) {
                        Some(value) => value,
                        None => return Err(ExcType::name_error(&name)),
                    },
                };
                self.current_frame_mut().push(value)?;
                Ok(Flow::Continue)
            }
            Opcode::StoreGlobal => {
                let name = self.name_operand(arg)?;
                let value = self.current_frame_mut().pop()?;
                self.current_frame().module.set(name, value);
                Ok(Flow::Continue)
            }
            Opcode::DeleteGlobal => {
                let name = self.name_operand(arg)?;
                match self.current_frame().module.remove(&name) {
                    Some(_) => Ok(Flow::Continue),
                    None => Err(ExcType::name_error(&name)),
                }
            }
            Opcode::LoadDeref => {
                let value = {
                    let frame = self.current_frame();
                    let Some(cell) = frame.cells.get(arg as usize) else {
                        return Err(RunError::fatal(format!("cell slot {arg} out of range")));
                    };
                    let Payload::Cell(slot) = cell.payload() else {
                        return Err(RunError::fatal("cell slot holds a non-cell value"));
                    };
                    slot.borrow().clone()
                };
                match value {
                    Some(value) => {
                        self.current_frame_mut().push(value)?;
                        Ok(Flow::Continue)
                    }
                    None => Err(self.empty_cell_error(arg as usize)),
                }
            }
            Opcode::StoreDeref => {
                let value = self.current_frame_mut().pop()?;
                let frame = self.current_frame();
                let Some(cell) = frame.cells.get(arg as usize) else {
                    return Err(RunError::fatal(format!("cell slot {arg} out of range")));
                };
                let Payload::Cell(slot) = cell.payload() else {
                    return Err(RunError::fatal("cell slot holds a non-cell value"));
                };
                *slot.borrow_mut() = Some(value);
                Ok(Flow::Continue)
            }
            Opcode::LoadClosure => {
                let cell = match self.current_frame().cells.get(arg as usize) {
                    Some(cell) => cell.clone(),
                    None => return Err(RunError::fatal(format!("cell slot {arg} out of range"))),
                };
                self.current_frame_mut().push(cell)?;
                Ok(Flow::Continue)
            }

            Opcode::UnaryNeg | Opcode::UnaryPos | Opcode::UnaryInvert | Opcode::UnaryNot => self.op_unary(op),
            Opcode::BinaryOp => {
                let Some(kind) = BinaryOpKind::from_repr(arg) else {
                    return Err(RunError::fatal(format!("invalid binary operator {arg}")));
                };
                self.op_binary(kind)
            }
            Opcode::InplaceOp => {
                let Some(kind) = BinaryOpKind::from_repr(arg) else {
                    return Err(RunError::fatal(format!("invalid binary operator {arg}")));
                };
                self.op_inplace(kind)
            }
            Opcode::CompareOp => {
                let Some(kind) = CompareOpKind::from_repr(arg) else {
                    return Err(RunError::fatal(format!("invalid comparison operator {arg}")));
                };
                self.op_compare(kind)
            }

            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet | Opcode::BuildMap | Opcode::BuildSlice => {
                self.op_build(op, arg)
            }
            Opcode::UnpackSequence => self.op_unpack_sequence(arg),
            Opcode::ListAppend | Opcode::SetAdd | Opcode::MapAdd => self.op_comprehension_add(op, arg),

            Opcode::LoadAttr => self.op_load_attr(arg),
            Opcode::StoreAttr => self.op_store_attr(arg),
            Opcode::DeleteAttr => self.op_delete_attr(arg),
            Opcode::BinarySubscr => self.op_binary_subscr(),
            Opcode::StoreSubscr => self.op_store_subscr(),
            Opcode::DeleteSubscr => self.op_delete_subscr(),

            Opcode::Jump => {
                self.jump_to(arg)?;
                Ok(Flow::Continue)
            }
            Opcode::PopJumpIfTrue => {
                let value = self.current_frame_mut().pop()?;
                if self.truthy(&value)? {
                    self.jump_to(arg)?;
                }
                Ok(Flow::Continue)
            }
            Opcode::PopJumpIfFalse => {
                let value = self.current_frame_mut().pop()?;
                if !self.truthy(&value)? {
                    self.jump_to(arg)?;
                }
                Ok(Flow::Continue)
            }
            Opcode::JumpIfTrueOrPop => {
                let value = self.current_frame().peek()?.clone();
                if self.truthy(&value)? {
                    self.jump_to(arg)?;
                } else {
                    self.current_frame_mut().pop()?;
                }
                Ok(Flow::Continue)
            }
            Opcode::JumpIfFalseOrPop => {
                let value = self.current_frame().peek()?.clone();
                if self.truthy(&value)? {
                    self.current_frame_mut().pop()?;
                } else {
                    self.jump_to(arg)?;
                }
                Ok(Flow::Continue)
            }

            Opcode::GetIter => {
                let value = self.current_frame_mut().pop()?;
                let iterator = self.get_iter(value)?;
                self.current_frame_mut().push(iterator)?;
                Ok(Flow::Continue)
            }
            Opcode::ForIter => {
                let iterator = self.current_frame().peek()?.clone();
                match self.iter_next(&iterator) {
                    Ok(value) => {
                        self.current_frame_mut().push(value)?;
                        Ok(Flow::Continue)
                    }
                    Err(error) if error.is_exc_kind(ExcType::StopIteration) => {
                        self.current_frame_mut().pop()?;
                        self.jump_to(arg)?;
                        Ok(Flow::Continue)
                    }
                    Err(error) => Err(error),
                }
            }

            Opcode::SetupLoop => self.op_setup_block(BlockKind::Loop, arg),
            Opcode::SetupExcept => self.op_setup_block(BlockKind::Except, arg),
            Opcode::SetupFinally => self.op_setup_block(BlockKind::Finally, arg),
            Opcode::SetupWith => self.op_setup_with(arg),
            Opcode::PopBlock => {
                match self.current_frame_mut().blocks.pop() {
                    Some(_) => Ok(Flow::Continue),
                    None => Err(RunError::fatal("block stack underflow")),
                }
            }
            Opcode::PopExcept => {
                self.current_frame_mut().pending_exc = None;
                Ok(Flow::Continue)
            }
            Opcode::BeginFinally => {
                self.current_frame_mut().push(none())?;
                Ok(Flow::Continue)
            }
            Opcode::EndFinally => {
                let marker = self.current_frame_mut().pop()?;
                match marker.payload() {
                    Payload::None => Ok(Flow::Continue),
                    Payload::Exception(_) => Err(RunError::Exc(marker)),
                    _ => Err(RunError::fatal("finally block left a non-marker on the stack")),
                }
            }
            Opcode::BreakLoop => {
                loop {
                    let Some(block) = self.current_frame_mut().blocks.pop() else {
                        return Err(RunError::fatal("'break' outside a loop block"));
                    };
                    if block.kind == BlockKind::Loop {
                        self.current_frame_mut().stack.truncate(block.level);
                        self.jump_to(block.handler as u32)?;
                        break;
                    }
                }
                Ok(Flow::Continue)
            }

            Opcode::CallFunction => self.op_call_function(arg),
            Opcode::CallFunctionKw => self.op_call_function_kw(arg),
            Opcode::CallFunctionEx => self.op_call_function_ex(arg),
            Opcode::ReturnValue => {
                let value = self.current_frame_mut().pop()?;
                Ok(Flow::Return(value))
            }
            Opcode::YieldValue => {
                let value = self.current_frame_mut().pop()?;
                Ok(Flow::Yield(value))
            }
            Opcode::RaiseVarargs => self.op_raise(arg),
            Opcode::MakeFunction => self.op_make_function(arg),

            Opcode::ImportName => Err(ExcType::NotImplementedError.with_message("import is not supported")),
        }
    }

    /// Reads a name-pool operand.
    fn name_operand(&self, arg: u32) -> RunResult<Rc<str>> {
        let code = &self.current_frame().code;
        match code.names.get(arg as usize) {
            Some(name) => Ok(Rc::clone(name)),
            None => Err(RunError::fatal(format!("name index {arg} out of range"))),
        }
    }

    /// Sets the instruction pointer, validating the target.
    fn jump_to(&mut self, target: u32) -> RunResult<()> {
        let frame = self.current_frame_mut();
        if (target as usize) >= frame.code.instructions.len() {
            return Err(RunError::fatal(format!("jump target {target} out of range")));
        }
        frame.ip = target as usize;
        Ok(())
    }

    fn op_setup_block(&mut self, kind: BlockKind, handler: u32) -> RunResult<Flow> {
        let frame = self.current_frame_mut();
        if (handler as usize) >= frame.code.instructions.len() {
            return Err(RunError::fatal(format!("block handler {handler} out of range")));
        }
        let level = frame.stack.len();
        frame.blocks.push(Block {
            kind,
            handler: handler as usize,
            level,
        });
        Ok(Flow::Continue)
    }

    /// Enters a context manager: resolves `__exit__` and `__enter__`, keeps
    /// the bound exit below the enter result, and opens a WITH block.
    fn op_setup_with(&mut self, handler: u32) -> RunResult<Flow> {
        let manager = self.current_frame_mut().pop()?;
        let Some(exit) = self.lookup_attr(&manager, magic::EXIT)? else {
            return Err(ExcType::AttributeError.with_message(magic::EXIT));
        };
        let Some(enter) = self.lookup_attr(&manager, magic::ENTER)? else {
            return Err(ExcType::AttributeError.with_message(magic::ENTER));
        };
        self.current_frame_mut().push(exit)?;
        let level = self.current_frame().stack.len();
        let result = self.call_and_run(enter, Vec::new(), Vec::new())?;
        let frame = self.current_frame_mut();
        if (handler as usize) >= frame.code.instructions.len() {
            return Err(RunError::fatal(format!("block handler {handler} out of range")));
        }
        frame.push(result)?;
        frame.blocks.push(Block {
            kind: BlockKind::With,
            handler: handler as usize,
            level,
        });
        Ok(Flow::Continue)
    }

    /// The error for reading an empty cell: unbound local for cellvars,
    /// unbound free variable for freevars.
    fn empty_cell_error(&self, slot: usize) -> RunError {
        let code = &self.current_frame().code;
        if slot < code.cellvars.len() {
            ExcType::unbound_local_error(&code.cellvars[slot])
        } else {
            let name = code
                .freevars
                .get(slot - code.cellvars.len())
                .map_or("?", |name| name.as_ref());
            ExcType::NameError.with_message(format!(
                "free variable '{name}' referenced before assignment in enclosing scope"
            ))
        }
    }

    // -----------------------------------------------------------------
    // Protocol helpers shared by opcodes and builtins
    // -----------------------------------------------------------------

    /// The truth value of `value`: native hooks first, then `__bool__`,
    /// then `__len__`, then true.
    pub(crate) fn truthy(&mut self, value: &PyRef) -> RunResult<bool> {
        if let Some(known) = is_truthy_native(value) {
            return Ok(known);
        }
        if let Some(result) = self.call_type_method(value, magic::BOOL, Vec::new())? {
            return match result.payload() {
                Payload::Bool(b) => Ok(*b),
                _ => Err(ExcType::type_error(format!(
                    "__bool__ should return bool, returned {}",
                    result.type_name()
                ))),
            };
        }
        if let Some(result) = self.call_type_method(value, magic::LEN, Vec::new())? {
            let Some(length) = int_of(&result) else {
                return Err(ExcType::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    result.type_name()
                )));
            };
            return Ok(length != 0i32.into());
        }
        Ok(true)
    }

    /// `str()` through the protocol: user `__str__`/`__repr__` first for
    /// instances, native rendering otherwise.
    pub(crate) fn str_of(&mut self, value: &PyRef) -> RunResult<String> {
        if matches!(value.payload(), Payload::Instance) {
            for method in [magic::STR, magic::REPR] {
                if let Some(result) = self.call_type_method(value, method, Vec::new())? {
                    let Payload::Str(text) = result.payload() else {
                        return Err(ExcType::type_error(format!(
                            "__str__ returned non-string (type {})",
                            result.type_name()
                        )));
                    };
                    return Ok(text.to_string());
                }
            }
        }
        Ok(py_str(value))
    }

    /// `repr()` through the protocol.
    pub(crate) fn repr_of(&mut self, value: &PyRef) -> RunResult<String> {
        if matches!(value.payload(), Payload::Instance)
            && let Some(result) = self.call_type_method(value, magic::REPR, Vec::new())?
        {
            let Payload::Str(text) = result.payload() else {
                return Err(ExcType::type_error(format!(
                    "__repr__ returned non-string (type {})",
                    result.type_name()
                )));
            };
            return Ok(text.to_string());
        }
        Ok(py_repr(value))
    }

    /// Calls a method found on the value's type chain, bound to the value.
    ///
    /// Returns `Ok(None)` when the type chain has no such attribute.
    pub(crate) fn call_type_method(
        &mut self,
        receiver: &PyRef,
        name: &str,
        args: Vec<PyRef>,
    ) -> RunResult<Option<PyRef>> {
        let Some(method) = PyType::lookup(receiver.ty(), name) else {
            return Ok(None);
        };
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(receiver.clone());
        full_args.extend(args);
        self.call_and_run(method, full_args, Vec::new()).map(Some)
    }

    /// The iteration protocol's `iter` hook.
    pub(crate) fn get_iter(&mut self, value: PyRef) -> RunResult<PyRef> {
        match value.payload() {
            Payload::Generator(_) | Payload::Iterator(_) => Ok(value),
            _ => {
                if let Some(iterator) = make_iterator(&value) {
                    return Ok(iterator);
                }
                if let Some(result) = self.call_type_method(&value, magic::ITER, Vec::new())? {
                    return Ok(result);
                }
                Err(ExcType::type_error(format!(
                    "'{}' object is not iterable",
                    value.type_name()
                )))
            }
        }
    }

    /// The iteration protocol's `next` hook: a value, or `StopIteration`.
    pub(crate) fn iter_next(&mut self, iterator: &PyRef) -> RunResult<PyRef> {
        match iterator.payload() {
            Payload::Iterator(_) => {
                native_iter_next(iterator).ok_or_else(|| ExcType::StopIteration.without_message())
            }
            Payload::Generator(_) => self.resume_generator(iterator),
            _ => match self.call_type_method(iterator, magic::NEXT, Vec::new())? {
                Some(value) => Ok(value),
                None => Err(ExcType::type_error(format!(
                    "'{}' object is not an iterator",
                    iterator.type_name()
                ))),
            },
        }
    }

    /// Resumes a generator until its next yield, return, or raise.
    ///
    /// Yield hands the value out and re-suspends; return and raised
    /// `StopIteration` exhaust the generator and signal `StopIteration`
    /// (carrying the return value); any other exception exhausts it and
    /// propagates.
    pub(crate) fn resume_generator(&mut self, generator: &PyRef) -> RunResult<PyRef> {
        let Payload::Generator(data) = generator.payload() else {
            return Err(RunError::fatal("resume target is not a generator"));
        };
        match data.state() {
            GenState::Exhausted => Err(ExcType::StopIteration.without_message()),
            GenState::Running => Err(ExcType::value_error("generator already executing")),
            GenState::Created | GenState::Suspended => {
                let Some(frame) = data.take_frame() else {
                    return Err(RunError::fatal("suspended generator has no frame"));
                };
                self.limits.check_recursion_depth(self.frames.len())?;
                data.set_state(GenState::Running);
                let watermark = self.frames.len();
                self.frames.push(frame);
                self.tracer.on_call(data.name(), self.frames.len());
                match self.execute(watermark) {
                    Ok(ExecExit::Yield { value, frame }) => {
                        data.store_frame(frame);
                        data.set_state(GenState::Suspended);
                        Ok(value)
                    }
                    Ok(ExecExit::Return(value)) => {
                        data.set_state(GenState::Exhausted);
                        Err(crate::except::stop_iteration_with_value(value))
                    }
                    Err(error) => {
                        data.set_state(GenState::Exhausted);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Materializes any iterable into a vector through the iteration
    /// protocol.
    pub(crate) fn collect_iterable(&mut self, value: PyRef) -> RunResult<Vec<PyRef>> {
        // Fast paths for the common literal kinds.
        match value.payload() {
            Payload::Tuple(items) => return Ok(items.clone()),
            Payload::List(items) => return Ok(items.borrow().clone()),
            _ => {}
        }
        let iterator = self.get_iter(value)?;
        let mut collected = Vec::new();
        loop {
            match self.iter_next(&iterator) {
                Ok(item) => collected.push(item),
                Err(error) if error.is_exc_kind(ExcType::StopIteration) => return Ok(collected),
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use indexmap::IndexMap;

    use super::*;
    use crate::{
        builder::CodeBuilder,
        code::Const,
        function::FunctionData,
        io::CollectStringPrint,
        opcode::{BinaryOpKind, CompareOpKind},
        tracer::NoopTracer,
        types::TypeSlot,
        value::{function_value, instance_value, py_repr, type_value},
    };

    /// Builds a user function bound to `module` from emitted code.
    fn user_function(module: &Rc<ModuleData>, name: &str, build: impl FnOnce(&mut CodeBuilder)) -> PyRef {
        let mut b = CodeBuilder::new("t.py", name);
        build(&mut b);
        function_value(FunctionData::new(
            Rc::new(b.build()),
            Rc::clone(module),
            Vec::new(),
            IndexMap::new(),
            Vec::new(),
        ))
    }

    fn run_in(module: &Rc<ModuleData>, build: impl FnOnce(&mut CodeBuilder)) -> RunResult<PyRef> {
        let mut b = CodeBuilder::new("t.py", "<module>");
        build(&mut b);
        let code = Rc::new(b.build());
        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(ResourceLimits::default(), &mut writer, &mut tracer);
        vm.run_module(code, Rc::clone(module))
    }

    /// A user type whose instances carry a `v` attribute set by `__init__`.
    fn numeric_type(module: &Rc<ModuleData>, with_add: bool, with_radd: bool) -> crate::types::TypeRef {
        let registry = types::registry();
        let ty = PyType::new("Num", Some(registry.object_type.clone()), TypeSlot::Instance);
        let init = user_function(module, "__init__", |b| {
            b.param("self");
            b.param("v");
            b.load_fast("v");
            b.load_fast("self");
            let v = b.name("v");
            b.emit_arg(Opcode::StoreAttr, v);
            b.load_const(Const::None);
            b.emit(Opcode::ReturnValue);
        });
        ty.set_attr(Rc::from("__init__"), init);
        if with_add {
            let add = user_function(module, "__add__", |b| {
                b.param("self");
                b.param("other");
                b.load_fast("self");
                b.load_attr("v");
                b.load_fast("other");
                b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
                b.emit(Opcode::ReturnValue);
            });
            ty.set_attr(Rc::from("__add__"), add);
        }
        if with_radd {
            let radd = user_function(module, "__radd__", |b| {
                b.param("self");
                b.param("other");
                b.load_fast("other");
                b.load_fast("self");
                b.load_attr("v");
                b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
                b.emit(Opcode::ReturnValue);
            });
            ty.set_attr(Rc::from("__radd__"), radd);
        }
        ty
    }

    #[test]
    fn instance_construction_runs_init_and_fills_the_dict() {
        let module = ModuleData::new("m");
        let ty = numeric_type(&module, false, false);
        module.set(Rc::from("Num"), type_value(ty));
        let result = run_in(&module, |b| {
            b.load_global("Num");
            b.load_const(Const::Int(9));
            b.emit_arg(Opcode::CallFunction, 1);
            b.load_attr("v");
            b.emit(Opcode::ReturnValue);
        });
        assert_eq!(py_repr(&result.unwrap()), "9");
    }

    #[test]
    fn binary_dispatch_tries_left_then_reflected_right() {
        let module = ModuleData::new("m");
        let ty = numeric_type(&module, true, true);
        module.set(Rc::from("Num"), type_value(ty));

        // Left method: Num(3) + 4.
        let left = run_in(&module, |b| {
            b.load_global("Num");
            b.load_const(Const::Int(3));
            b.emit_arg(Opcode::CallFunction, 1);
            b.load_const(Const::Int(4));
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            b.emit(Opcode::ReturnValue);
        });
        assert_eq!(py_repr(&left.unwrap()), "7");

        // Reflected: 4 + Num(3) goes through __radd__.
        let right = run_in(&module, |b| {
            b.load_const(Const::Int(4));
            b.load_global("Num");
            b.load_const(Const::Int(3));
            b.emit_arg(Opcode::CallFunction, 1);
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            b.emit(Opcode::ReturnValue);
        });
        assert_eq!(py_repr(&right.unwrap()), "7");
    }

    #[test]
    fn exhausted_dispatch_raises_type_error() {
        let module = ModuleData::new("m");
        let ty = numeric_type(&module, false, false);
        module.set(Rc::from("Num"), type_value(ty));
        let result = run_in(&module, |b| {
            b.load_global("Num");
            b.load_const(Const::Int(3));
            b.emit_arg(Opcode::CallFunction, 1);
            b.load_const(Const::Int(4));
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            b.emit(Opcode::ReturnValue);
        });
        let error = result.unwrap_err();
        assert!(error.is_exc_kind(ExcType::TypeError));
        let RunError::Exc(exc) = error else { panic!("expected exception") };
        assert_eq!(
            exc.as_exception().unwrap().message(),
            Some("unsupported operand type(s) for +: 'Num' and 'int'")
        );
    }

    /// A context-manager type: `__enter__` returns 42; `__exit__` returns
    /// the given constant.
    fn manager_type(module: &Rc<ModuleData>, suppresses: bool) -> crate::types::TypeRef {
        let registry = types::registry();
        let ty = PyType::new("Guard", Some(registry.object_type.clone()), TypeSlot::Instance);
        let enter = user_function(module, "__enter__", |b| {
            b.param("self");
            b.load_const(Const::Int(42));
            b.emit(Opcode::ReturnValue);
        });
        let exit = user_function(module, "__exit__", |b| {
            b.param("self");
            b.param("exc_type");
            b.param("exc");
            b.param("tb");
            b.load_const(Const::Bool(suppresses));
            b.emit(Opcode::ReturnValue);
        });
        ty.set_attr(Rc::from("__enter__"), enter);
        ty.set_attr(Rc::from("__exit__"), exit);
        ty
    }

    fn with_block_code(b: &mut CodeBuilder) {
        // with Guard() as entered: 1/0
        // return entered
        b.load_global("Guard");
        b.emit_arg(Opcode::CallFunction, 0);
        let after = b.new_label();
        b.emit_jump(Opcode::SetupWith, after);
        b.store_global("entered");
        b.load_const(Const::Int(1));
        b.load_const(Const::Int(0));
        b.emit_arg(Opcode::BinaryOp, BinaryOpKind::TrueDiv as u32);
        b.emit(Opcode::PopTop);
        // Normal path: close the block and call the saved __exit__ with
        // three Nones.
        b.emit(Opcode::PopBlock);
        b.load_const(Const::None);
        b.load_const(Const::None);
        b.load_const(Const::None);
        b.emit_arg(Opcode::CallFunction, 3);
        b.emit(Opcode::PopTop);
        b.bind(after);
        b.load_global("entered");
        b.emit(Opcode::ReturnValue);
    }

    #[test]
    fn with_exit_suppresses_when_truthy() {
        let module = ModuleData::new("m");
        module.set(Rc::from("Guard"), type_value(manager_type(&module, true)));
        let result = run_in(&module, with_block_code);
        assert_eq!(py_repr(&result.unwrap()), "42");
    }

    #[test]
    fn with_exit_propagates_when_falsy() {
        let module = ModuleData::new("m");
        module.set(Rc::from("Guard"), type_value(manager_type(&module, false)));
        let error = run_in(&module, with_block_code).unwrap_err();
        assert!(error.is_exc_kind(ExcType::ZeroDivisionError));
    }

    #[test]
    fn handler_raises_chain_the_context() {
        // try: 1/0
        // except: raise ValueError("second")
        let module = ModuleData::new("m");
        let error = run_in(&module, |b| {
            let handler = b.new_label();
            let after = b.new_label();
            b.emit_jump(Opcode::SetupExcept, handler);
            b.load_const(Const::Int(1));
            b.load_const(Const::Int(0));
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::TrueDiv as u32);
            b.emit(Opcode::PopTop);
            b.emit(Opcode::PopBlock);
            b.emit_jump(Opcode::Jump, after);
            b.bind(handler);
            b.emit(Opcode::PopTop);
            b.emit(Opcode::PopTop);
            b.emit(Opcode::PopTop);
            b.load_global("ValueError");
            b.load_const(Const::Str("second".into()));
            b.emit_arg(Opcode::CallFunction, 1);
            b.emit_arg(Opcode::RaiseVarargs, 1);
            b.bind(after);
            b.load_const(Const::None);
            b.emit(Opcode::ReturnValue);
        })
        .unwrap_err();

        let RunError::Exc(exc) = error else { panic!("expected exception") };
        let data = exc.as_exception().unwrap();
        assert_eq!(data.kind(), ExcType::ValueError);
        let context = data.context().expect("implicit context chained");
        assert_eq!(context.as_exception().unwrap().kind(), ExcType::ZeroDivisionError);
        assert!(!data.suppresses_context());
    }

    #[test]
    fn raise_from_sets_the_cause_and_suppresses_context() {
        // raise ValueError("why") from KeyError("k")
        let module = ModuleData::new("m");
        let error = run_in(&module, |b| {
            b.load_global("ValueError");
            b.load_const(Const::Str("why".into()));
            b.emit_arg(Opcode::CallFunction, 1);
            b.load_global("KeyError");
            b.load_const(Const::Str("k".into()));
            b.emit_arg(Opcode::CallFunction, 1);
            b.emit_arg(Opcode::RaiseVarargs, 2);
        })
        .unwrap_err();
        let RunError::Exc(exc) = error else { panic!("expected exception") };
        let data = exc.as_exception().unwrap();
        assert_eq!(data.kind(), ExcType::ValueError);
        let cause = data.cause().expect("explicit cause");
        assert_eq!(cause.as_exception().unwrap().kind(), ExcType::KeyError);
        assert!(data.suppresses_context());
    }

    #[test]
    fn user_iterators_drive_for_loops() {
        // class Counter: __iter__ -> self; __next__ counts 1..=3.
        let module = ModuleData::new("m");
        let registry = types::registry();
        let ty = PyType::new("Counter", Some(registry.object_type.clone()), TypeSlot::Instance);
        let init = user_function(&module, "__init__", |b| {
            b.param("self");
            b.load_const(Const::Int(0));
            b.load_fast("self");
            let n = b.name("n");
            b.emit_arg(Opcode::StoreAttr, n);
            b.load_const(Const::None);
            b.emit(Opcode::ReturnValue);
        });
        let iter_method = user_function(&module, "__iter__", |b| {
            b.param("self");
            b.load_fast("self");
            b.emit(Opcode::ReturnValue);
        });
        let next_method = user_function(&module, "__next__", |b| {
            b.param("self");
            let advance = b.new_label();
            b.load_fast("self");
            b.load_attr("n");
            b.load_const(Const::Int(3));
            b.emit_arg(Opcode::CompareOp, CompareOpKind::Lt as u32);
            b.emit_jump(Opcode::PopJumpIfTrue, advance);
            b.load_global("StopIteration");
            b.emit_arg(Opcode::RaiseVarargs, 1);
            b.bind(advance);
            b.load_fast("self");
            b.load_attr("n");
            b.load_const(Const::Int(1));
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            b.load_fast("self");
            let n = b.name("n");
            b.emit_arg(Opcode::StoreAttr, n);
            b.load_fast("self");
            b.load_attr("n");
            b.emit(Opcode::ReturnValue);
        });
        ty.set_attr(Rc::from("__init__"), init);
        ty.set_attr(Rc::from("__iter__"), iter_method);
        ty.set_attr(Rc::from("__next__"), next_method);
        module.set(Rc::from("Counter"), type_value(ty));

        let result = run_in(&module, |b| {
            // total = 0
            // for v in Counter(): total = total + v
            b.load_const(Const::Int(0));
            b.store_global("total");
            b.load_global("Counter");
            b.emit_arg(Opcode::CallFunction, 0);
            b.emit(Opcode::GetIter);
            let loop_top = b.new_label();
            let done = b.new_label();
            b.bind(loop_top);
            b.emit_jump(Opcode::ForIter, done);
            b.store_global("v");
            b.load_global("total");
            b.load_global("v");
            b.emit_arg(Opcode::BinaryOp, BinaryOpKind::Add as u32);
            b.store_global("total");
            b.emit_jump(Opcode::Jump, loop_top);
            b.bind(done);
            b.load_global("total");
            b.emit(Opcode::ReturnValue);
        });
        assert_eq!(py_repr(&result.unwrap()), "6");
    }

    #[test]
    fn truthiness_consults_bool_then_len() {
        let module = ModuleData::new("m");
        let registry = types::registry();
        let by_len = PyType::new("Sized", Some(registry.object_type.clone()), TypeSlot::Instance);
        let len_method = user_function(&module, "__len__", |b| {
            b.param("self");
            b.load_const(Const::Int(0));
            b.emit(Opcode::ReturnValue);
        });
        by_len.set_attr(Rc::from("__len__"), len_method);

        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(ResourceLimits::default(), &mut writer, &mut tracer);
        // The VM needs an active frame for nested method calls.
        let mut b = CodeBuilder::new("t.py", "<module>");
        b.load_const(Const::None);
        b.emit(Opcode::ReturnValue);
        vm.frames.push(Frame::for_module(Rc::new(b.build()), Rc::clone(&module)));

        let sized = instance_value(by_len);
        assert!(!vm.truthy(&sized).unwrap());
        // A bare instance with neither hook is true.
        let plain_ty = PyType::new("Plain", Some(types::registry().object_type.clone()), TypeSlot::Instance);
        let plain = instance_value(plain_ty);
        assert!(vm.truthy(&plain).unwrap());
    }

    #[test]
    fn attribute_lookup_agrees_with_the_parent_chain_walk() {
        let module = ModuleData::new("m");
        let registry = types::registry();
        let base = PyType::new("Base", Some(registry.object_type.clone()), TypeSlot::Instance);
        base.set_attr(Rc::from("tag"), crate::value::int_from_i64(5));
        let derived = PyType::new("Derived", Some(base.clone()), TypeSlot::Instance);
        let instance = instance_value(derived.clone());

        let mut writer = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(ResourceLimits::default(), &mut writer, &mut tracer);
        let found = vm.lookup_attr(&instance, "tag").unwrap().expect("inherited attribute");
        let chain = PyType::lookup(&derived, "tag").expect("chain walk");
        assert!(Rc::ptr_eq(&found, &chain));

        // The instance dict shadows the chain.
        instance
            .instance_dict()
            .unwrap()
            .borrow_mut()
            .insert(Rc::from("tag"), crate::value::int_from_i64(7));
        let shadowed = vm.lookup_attr(&instance, "tag").unwrap().expect("own attribute");
        assert_eq!(py_repr(&shadowed), "7");
    }
}
