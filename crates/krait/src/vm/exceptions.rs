//! Exception raising and block-stack unwinding.

use std::rc::Rc;

use super::{Flow, Vm};
use crate::{
    except::{ExcData, ExcType, RunError, RunResult, TraceRecord},
    frame::BlockKind,
    io::PrintWriter,
    tracer::VmTracer,
    types::PyType,
    value::{Payload, PyRef, exception_value, traceback_value, type_value},
};

/// What one round of block-stack inspection decided.
enum Unwind {
    /// A handler took the exception; execution resumes there.
    Handled,
    /// A WITH block was found; its saved `__exit__` must be called.
    CallExit { handler: usize },
    /// No block in this frame handles it; pop the frame.
    NextFrame,
}

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    /// Unwinds an in-flight exception.
    ///
    /// Walks the current frame's block stack innermost-first: LOOP blocks
    /// are discarded, EXCEPT and FINALLY blocks restore the recorded stack
    /// level and receive the exception, WITH blocks call the saved
    /// `__exit__` (a truthy result suppresses the exception). When a
    /// frame's blocks are spent the frame is popped, the call site is
    /// recorded on the traceback, and the caller frame is tried, down to
    /// `watermark`, beyond which the error propagates to this segment's
    /// caller.
    ///
    /// Returns `Ok(())` when a handler took the exception and dispatch may
    /// resume.
    pub(super) fn handle_exception(&mut self, error: RunError, watermark: usize) -> RunResult<()> {
        let mut exc = match error {
            RunError::Fatal(_) => return Err(error),
            RunError::Exc(value) => value,
        };
        self.tracer.on_raise(exc.type_name(), self.frame_depth());
        // Raising while another exception is being handled chains it as the
        // implicit context.
        self.attach_context(&exc);
        self.record_frame(&exc);

        loop {
            let step = {
                let frame = self.current_frame_mut();
                let mut step = Unwind::NextFrame;
                while let Some(block) = frame.blocks.pop() {
                    match block.kind {
                        BlockKind::Loop => {}
                        BlockKind::Except => {
                            frame.stack.truncate(block.level);
                            frame.pending_exc = Some(exc.clone());
                            let traceback =
                                traceback_value(exc.as_exception().map(ExcData::records).unwrap_or_default());
                            let exc_type = type_value(exc.ty().clone());
                            frame.push(traceback)?;
                            frame.push(exc.clone())?;
                            frame.push(exc_type)?;
                            frame.ip = block.handler;
                            step = Unwind::Handled;
                            break;
                        }
                        BlockKind::Finally => {
                            frame.stack.truncate(block.level);
                            frame.push(exc.clone())?;
                            frame.ip = block.handler;
                            step = Unwind::Handled;
                            break;
                        }
                        BlockKind::With => {
                            // The saved __exit__ sits at the recorded level.
                            frame.stack.truncate(block.level);
                            step = Unwind::CallExit {
                                handler: block.handler,
                            };
                            break;
                        }
                    }
                }
                step
            };

            match step {
                Unwind::Handled => return Ok(()),
                Unwind::CallExit { handler } => {
                    let exit = self.current_frame_mut().pop()?;
                    let exc_type = type_value(exc.ty().clone());
                    let traceback = traceback_value(exc.as_exception().map(ExcData::records).unwrap_or_default());
                    let exit_args = vec![exc_type, exc.clone(), traceback];
                    match self.call_and_run(exit, exit_args, Vec::new()) {
                        Ok(result) => match self.truthy(&result) {
                            Ok(true) => {
                                // Suppressed: resume after the with body with
                                // the stack already restored below the exit.
                                self.current_frame_mut().ip = handler;
                                return Ok(());
                            }
                            Ok(false) => {}
                            Err(RunError::Exc(new_exc)) => {
                                self.chain_replacement(&new_exc, exc);
                                exc = new_exc;
                                self.record_frame(&exc);
                            }
                            Err(fatal) => return Err(fatal),
                        },
                        Err(RunError::Exc(new_exc)) => {
                            // __exit__ itself raised; the new exception
                            // replaces the old one with it as context.
                            self.chain_replacement(&new_exc, exc);
                            exc = new_exc;
                            self.record_frame(&exc);
                        }
                        Err(fatal) => return Err(fatal),
                    }
                }
                Unwind::NextFrame => {
                    let finished = self.frames.pop().expect("unwinding frame exists");
                    self.tracer.on_return(self.frames.len());
                    if finished.in_generator {
                        // A generator frame always runs as the base of its
                        // own segment; exhaustion is the resumer's concern.
                        debug_assert_eq!(self.frames.len(), watermark);
                    }
                    if self.frames.len() == watermark {
                        return Err(RunError::Exc(exc));
                    }
                    // Record the call site in the caller before searching it.
                    self.record_frame(&exc);
                }
            }
        }
    }

    /// Appends the current frame's position to the exception's traceback.
    pub(super) fn record_frame(&self, exc: &PyRef) {
        if let Some(data) = exc.as_exception() {
            let frame = self.current_frame();
            let function = if frame.function.is_some() {
                Rc::clone(&frame.code.codename)
            } else {
                Rc::from("<module>")
            };
            data.push_record(TraceRecord {
                filename: Rc::clone(&frame.code.filename),
                line: frame.line,
                function,
            });
        }
    }

    /// Sets the implicit context when raising during handling.
    fn attach_context(&self, exc: &PyRef) {
        if let Some(pending) = &self.current_frame().pending_exc
            && !Rc::ptr_eq(pending, exc)
            && let Some(data) = exc.as_exception()
        {
            data.set_context(pending.clone());
        }
    }

    /// Chains `replaced` as the context of `new_exc` (exception raised while
    /// unwinding another).
    fn chain_replacement(&self, new_exc: &PyRef, replaced: PyRef) {
        if !Rc::ptr_eq(new_exc, &replaced)
            && let Some(data) = new_exc.as_exception()
        {
            data.set_context(replaced);
        }
    }

    /// `RaiseVarargs`: 0 re-raises the handled exception, 1 raises TOS,
    /// 2 raises TOS1 with TOS as explicit cause.
    pub(super) fn op_raise(&mut self, arg: u32) -> RunResult<Flow> {
        match arg {
            0 => match self.current_frame().pending_exc.clone() {
                Some(exc) => Err(RunError::Exc(exc)),
                None => Err(ExcType::RuntimeError.with_message("No active exception to re-raise")),
            },
            1 => {
                let value = self.current_frame_mut().pop()?;
                let exc = self.to_exception(value)?;
                Err(RunError::Exc(exc))
            }
            2 => {
                let cause_value = self.current_frame_mut().pop()?;
                let value = self.current_frame_mut().pop()?;
                let exc = self.to_exception(value)?;
                let cause = if cause_value.is_none() {
                    None
                } else {
                    Some(self.to_exception(cause_value)?)
                };
                if let Some(data) = exc.as_exception() {
                    data.set_cause(cause);
                }
                Err(RunError::Exc(exc))
            }
            _ => Err(RunError::fatal(format!("invalid raise argument {arg}"))),
        }
    }

    /// Coerces a raised value: an exception instance stays itself, an
    /// exception type is instantiated with no message.
    fn to_exception(&self, value: PyRef) -> RunResult<PyRef> {
        match value.payload() {
            Payload::Exception(_) => Ok(value),
            Payload::Type(ty) => match PyType::exc_kind(ty) {
                Some(kind) => Ok(exception_value(ty.clone(), ExcData::new(kind, None))),
                None => Err(ExcType::type_error("exceptions must derive from BaseException")),
            },
            _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
        }
    }

    /// Exception-handler matching for `CompareOp ExcMatch`.
    ///
    /// The left operand is the raised exception (or its type); the right is
    /// a handler class or tuple of classes. Matching walks the descriptor
    /// parent chain, so user subclasses match their builtin bases.
    pub(super) fn check_exc_match(&self, exception: &PyRef, handler: &PyRef) -> RunResult<bool> {
        match handler.payload() {
            Payload::Tuple(entries) => {
                for entry in entries {
                    if self.check_exc_match(exception, entry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Payload::Type(handler_ty) => {
                if PyType::exc_kind(handler_ty).is_none() {
                    return Err(ExcType::type_error(
                        "catching classes that do not inherit from BaseException is not allowed",
                    ));
                }
                match exception.payload() {
                    Payload::Exception(_) => Ok(PyType::is_subtype_of(exception.ty(), handler_ty)),
                    Payload::Type(exc_ty) if PyType::exc_kind(exc_ty).is_some() => {
                        Ok(PyType::is_subtype_of(exc_ty, handler_ty))
                    }
                    _ => Ok(false),
                }
            }
            _ => Err(ExcType::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }
}
