//! The call protocol.
//!
//! `call_value` dispatches on the callable's kind: user functions bind
//! their signature and push a frame (or wrap it in a generator when the
//! code carries the GENERATOR flag), builtins bind their declared signature
//! and run synchronously, bound methods prepend their receiver, and type
//! values route through their constructor hook.

use std::rc::Rc;

use indexmap::IndexMap;
use num_bigint::BigInt;

use super::{ExecExit, Flow, Vm};
use crate::{
    code::CodeFlags,
    builtins,
    except::{ExcData, ExcType, RunError, RunResult},
    frame::Frame,
    function::FunctionData,
    generator::GeneratorData,
    intern::magic,
    io::PrintWriter,
    py_hash::HashKey,
    signature::bind_builtin,
    tracer::VmTracer,
    types::{PyType, TypeRef, TypeSlot},
    value::{
        Dict, Payload, PyRef, Set, bool_value, dict_value, exception_value, function_value, generator_value,
        instance_value, int_value, list, py_str, range_value, set_value, str_value, tuple, type_value,
    },
};

/// Result of dispatching one call.
pub(super) enum CallFlow {
    /// The call completed synchronously with a value.
    Value(PyRef),
    /// A user-function frame was pushed; the main loop continues into it.
    FramePushed,
}

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    pub(super) fn op_call_function(&mut self, argc: u32) -> RunResult<Flow> {
        let args = self.current_frame_mut().pop_n(argc as usize)?;
        let callable = self.current_frame_mut().pop()?;
        match self.call_value(callable, args, Vec::new())? {
            CallFlow::Value(value) => {
                self.current_frame_mut().push(value)?;
            }
            CallFlow::FramePushed => {}
        }
        Ok(Flow::Continue)
    }

    /// `CallFunctionKw`: TOS is a constant tuple naming the trailing
    /// keyword arguments; `argc` counts all argument values below it.
    pub(super) fn op_call_function_kw(&mut self, argc: u32) -> RunResult<Flow> {
        let names = self.current_frame_mut().pop()?;
        let Payload::Tuple(names) = names.payload() else {
            return Err(RunError::fatal("CallFunctionKw expects a tuple of keyword names"));
        };
        let mut keyword_names = Vec::with_capacity(names.len());
        for name in names {
            let Payload::Str(text) = name.payload() else {
                return Err(RunError::fatal("keyword names must be strings"));
            };
            keyword_names.push(Rc::clone(text));
        }
        if keyword_names.len() > argc as usize {
            return Err(RunError::fatal("more keyword names than arguments"));
        }
        let mut values = self.current_frame_mut().pop_n(argc as usize)?;
        let kw_values = values.split_off(values.len() - keyword_names.len());
        let kwargs: Vec<(Rc<str>, PyRef)> = keyword_names.into_iter().zip(kw_values).collect();
        let callable = self.current_frame_mut().pop()?;
        match self.call_value(callable, values, kwargs)? {
            CallFlow::Value(value) => {
                self.current_frame_mut().push(value)?;
            }
            CallFlow::FramePushed => {}
        }
        Ok(Flow::Continue)
    }

    /// `CallFunctionEx`: positional arguments arrive as an iterable, and
    /// when bit 0 of the operand is set, keyword arguments as a mapping.
    pub(super) fn op_call_function_ex(&mut self, flags: u32) -> RunResult<Flow> {
        let kwargs = if flags & 1 == 1 {
            let mapping = self.current_frame_mut().pop()?;
            let Payload::Dict(dict) = mapping.payload() else {
                return Err(ExcType::type_error(format!(
                    "argument after ** must be a mapping, not {}",
                    mapping.type_name()
                )));
            };
            let mut kwargs = Vec::with_capacity(dict.borrow().len());
            for (key, value) in dict.borrow().iter() {
                let Payload::Str(name) = key.payload() else {
                    return Err(ExcType::type_error("keywords must be strings"));
                };
                kwargs.push((Rc::clone(name), value.clone()));
            }
            kwargs
        } else {
            Vec::new()
        };
        let args_iterable = self.current_frame_mut().pop()?;
        let args = self.collect_iterable(args_iterable)?;
        let callable = self.current_frame_mut().pop()?;
        match self.call_value(callable, args, kwargs)? {
            CallFlow::Value(value) => {
                self.current_frame_mut().push(value)?;
            }
            CallFlow::FramePushed => {}
        }
        Ok(Flow::Continue)
    }

    /// Dispatches a call on any callable value.
    pub(super) fn call_value(
        &mut self,
        callable: PyRef,
        mut args: Vec<PyRef>,
        kwargs: Vec<(Rc<str>, PyRef)>,
    ) -> RunResult<CallFlow> {
        match callable.payload() {
            Payload::Function(_) => self.call_user_function(callable, args, kwargs),
            Payload::Builtin(kind) => {
                let kind = *kind;
                let bound = bind_builtin(kind.as_str(), &kind.signature(), args, kwargs)?;
                let value = builtins::invoke(self, kind, bound)?;
                Ok(CallFlow::Value(value))
            }
            Payload::BoundMethod { func, receiver } => {
                let func = func.clone();
                args.insert(0, receiver.clone());
                self.call_value(func, args, kwargs)
            }
            Payload::Type(ty) => {
                let ty = ty.clone();
                self.construct(ty, args, kwargs).map(CallFlow::Value)
            }
            _ => Err(ExcType::type_error(format!(
                "'{}' object is not callable",
                callable.type_name()
            ))),
        }
    }

    /// Calls a user function: binds arguments, then either pushes the frame
    /// (plain call) or wraps the bound frame in a CREATED generator without
    /// executing any instruction.
    fn call_user_function(
        &mut self,
        function: PyRef,
        args: Vec<PyRef>,
        kwargs: Vec<(Rc<str>, PyRef)>,
    ) -> RunResult<CallFlow> {
        let Payload::Function(data) = function.payload() else {
            return Err(RunError::fatal("call_user_function requires a function value"));
        };
        let code = Rc::clone(data.code());
        if code.flags.contains(CodeFlags::ASYNC) {
            return Err(ExcType::NotImplementedError.with_message("async functions are not supported"));
        }
        if code.stack_size > self.limits.max_stack_size {
            return Err(RunError::fatal(format!(
                "code declares stack depth {} beyond the configured cap {}",
                code.stack_size, self.limits.max_stack_size,
            )));
        }
        let signature = Rc::clone(data.signature());
        if code.varnames.len() < signature.param_slots() {
            return Err(RunError::fatal(format!(
                "code for {} has {} varnames for {} parameter slots",
                data.name(),
                code.varnames.len(),
                signature.param_slots(),
            )));
        }
        let locals = signature.bind(
            data.name(),
            code.varnames.len(),
            data.defaults(),
            data.kw_defaults(),
            args,
            kwargs,
        )?;
        let name = Rc::clone(&code.codename);
        let mut frame = Frame::for_call(function.clone(), locals)?;
        if code.is_generator() {
            frame.in_generator = true;
            return Ok(CallFlow::Value(generator_value(GeneratorData::new(name, frame))));
        }
        self.limits.check_recursion_depth(self.frames.len())?;
        self.frames.push(frame);
        self.tracer.on_call(&name, self.frames.len());
        Ok(CallFlow::FramePushed)
    }

    /// Calls a callable and, when it pushes a frame, runs that frame to
    /// completion in a nested watermarked segment. Used wherever dispatch
    /// itself needs a result (magic methods, `__init__`, `__exit__`,
    /// builtins like `next` on user iterators).
    pub(crate) fn call_and_run(
        &mut self,
        callable: PyRef,
        args: Vec<PyRef>,
        kwargs: Vec<(Rc<str>, PyRef)>,
    ) -> RunResult<PyRef> {
        match self.call_value(callable, args, kwargs)? {
            CallFlow::Value(value) => Ok(value),
            CallFlow::FramePushed => {
                let watermark = self.frames.len() - 1;
                match self.execute(watermark)? {
                    ExecExit::Return(value) => Ok(value),
                    ExecExit::Yield { .. } => Err(RunError::fatal("yield escaped a nested call")),
                }
            }
        }
    }

    /// `MakeFunction`: pops the code object, then (per the operand's flag
    /// bits) the closure tuple, the keyword-only defaults dict, and the
    /// positional defaults tuple.
    pub(super) fn op_make_function(&mut self, flags: u32) -> RunResult<Flow> {
        let code_object = self.current_frame_mut().pop()?;
        let Payload::Code(code) = code_object.payload() else {
            return Err(RunError::fatal("MakeFunction expects a code object on top"));
        };
        let code = Rc::clone(code);

        let closure: Vec<PyRef> = if flags & 0x08 != 0 {
            let closure_tuple = self.current_frame_mut().pop()?;
            let Payload::Tuple(cells) = closure_tuple.payload() else {
                return Err(RunError::fatal("MakeFunction closure operand must be a tuple"));
            };
            for cell in cells {
                if !matches!(cell.payload(), Payload::Cell(_)) {
                    return Err(RunError::fatal("closure tuple must contain cells"));
                }
            }
            cells.clone()
        } else {
            Vec::new()
        };

        let kw_defaults: IndexMap<Rc<str>, PyRef> = if flags & 0x02 != 0 {
            let mapping = self.current_frame_mut().pop()?;
            let Payload::Dict(dict) = mapping.payload() else {
                return Err(RunError::fatal("MakeFunction keyword defaults must be a dict"));
            };
            let mut defaults = IndexMap::new();
            for (key, value) in dict.borrow().iter() {
                let Payload::Str(name) = key.payload() else {
                    return Err(RunError::fatal("keyword default names must be strings"));
                };
                defaults.insert(Rc::clone(name), value.clone());
            }
            defaults
        } else {
            IndexMap::new()
        };

        let defaults: Vec<PyRef> = if flags & 0x01 != 0 {
            let defaults_tuple = self.current_frame_mut().pop()?;
            let Payload::Tuple(values) = defaults_tuple.payload() else {
                return Err(RunError::fatal("MakeFunction defaults operand must be a tuple"));
            };
            values.clone()
        } else {
            Vec::new()
        };

        let module = Rc::clone(&self.current_frame().module);
        let function = function_value(FunctionData::new(code, module, defaults, kw_defaults, closure));
        self.current_frame_mut().push(function)?;
        Ok(Flow::Continue)
    }

    /// The constructor hook: calling a type value.
    fn construct(&mut self, ty: TypeRef, args: Vec<PyRef>, kwargs: Vec<(Rc<str>, PyRef)>) -> RunResult<PyRef> {
        // Exception types (builtin or user subclasses) build exception
        // instances carrying the nearest builtin kind.
        if let Some(kind) = PyType::exc_kind(&ty) {
            if !kwargs.is_empty() {
                return Err(ExcType::type_error(format!(
                    "{}() takes no keyword arguments",
                    ty.name()
                )));
            }
            let message = match args.len() {
                0 => None,
                1 => Some(self.str_of(&args[0])?),
                _ => Some(py_str(&tuple(args))),
            };
            return Ok(exception_value(ty, ExcData::new(kind, message)));
        }

        match ty.slot() {
            TypeSlot::Instance | TypeSlot::Object => {
                let instance = instance_value(ty.clone());
                match PyType::lookup(&ty, magic::INIT) {
                    Some(init) => {
                        let mut init_args = Vec::with_capacity(args.len() + 1);
                        init_args.push(instance.clone());
                        init_args.extend(args);
                        let result = self.call_and_run(init, init_args, kwargs)?;
                        if !result.is_none() {
                            return Err(ExcType::type_error(format!(
                                "__init__() should return None, not '{}'",
                                result.type_name()
                            )));
                        }
                    }
                    None => {
                        if !args.is_empty() || !kwargs.is_empty() {
                            return Err(ExcType::type_error(format!("{}() takes no arguments", ty.name())));
                        }
                    }
                }
                Ok(instance)
            }
            TypeSlot::Type => {
                let [value] = one_arg("type", args, kwargs)?;
                Ok(type_value(value.ty().clone()))
            }
            TypeSlot::Bool => {
                let value = optional_arg("bool", args, kwargs)?;
                match value {
                    Some(value) => Ok(bool_value(self.truthy(&value)?)),
                    None => Ok(bool_value(false)),
                }
            }
            TypeSlot::Int => {
                let value = optional_arg("int", args, kwargs)?;
                match value {
                    None => Ok(int_value(BigInt::from(0))),
                    Some(value) => match value.payload() {
                        Payload::Int(_) | Payload::Bool(_) => {
                            Ok(int_value(crate::value::int_of(&value).expect("int or bool")))
                        }
                        Payload::Str(text) => match text.trim().parse::<BigInt>() {
                            Ok(parsed) => Ok(int_value(parsed)),
                            Err(_) => Err(ExcType::value_error(format!(
                                "invalid literal for int() with base 10: {}",
                                crate::value::py_repr(&value)
                            ))),
                        },
                        _ => Err(ExcType::type_error(format!(
                            "int() argument must be a string or a number, not '{}'",
                            value.type_name()
                        ))),
                    },
                }
            }
            TypeSlot::Str => {
                let value = optional_arg("str", args, kwargs)?;
                match value {
                    Some(value) => {
                        let text = self.str_of(&value)?;
                        Ok(str_value(text))
                    }
                    None => Ok(str_value("")),
                }
            }
            TypeSlot::Tuple => {
                let value = optional_arg("tuple", args, kwargs)?;
                match value {
                    Some(value) => Ok(tuple(self.collect_iterable(value)?)),
                    None => Ok(tuple(Vec::new())),
                }
            }
            TypeSlot::List => {
                let value = optional_arg("list", args, kwargs)?;
                match value {
                    Some(value) => Ok(list(self.collect_iterable(value)?)),
                    None => Ok(list(Vec::new())),
                }
            }
            TypeSlot::Set => {
                let value = optional_arg("set", args, kwargs)?;
                let mut set = Set::new();
                if let Some(value) = value {
                    for item in self.collect_iterable(value)? {
                        let hash = HashKey::for_value(&item)?;
                        set.insert(hash, item);
                    }
                }
                Ok(set_value(set))
            }
            TypeSlot::Dict => {
                let value = optional_arg("dict", args, kwargs)?;
                match value {
                    None => Ok(dict_value(Dict::new())),
                    Some(value) => match value.payload() {
                        Payload::Dict(source) => Ok(dict_value(source.borrow().clone())),
                        _ => Err(ExcType::type_error(format!(
                            "dict() argument must be a mapping, not '{}'",
                            value.type_name()
                        ))),
                    },
                }
            }
            TypeSlot::Range => {
                if !kwargs.is_empty() {
                    return Err(ExcType::type_error("range() takes no keyword arguments"));
                }
                let mut bounds = Vec::with_capacity(args.len());
                for value in &args {
                    match crate::value::int_of(value) {
                        Some(bound) => bounds.push(bound),
                        None => {
                            return Err(ExcType::type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                value.type_name()
                            )));
                        }
                    }
                }
                match bounds.len() {
                    1 => range_value(BigInt::from(0), bounds.remove(0), BigInt::from(1)),
                    2 => {
                        let stop = bounds.pop().expect("length checked");
                        let start = bounds.pop().expect("length checked");
                        range_value(start, stop, BigInt::from(1))
                    }
                    3 => {
                        let step = bounds.pop().expect("length checked");
                        let stop = bounds.pop().expect("length checked");
                        let start = bounds.pop().expect("length checked");
                        range_value(start, stop, step)
                    }
                    0 => Err(ExcType::type_error("range expected at least 1 argument, got 0")),
                    n => Err(ExcType::type_error(format!(
                        "range expected at most 3 arguments, got {n}"
                    ))),
                }
            }
            _ => Err(ExcType::type_error(format!(
                "cannot create '{}' instances",
                ty.name()
            ))),
        }
    }
}

/// Exactly one positional argument, no keywords.
fn one_arg(name: &str, mut args: Vec<PyRef>, kwargs: Vec<(Rc<str>, PyRef)>) -> RunResult<[PyRef; 1]> {
    if !kwargs.is_empty() {
        return Err(ExcType::type_error(format!("{name}() takes no keyword arguments")));
    }
    if args.len() != 1 {
        return Err(ExcType::type_error(format!(
            "{name}() takes exactly one argument ({} given)",
            args.len()
        )));
    }
    Ok([args.remove(0)])
}

/// At most one positional argument, no keywords.
fn optional_arg(name: &str, mut args: Vec<PyRef>, kwargs: Vec<(Rc<str>, PyRef)>) -> RunResult<Option<PyRef>> {
    if !kwargs.is_empty() {
        return Err(ExcType::type_error(format!("{name}() takes no keyword arguments")));
    }
    match args.len() {
        0 => Ok(None),
        1 => Ok(Some(args.remove(0))),
        n => Err(ExcType::type_error(format!(
            "{name}() takes at most 1 argument ({n} given)"
        ))),
    }
}
