#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython")]

mod builder;
mod builtins;
mod code;
mod except;
mod frame;
mod function;
mod generator;
mod intern;
mod io;
mod module;
mod object;
mod opcode;
mod py_hash;
mod resource;
mod run;
mod signature;
mod tracer;
mod types;
mod value;
mod vm;

pub use crate::{
    builder::{CodeBuilder, Label},
    code::{Code, CodeFlags, Const},
    except::{ExcType, Exception, FatalError, StackFrame},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::{InvalidValueError, Object},
    opcode::{BinaryOpKind, CompareOpKind, Instr, Opcode},
    resource::{DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_MAX_STACK_SIZE, ResourceLimits},
    run::{RunFailure, Runner},
    tracer::{CountingTracer, NoopTracer, StderrTracer, VmTracer},
};
