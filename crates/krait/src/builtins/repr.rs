//! Implementation of the repr() builtin function.

use crate::{
    except::RunResult,
    io::PrintWriter,
    signature::BoundArgs,
    tracer::VmTracer,
    value::{PyRef, str_value},
    vm::Vm,
};

/// Implementation of the repr() builtin function.
pub(super) fn builtin_repr<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let obj = bound.expect("obj");
    let text = vm.repr_of(&obj)?;
    Ok(str_value(text))
}
