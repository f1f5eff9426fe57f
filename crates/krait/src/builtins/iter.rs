//! Implementations of the iter() and next() builtin functions.

use crate::{
    except::{ExcType, RunResult},
    io::PrintWriter,
    signature::BoundArgs,
    tracer::VmTracer,
    value::PyRef,
    vm::Vm,
};

/// Implementation of the iter() builtin function.
pub(super) fn builtin_iter<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let iterable = bound.expect("iterable");
    vm.get_iter(iterable)
}

/// Implementation of the next() builtin function.
///
/// With a default, exhaustion returns the default instead of raising; any
/// other exception always propagates.
pub(super) fn builtin_next<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let iterator = bound.expect("iterator");
    let default = bound.take("default");
    match vm.iter_next(&iterator) {
        Ok(value) => Ok(value),
        Err(error) if error.is_exc_kind(ExcType::StopIteration) => match default {
            Some(default) => Ok(default),
            None => Err(error),
        },
        Err(error) => Err(error),
    }
}
