//! Implementation of the len() builtin function.

use num_traits::Signed;

use crate::{
    except::{ExcType, RunResult},
    intern::magic,
    io::PrintWriter,
    signature::BoundArgs,
    tracer::VmTracer,
    value::{self, PyRef, int_value},
    vm::Vm,
};

/// Implementation of the len() builtin function.
///
/// Builtin containers answer natively; instances of user types route
/// through `__len__`, whose result must be a non-negative integer.
pub(super) fn builtin_len<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let obj = bound.expect("obj");
    if let Some(length) = value::py_len(&obj) {
        return Ok(int_value(length.into()));
    }
    if let Some(result) = vm.call_type_method(&obj, magic::LEN, Vec::new())? {
        let Some(length) = value::int_of(&result) else {
            return Err(ExcType::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                result.type_name()
            )));
        };
        if length.is_negative() {
            return Err(ExcType::value_error("__len__() should return >= 0"));
        }
        return Ok(int_value(length));
    }
    Err(ExcType::type_error(format!(
        "object of type '{}' has no len()",
        obj.type_name()
    )))
}
