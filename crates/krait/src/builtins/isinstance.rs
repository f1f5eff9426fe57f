//! Implementation of the isinstance() builtin function.

use crate::{
    except::{ExcType, RunResult},
    signature::BoundArgs,
    types::PyType,
    value::{Payload, PyRef, bool_value},
};

/// Implementation of the isinstance() builtin function.
///
/// `classinfo` is a type or a tuple of types; matching walks the value's
/// type-descriptor parent chain (so `isinstance(True, int)` holds, and
/// instances of exception subclasses match their bases).
pub(super) fn builtin_isinstance(mut bound: BoundArgs) -> RunResult<PyRef> {
    let obj = bound.expect("obj");
    let classinfo = bound.expect("classinfo");
    Ok(bool_value(matches_classinfo(&obj, &classinfo)?))
}

fn matches_classinfo(obj: &PyRef, classinfo: &PyRef) -> RunResult<bool> {
    match classinfo.payload() {
        Payload::Type(ty) => Ok(PyType::is_subtype_of(obj.ty(), ty)),
        Payload::Tuple(entries) => {
            for entry in entries {
                if matches_classinfo(obj, entry)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}
