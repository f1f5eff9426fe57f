//! Implementation of the abs() builtin function.

use num_traits::Signed;

use crate::{
    except::{ExcType, RunResult},
    signature::BoundArgs,
    value::{PyRef, int_of, int_value},
};

/// Implementation of the abs() builtin function.
pub(super) fn builtin_abs(mut bound: BoundArgs) -> RunResult<PyRef> {
    let x = bound.expect("x");
    match int_of(&x) {
        Some(value) => Ok(int_value(value.abs())),
        None => Err(ExcType::type_error(format!(
            "bad operand type for abs(): '{}'",
            x.type_name()
        ))),
    }
}
