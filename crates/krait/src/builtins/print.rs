//! Implementation of the print() builtin function.

use crate::{
    except::{ExcType, RunResult},
    io::PrintWriter,
    signature::BoundArgs,
    tracer::VmTracer,
    value::{Payload, PyRef, none},
    vm::Vm,
};

/// Implementation of the print() builtin function.
///
/// Supported keyword arguments:
/// - `sep`: separator between values (default `" "`)
/// - `end`: string appended after the last value (default `"\n"`)
///
/// Each argument is converted through the str protocol (so user `__str__`
/// methods run); the whole call writes atomically to the stdout channel.
pub(super) fn builtin_print<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let args = bound.expect("args");
    let sep = string_kwarg(bound.expect("sep"), "sep", " ")?;
    let end = string_kwarg(bound.expect("end"), "end", "\n")?;

    let Payload::Tuple(items) = args.payload() else {
        return Err(crate::except::RunError::fatal("print argument collector must be a tuple"));
    };

    let mut output = String::new();
    for (index, value) in items.iter().enumerate() {
        if index > 0 {
            output.push_str(&sep);
        }
        output.push_str(&vm.str_of(value)?);
    }
    output.push_str(&end);

    vm.write_stdout(&output);
    Ok(none())
}

/// Extracts a string-valued kwarg, treating `None` as the default.
fn string_kwarg(value: PyRef, name: &str, default: &str) -> RunResult<String> {
    match value.payload() {
        Payload::None => Ok(default.to_owned()),
        Payload::Str(text) => Ok(text.to_string()),
        _ => Err(ExcType::type_error(format!(
            "{name} must be None or a str, not {}",
            value.type_name()
        ))),
    }
}
