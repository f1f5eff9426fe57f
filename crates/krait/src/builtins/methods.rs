//! Methods of the builtin container and text types.
//!
//! These are seeded into the type descriptors' attribute dictionaries at
//! bootstrap; attribute lookup binds them to their receiver, which arrives
//! here as the leading `self` parameter.

use num_traits::ToPrimitive;

use crate::{
    except::{ExcType, RunResult},
    io::PrintWriter,
    py_hash::HashKey,
    signature::BoundArgs,
    tracer::VmTracer,
    value::{Payload, PyRef, int_of, list, none, str_value, tuple},
    vm::Vm,
};

fn receiver_error(method: &str, expected: &str, got: &PyRef) -> crate::except::RunError {
    ExcType::type_error(format!(
        "descriptor '{method}' requires a '{expected}' object but received a '{}'",
        got.type_name()
    ))
}

/// `list.append(self, item)`
pub(super) fn list_append(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let item = bound.expect("item");
    let Payload::List(items) = receiver.payload() else {
        return Err(receiver_error("append", "list", &receiver));
    };
    items.borrow_mut().push(item);
    Ok(none())
}

/// `list.pop(self, index=-1)`
pub(super) fn list_pop(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let index = bound.expect("index");
    let Payload::List(items) = receiver.payload() else {
        return Err(receiver_error("pop", "list", &receiver));
    };
    let Some(index) = int_of(&index).and_then(|i| i.to_i64()) else {
        return Err(ExcType::type_error("list.pop() index must be an integer"));
    };
    let mut items = items.borrow_mut();
    if items.is_empty() {
        return Err(ExcType::IndexError.with_message("pop from empty list"));
    }
    let len = items.len() as i64;
    let actual = if index < 0 { index + len } else { index };
    if actual < 0 || actual >= len {
        return Err(ExcType::IndexError.with_message("pop index out of range"));
    }
    Ok(items.remove(actual as usize))
}

/// `dict.get(self, key, default=None)`
pub(super) fn dict_get(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let key = bound.expect("key");
    let default = bound.expect("default");
    let Payload::Dict(dict) = receiver.payload() else {
        return Err(receiver_error("get", "dict", &receiver));
    };
    let hash = HashKey::for_value(&key)?;
    Ok(dict.borrow().get(&hash).unwrap_or(default))
}

/// `dict.items(self)`
pub(super) fn dict_items(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let Payload::Dict(dict) = receiver.payload() else {
        return Err(receiver_error("items", "dict", &receiver));
    };
    let pairs = dict
        .borrow()
        .iter()
        .map(|(key, value)| tuple(vec![key.clone(), value.clone()]))
        .collect();
    Ok(list(pairs))
}

/// `dict.keys(self)`
pub(super) fn dict_keys(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let Payload::Dict(dict) = receiver.payload() else {
        return Err(receiver_error("keys", "dict", &receiver));
    };
    let keys = dict.borrow().iter().map(|(key, _)| key.clone()).collect();
    Ok(list(keys))
}

/// `dict.values(self)`
pub(super) fn dict_values(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let Payload::Dict(dict) = receiver.payload() else {
        return Err(receiver_error("values", "dict", &receiver));
    };
    let values = dict.borrow().iter().map(|(_, value)| value.clone()).collect();
    Ok(list(values))
}

/// `set.add(self, item)`
pub(super) fn set_add(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let item = bound.expect("item");
    let Payload::Set(set) = receiver.payload() else {
        return Err(receiver_error("add", "set", &receiver));
    };
    let hash = HashKey::for_value(&item)?;
    set.borrow_mut().insert(hash, item);
    Ok(none())
}

/// `str.join(self, iterable)`
///
/// Iterates through the full iterator protocol so generators work as the
/// argument; every produced element must be text.
pub(super) fn str_join<W: PrintWriter, Tr: VmTracer>(
    vm: &mut Vm<'_, W, Tr>,
    mut bound: BoundArgs,
) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let iterable = bound.expect("iterable");
    let Payload::Str(separator) = receiver.payload() else {
        return Err(receiver_error("join", "str", &receiver));
    };
    let mut pieces: Vec<String> = Vec::new();
    let iterator = vm.get_iter(iterable)?;
    loop {
        match vm.iter_next(&iterator) {
            Ok(item) => match item.payload() {
                Payload::Str(text) => pieces.push(text.to_string()),
                _ => {
                    return Err(ExcType::type_error(format!(
                        "sequence item {}: expected str instance, '{}' found",
                        pieces.len(),
                        item.type_name()
                    )));
                }
            },
            Err(error) if error.is_exc_kind(ExcType::StopIteration) => break,
            Err(error) => return Err(error),
        }
    }
    Ok(str_value(pieces.join(separator)))
}

/// `str.split(self, sep=None, maxsplit=-1)`
///
/// With no separator, splits on runs of whitespace and drops empty pieces;
/// an explicit empty separator is a ValueError.
pub(super) fn str_split(mut bound: BoundArgs) -> RunResult<PyRef> {
    let receiver = bound.expect("self");
    let sep = bound.take("sep");
    let maxsplit = bound.expect("maxsplit");
    let Payload::Str(text) = receiver.payload() else {
        return Err(receiver_error("split", "str", &receiver));
    };
    let maxsplit = int_of(&maxsplit).and_then(|i| i.to_i64()).unwrap_or(-1);

    let pieces: Vec<PyRef> = match sep.as_ref().map(|value| value.payload()) {
        None | Some(Payload::None) => {
            let mut parts: Vec<&str> = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
                    parts.push(rest.trim_end());
                    rest = "";
                } else {
                    match rest.find(char::is_whitespace) {
                        Some(end) => {
                            parts.push(&rest[..end]);
                            rest = rest[end..].trim_start();
                        }
                        None => {
                            parts.push(rest);
                            rest = "";
                        }
                    }
                }
            }
            parts.into_iter().map(str_value).collect()
        }
        Some(Payload::Str(separator)) => {
            if separator.is_empty() {
                return Err(ExcType::value_error("empty separator"));
            }
            if maxsplit >= 0 {
                text.splitn(maxsplit as usize + 1, separator.as_ref())
                    .map(str_value)
                    .collect()
            } else {
                text.split(separator.as_ref()).map(str_value).collect()
            }
        }
        Some(_) => {
            let got = sep.as_ref().map_or("?", |value| value.type_name());
            return Err(ExcType::type_error(format!("must be str or None, not {got}")));
        }
    };
    Ok(list(pieces))
}
