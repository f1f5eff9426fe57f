//! Container construction, subscription, and unpacking.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use super::{Flow, Vm};
use crate::{
    except::{ExcType, RunError, RunResult, index_error, key_error},
    intern::magic,
    io::PrintWriter,
    opcode::Opcode,
    py_hash::HashKey,
    tracer::VmTracer,
    value::{
        Dict, Payload, PyRef, Set, SliceData, dict_value, int_value, list, none, py_repr, set_value, slice_value,
        str_value, tuple,
    },
};

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    pub(super) fn op_build(&mut self, op: Opcode, arg: u32) -> RunResult<Flow> {
        let result = match op {
            Opcode::BuildTuple => tuple(self.current_frame_mut().pop_n(arg as usize)?),
            Opcode::BuildList => list(self.current_frame_mut().pop_n(arg as usize)?),
            Opcode::BuildSet => {
                let items = self.current_frame_mut().pop_n(arg as usize)?;
                let mut set = Set::new();
                for item in items {
                    let hash = HashKey::for_value(&item)?;
                    set.insert(hash, item);
                }
                set_value(set)
            }
            Opcode::BuildMap => {
                let flat = self.current_frame_mut().pop_n(2 * arg as usize)?;
                let mut dict = Dict::new();
                for pair in flat.chunks_exact(2) {
                    let (key, value) = (pair[0].clone(), pair[1].clone());
                    let hash = HashKey::for_value(&key)?;
                    dict.insert(hash, key, value);
                }
                dict_value(dict)
            }
            Opcode::BuildSlice => {
                if arg != 2 && arg != 3 {
                    return Err(RunError::fatal(format!("BuildSlice takes 2 or 3 values, got {arg}")));
                }
                let mut parts = self.current_frame_mut().pop_n(arg as usize)?;
                let step = if arg == 3 { parts.pop().expect("popped above") } else { none() };
                let stop = parts.pop().expect("popped above");
                let start = parts.pop().expect("popped above");
                slice_value(start, stop, step)
            }
            _ => return Err(RunError::fatal("non-build opcode routed to op_build")),
        };
        self.current_frame_mut().push(result)?;
        Ok(Flow::Continue)
    }

    /// `ListAppend`/`SetAdd`/`MapAdd` used by comprehension bodies: the
    /// container sits `arg` slots below the popped operand(s).
    pub(super) fn op_comprehension_add(&mut self, op: Opcode, arg: u32) -> RunResult<Flow> {
        match op {
            Opcode::ListAppend => {
                let item = self.current_frame_mut().pop()?;
                let container = self.current_frame().peek_at(arg as usize)?.clone();
                let Payload::List(items) = container.payload() else {
                    return Err(RunError::fatal("ListAppend target is not a list"));
                };
                items.borrow_mut().push(item);
            }
            Opcode::SetAdd => {
                let item = self.current_frame_mut().pop()?;
                let container = self.current_frame().peek_at(arg as usize)?.clone();
                let Payload::Set(set) = container.payload() else {
                    return Err(RunError::fatal("SetAdd target is not a set"));
                };
                let hash = HashKey::for_value(&item)?;
                set.borrow_mut().insert(hash, item);
            }
            Opcode::MapAdd => {
                let value = self.current_frame_mut().pop()?;
                let key = self.current_frame_mut().pop()?;
                let container = self.current_frame().peek_at(arg as usize)?.clone();
                let Payload::Dict(dict) = container.payload() else {
                    return Err(RunError::fatal("MapAdd target is not a dict"));
                };
                let hash = HashKey::for_value(&key)?;
                dict.borrow_mut().insert(hash, key, value);
            }
            _ => return Err(RunError::fatal("non-add opcode routed to op_comprehension_add")),
        }
        Ok(Flow::Continue)
    }

    pub(super) fn op_binary_subscr(&mut self) -> RunResult<Flow> {
        let index = self.current_frame_mut().pop()?;
        let container = self.current_frame_mut().pop()?;
        let value = self.subscr_get(&container, &index)?;
        self.current_frame_mut().push(value)?;
        Ok(Flow::Continue)
    }

    pub(super) fn op_store_subscr(&mut self) -> RunResult<Flow> {
        let index = self.current_frame_mut().pop()?;
        let container = self.current_frame_mut().pop()?;
        let value = self.current_frame_mut().pop()?;
        self.subscr_set(&container, index, value)?;
        Ok(Flow::Continue)
    }

    pub(super) fn op_delete_subscr(&mut self) -> RunResult<Flow> {
        let index = self.current_frame_mut().pop()?;
        let container = self.current_frame_mut().pop()?;
        self.subscr_del(&container, &index)?;
        Ok(Flow::Continue)
    }

    fn subscr_get(&mut self, container: &PyRef, index: &PyRef) -> RunResult<PyRef> {
        if let Payload::Slice(slice) = index.payload() {
            return self.slice_get(container, slice);
        }
        match container.payload() {
            Payload::Dict(dict) => {
                let hash = HashKey::for_value(index)?;
                dict.borrow().get(&hash).ok_or_else(|| key_error(py_repr(index)))
            }
            Payload::List(items) => {
                let items = items.borrow();
                let position = sequence_index(index, items.len(), "list")?;
                Ok(items[position].clone())
            }
            Payload::Tuple(items) => {
                let position = sequence_index(index, items.len(), "tuple")?;
                Ok(items[position].clone())
            }
            Payload::Str(text) => {
                let length = text.chars().count();
                let position = sequence_index(index, length, "string")?;
                let ch = text.chars().nth(position).expect("index checked against length");
                Ok(str_value(ch.to_string()))
            }
            Payload::Range(range) => {
                let Some(offset) = crate::value::int_of(index) else {
                    return Err(ExcType::type_error(format!(
                        "range indices must be integers, not {}",
                        index.type_name()
                    )));
                };
                let length = range.len();
                let actual = if offset.is_negative() { &offset + &length } else { offset };
                if actual.is_negative() || actual >= length {
                    return Err(index_error("range object"));
                }
                Ok(int_value(range.item(&actual)))
            }
            _ => {
                if let Some(result) = self.call_type_method(container, magic::GETITEM, vec![index.clone()])? {
                    return Ok(result);
                }
                Err(ExcType::type_error(format!(
                    "'{}' object is not subscriptable",
                    container.type_name()
                )))
            }
        }
    }

    fn subscr_set(&mut self, container: &PyRef, index: PyRef, value: PyRef) -> RunResult<()> {
        match container.payload() {
            Payload::Dict(dict) => {
                let hash = HashKey::for_value(&index)?;
                dict.borrow_mut().insert(hash, index, value);
                Ok(())
            }
            Payload::List(items) => {
                let mut items = items.borrow_mut();
                let position = assignment_index(&index, items.len())?;
                items[position] = value;
                Ok(())
            }
            _ => {
                if self
                    .call_type_method(container, magic::SETITEM, vec![index, value])?
                    .is_some()
                {
                    return Ok(());
                }
                Err(ExcType::type_error(format!(
                    "'{}' object does not support item assignment",
                    container.type_name()
                )))
            }
        }
    }

    fn subscr_del(&mut self, container: &PyRef, index: &PyRef) -> RunResult<()> {
        match container.payload() {
            Payload::Dict(dict) => {
                let hash = HashKey::for_value(index)?;
                match dict.borrow_mut().remove(&hash) {
                    Some(_) => Ok(()),
                    None => Err(key_error(py_repr(index))),
                }
            }
            Payload::List(items) => {
                let mut items = items.borrow_mut();
                let position = assignment_index(index, items.len())?;
                items.remove(position);
                Ok(())
            }
            _ => {
                if self
                    .call_type_method(container, magic::DELITEM, vec![index.clone()])?
                    .is_some()
                {
                    return Ok(());
                }
                Err(ExcType::type_error(format!(
                    "'{}' object doesn't support item deletion",
                    container.type_name()
                )))
            }
        }
    }

    /// Slicing over the sequence kinds, producing a new container.
    fn slice_get(&mut self, container: &PyRef, slice: &SliceData) -> RunResult<PyRef> {
        match container.payload() {
            Payload::List(items) => {
                let items = items.borrow();
                let picked = slice_pick(slice, &items)?;
                Ok(list(picked))
            }
            Payload::Tuple(items) => {
                let picked = slice_pick(slice, items)?;
                Ok(tuple(picked))
            }
            Payload::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let (start, stop, step) = slice_bounds(slice, chars.len() as i64)?;
                let mut out = String::new();
                let mut position = start;
                while (step > 0 && position < stop) || (step < 0 && position > stop) {
                    out.push(chars[position as usize]);
                    position += step;
                }
                Ok(str_value(out))
            }
            _ => Err(ExcType::type_error(format!(
                "'{}' object is not subscriptable",
                container.type_name()
            ))),
        }
    }
}

/// Picks slice elements out of a sequence snapshot.
fn slice_pick(slice: &SliceData, items: &[PyRef]) -> RunResult<Vec<PyRef>> {
    let (start, stop, step) = slice_bounds(slice, items.len() as i64)?;
    let mut picked = Vec::new();
    let mut position = start;
    while (step > 0 && position < stop) || (step < 0 && position > stop) {
        picked.push(items[position as usize].clone());
        position += step;
    }
    Ok(picked)
}

/// Resolves slice bounds against a sequence length, clamping as Python's
/// `slice.indices` does.
fn slice_bounds(slice: &SliceData, len: i64) -> RunResult<(i64, i64, i64)> {
    let step = match slice_component(&slice.step)? {
        Some(0) => return Err(ExcType::value_error("slice step cannot be zero")),
        Some(step) => step,
        None => 1,
    };
    let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
    let start = match slice_component(&slice.start)? {
        Some(raw) => clamp_index(raw, len, step),
        None => default_start,
    };
    let stop = match slice_component(&slice.stop)? {
        Some(raw) => clamp_index(raw, len, step),
        None => default_stop,
    };
    Ok((start, stop, step))
}

fn clamp_index(raw: i64, len: i64, step: i64) -> i64 {
    let adjusted = if raw < 0 { raw + len } else { raw };
    if adjusted < 0 {
        if step < 0 { -1 } else { 0 }
    } else if adjusted >= len {
        if step < 0 { len - 1 } else { len }
    } else {
        adjusted
    }
}

fn slice_component(value: &PyRef) -> RunResult<Option<i64>> {
    match value.payload() {
        Payload::None => Ok(None),
        _ => match crate::value::int_of(value).and_then(|i| i.to_i64()) {
            Some(i) => Ok(Some(i)),
            None => Err(ExcType::type_error(
                "slice indices must be integers or None",
            )),
        },
    }
}

/// Normalizes a read index into a sequence of the given length.
fn sequence_index(index: &PyRef, len: usize, kind_name: &str) -> RunResult<usize> {
    let Some(offset) = crate::value::int_of(index) else {
        return Err(ExcType::type_error(format!(
            "{kind_name} indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len_big = BigInt::from(len);
    let actual = if offset.is_negative() { &offset + &len_big } else { offset };
    if actual.is_negative() || actual >= len_big {
        return Err(index_error(kind_name));
    }
    Ok(actual.to_usize().expect("bounded by sequence length"))
}

/// Normalizes an assignment index into a list of the given length.
fn assignment_index(index: &PyRef, len: usize) -> RunResult<usize> {
    let Some(offset) = crate::value::int_of(index) else {
        return Err(ExcType::type_error(format!(
            "list indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len_big = BigInt::from(len);
    let actual = if offset.is_negative() { &offset + &len_big } else { offset };
    if actual.is_negative() || actual >= len_big {
        return Err(ExcType::IndexError.with_message("list assignment index out of range"));
    }
    Ok(actual.to_usize().expect("bounded by sequence length"))
}

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    /// `UnpackSequence`: the popped iterable must produce exactly `arg`
    /// values, pushed so the first unpacked value ends up on top.
    pub(super) fn op_unpack_sequence(&mut self, arg: u32) -> RunResult<Flow> {
        let iterable = self.current_frame_mut().pop()?;
        let expected = arg as usize;
        let iterator = self.get_iter(iterable)?;
        let mut values = Vec::with_capacity(expected);
        loop {
            match self.iter_next(&iterator) {
                Ok(value) => {
                    if values.len() == expected {
                        return Err(ExcType::value_error(format!(
                            "too many values to unpack (expected {expected})"
                        )));
                    }
                    values.push(value);
                }
                Err(error) if error.is_exc_kind(ExcType::StopIteration) => break,
                Err(error) => return Err(error),
            }
        }
        if values.len() < expected {
            return Err(ExcType::value_error(format!(
                "not enough values to unpack (expected {expected}, got {})",
                values.len()
            )));
        }
        for value in values.into_iter().rev() {
            self.current_frame_mut().push(value)?;
        }
        Ok(Flow::Continue)
    }
}
