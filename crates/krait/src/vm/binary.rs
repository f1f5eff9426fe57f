//! Binary, in-place, and unary operator dispatch.
//!
//! Binary operations follow the protocol: a native fast path for builtin
//! kind pairs, then the left operand's magic method, then the right
//! operand's reflected method; a `NotImplemented` result falls through, and
//! exhausting every option raises `TypeError`.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use super::{Flow, Vm};
use crate::{
    except::{ExcType, RunResult, overflow_error, zero_division},
    io::PrintWriter,
    opcode::{BinaryOpKind, Opcode},
    py_hash::HashKey,
    tracer::VmTracer,
    types::PyType,
    value::{Payload, PyRef, Set, bool_value, int_of, int_value, list, set_value, str_value, tuple},
};

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    pub(super) fn op_unary(&mut self, op: Opcode) -> RunResult<Flow> {
        let operand = self.current_frame_mut().pop()?;
        let result = match op {
            Opcode::UnaryNot => bool_value(!self.truthy(&operand)?),
            Opcode::UnaryNeg => match int_of(&operand) {
                Some(value) => int_value(-value),
                None => return Err(unary_type_error("-", &operand)),
            },
            Opcode::UnaryPos => match int_of(&operand) {
                Some(value) => int_value(value),
                None => return Err(unary_type_error("+", &operand)),
            },
            Opcode::UnaryInvert => match int_of(&operand) {
                Some(value) => int_value(-value - 1),
                None => return Err(unary_type_error("~", &operand)),
            },
            _ => return Err(crate::except::RunError::fatal("non-unary opcode routed to op_unary")),
        };
        self.current_frame_mut().push(result)?;
        Ok(Flow::Continue)
    }

    pub(super) fn op_binary(&mut self, kind: BinaryOpKind) -> RunResult<Flow> {
        let rhs = self.current_frame_mut().pop()?;
        let lhs = self.current_frame_mut().pop()?;
        let result = self.binary_op(kind, lhs, rhs)?;
        self.current_frame_mut().push(result)?;
        Ok(Flow::Continue)
    }

    /// In-place variant: tries the in-place magic method, then native
    /// in-place mutation for lists and sets, then the plain binary path.
    pub(super) fn op_inplace(&mut self, kind: BinaryOpKind) -> RunResult<Flow> {
        let rhs = self.current_frame_mut().pop()?;
        let lhs = self.current_frame_mut().pop()?;

        if matches!(lhs.payload(), Payload::Instance)
            && let Some(method) = PyType::lookup(lhs.ty(), kind.inplace_dunder())
        {
            let result = self.call_and_run(method, vec![lhs.clone(), rhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                self.current_frame_mut().push(result)?;
                return Ok(Flow::Continue);
            }
        }

        // `list += iterable` is extend: any iterable works on the right
        // (a non-iterable raises TypeError from the iteration protocol, as
        // in CPython). `set |= set` unions in place.
        if kind == BinaryOpKind::Add
            && let Payload::List(items) = lhs.payload()
        {
            // collect_iterable snapshots list/tuple contents, so `x += x`
            // doubles cleanly.
            let appended = self.collect_iterable(rhs)?;
            items.borrow_mut().extend(appended);
            self.current_frame_mut().push(lhs)?;
            return Ok(Flow::Continue);
        }
        if kind == BinaryOpKind::BitOr
            && let (Payload::Set(target), Payload::Set(other)) = (lhs.payload(), rhs.payload())
            && !std::rc::Rc::ptr_eq(&lhs, &rhs)
        {
            let additions = other.borrow().clone();
            let mut target = target.borrow_mut();
            for (hash, value) in additions.iter_entries() {
                target.insert(hash.clone(), value.clone());
            }
            drop(target);
            self.current_frame_mut().push(lhs)?;
            return Ok(Flow::Continue);
        }

        let result = self.binary_op(kind, lhs, rhs)?;
        self.current_frame_mut().push(result)?;
        Ok(Flow::Continue)
    }

    /// Full binary dispatch on already-popped operands.
    pub(crate) fn binary_op(&mut self, kind: BinaryOpKind, lhs: PyRef, rhs: PyRef) -> RunResult<PyRef> {
        if let Some(result) = native_binary(kind, &lhs, &rhs)? {
            return Ok(result);
        }
        if let Some(method) = PyType::lookup(lhs.ty(), kind.dunder()) {
            let result = self.call_and_run(method, vec![lhs.clone(), rhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(method) = PyType::lookup(rhs.ty(), kind.reflected_dunder()) {
            let result = self.call_and_run(method, vec![rhs.clone(), lhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return Ok(result);
            }
        }
        Err(ExcType::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            kind.symbol(),
            lhs.type_name(),
            rhs.type_name(),
        )))
    }
}

fn unary_type_error(symbol: &str, operand: &PyRef) -> crate::except::RunError {
    ExcType::type_error(format!(
        "bad operand type for unary {symbol}: '{}'",
        operand.type_name()
    ))
}

/// Native implementations for builtin kind pairs; `Ok(None)` falls through
/// to magic-method dispatch.
fn native_binary(kind: BinaryOpKind, lhs: &PyRef, rhs: &PyRef) -> RunResult<Option<PyRef>> {
    // Integer arithmetic (bool participates as an int).
    if let (Some(a), Some(b)) = (int_of(lhs), int_of(rhs)) {
        return int_binary(kind, a, b).map(Some);
    }

    match (lhs.payload(), rhs.payload()) {
        (Payload::Str(a), Payload::Str(b)) if kind == BinaryOpKind::Add => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Some(str_value(joined)))
        }
        (Payload::Str(text), _) if kind == BinaryOpKind::Mul => repeat_str(text, rhs),
        (_, Payload::Str(text)) if kind == BinaryOpKind::Mul => repeat_str(text, lhs),
        (Payload::Tuple(a), Payload::Tuple(b)) if kind == BinaryOpKind::Add => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            Ok(Some(tuple(joined)))
        }
        (Payload::Tuple(items), _) if kind == BinaryOpKind::Mul => repeat_seq(items, rhs, true),
        (_, Payload::Tuple(items)) if kind == BinaryOpKind::Mul => repeat_seq(items, lhs, true),
        (Payload::List(a), Payload::List(b)) if kind == BinaryOpKind::Add => {
            let mut joined = a.borrow().clone();
            joined.extend(b.borrow().iter().cloned());
            Ok(Some(list(joined)))
        }
        (Payload::List(items), _) if kind == BinaryOpKind::Mul => repeat_seq(&items.borrow(), rhs, false),
        (_, Payload::List(items)) if kind == BinaryOpKind::Mul => repeat_seq(&items.borrow(), lhs, false),
        (Payload::Set(a), Payload::Set(b)) => Ok(set_algebra(kind, &a.borrow(), &b.borrow()).map(set_value)),
        _ => Ok(None),
    }
}

fn int_binary(kind: BinaryOpKind, a: BigInt, b: BigInt) -> RunResult<PyRef> {
    let result = match kind {
        BinaryOpKind::Add => a + b,
        BinaryOpKind::Sub => a - b,
        BinaryOpKind::Mul => a * b,
        BinaryOpKind::TrueDiv => {
            // There is no float kind to promote into: `/` is exact or an
            // error.
            if b.is_zero() {
                return Err(zero_division(false));
            }
            let (quotient, remainder) = a.div_rem(&b);
            if !remainder.is_zero() {
                return Err(ExcType::value_error("integer division result is not an integer"));
            }
            quotient
        }
        BinaryOpKind::FloorDiv => {
            if b.is_zero() {
                return Err(zero_division(true));
            }
            a.div_floor(&b)
        }
        BinaryOpKind::Mod => {
            if b.is_zero() {
                return Err(zero_division(true));
            }
            a.mod_floor(&b)
        }
        BinaryOpKind::Pow => {
            if b.is_negative() {
                // The numeric tower has no float kind to promote into.
                return Err(ExcType::value_error("pow() negative exponent"));
            }
            let Some(exponent) = b.to_u32() else {
                return Err(overflow_error("exponent too large"));
            };
            a.pow(exponent)
        }
        BinaryOpKind::LShift | BinaryOpKind::RShift => {
            if b.is_negative() {
                return Err(ExcType::value_error("negative shift count"));
            }
            let Some(shift) = b.to_u64().and_then(|v| usize::try_from(v).ok()) else {
                return Err(overflow_error("shift count too large"));
            };
            if kind == BinaryOpKind::LShift { a << shift } else { a >> shift }
        }
        BinaryOpKind::BitAnd => a & b,
        BinaryOpKind::BitOr => a | b,
        BinaryOpKind::BitXor => a ^ b,
    };
    Ok(int_value(result))
}

fn repeat_str(text: &str, count: &PyRef) -> RunResult<Option<PyRef>> {
    let Some(count) = int_of(count) else {
        return Ok(None);
    };
    let times = count.to_isize().map_or(0, |n| n.max(0)) as usize;
    if times.saturating_mul(text.len()) > u32::MAX as usize {
        return Err(overflow_error("repeated string is too long"));
    }
    Ok(Some(str_value(text.repeat(times))))
}

fn repeat_seq(items: &[PyRef], count: &PyRef, as_tuple: bool) -> RunResult<Option<PyRef>> {
    let Some(count) = int_of(count) else {
        return Ok(None);
    };
    let times = count.to_isize().map_or(0, |n| n.max(0)) as usize;
    if times.saturating_mul(items.len()) > u32::MAX as usize {
        return Err(overflow_error("repeated sequence is too long"));
    }
    let mut repeated = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        repeated.extend(items.iter().cloned());
    }
    Ok(Some(if as_tuple { tuple(repeated) } else { list(repeated) }))
}

fn set_algebra(kind: BinaryOpKind, a: &Set, b: &Set) -> Option<Set> {
    let mut result = Set::new();
    match kind {
        BinaryOpKind::BitOr => {
            for (hash, value) in a.iter_entries().chain(b.iter_entries()) {
                result.insert(hash.clone(), value.clone());
            }
        }
        BinaryOpKind::BitAnd => {
            for (hash, value) in a.iter_entries() {
                if b.contains(hash) {
                    result.insert(hash.clone(), value.clone());
                }
            }
        }
        BinaryOpKind::Sub => {
            for (hash, value) in a.iter_entries() {
                if !b.contains(hash) {
                    result.insert(hash.clone(), value.clone());
                }
            }
        }
        BinaryOpKind::BitXor => {
            for (hash, value) in a.iter_entries() {
                if !b.contains(hash) {
                    result.insert(hash.clone(), value.clone());
                }
            }
            for (hash, value) in b.iter_entries() {
                if !a.contains(hash) {
                    result.insert(hash.clone(), value.clone());
                }
            }
        }
        _ => return None,
    }
    Some(result)
}
