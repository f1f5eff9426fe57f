//! Comparison dispatch.
//!
//! `==` falls back to identity when no native or magic-method answer
//! exists; ordering comparisons with no answer raise `TypeError`. Set
//! orderings are subset/superset tests when both operands are sets, else
//! they fall through like any other unordered pair.

use std::{cmp::Ordering, rc::Rc};

use super::{Flow, Vm};
use crate::{
    except::{ExcType, RunResult},
    intern::magic,
    io::PrintWriter,
    opcode::CompareOpKind,
    py_hash::HashKey,
    tracer::VmTracer,
    types::PyType,
    value::{Payload, PyRef, bool_value, int_of, native_cmp, native_eq},
};

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    pub(super) fn op_compare(&mut self, kind: CompareOpKind) -> RunResult<Flow> {
        let rhs = self.current_frame_mut().pop()?;
        let lhs = self.current_frame_mut().pop()?;
        let result = match kind {
            CompareOpKind::Is => bool_value(Rc::ptr_eq(&lhs, &rhs)),
            CompareOpKind::IsNot => bool_value(!Rc::ptr_eq(&lhs, &rhs)),
            CompareOpKind::In => bool_value(self.contains(&rhs, &lhs)?),
            CompareOpKind::NotIn => bool_value(!self.contains(&rhs, &lhs)?),
            CompareOpKind::ExcMatch => bool_value(self.check_exc_match(&lhs, &rhs)?),
            CompareOpKind::Eq => bool_value(self.eq_value(&lhs, &rhs)?),
            CompareOpKind::Ne => bool_value(!self.eq_value(&lhs, &rhs)?),
            CompareOpKind::Lt | CompareOpKind::Le | CompareOpKind::Gt | CompareOpKind::Ge => {
                self.ordering(kind, &lhs, &rhs)?
            }
        };
        self.current_frame_mut().push(result)?;
        Ok(Flow::Continue)
    }

    /// Equality through the protocol; defaults to identity.
    pub(crate) fn eq_value(&mut self, lhs: &PyRef, rhs: &PyRef) -> RunResult<bool> {
        if let Some(answer) = native_eq(lhs, rhs) {
            return Ok(answer);
        }
        if let Some(method) = PyType::lookup(lhs.ty(), magic::EQ) {
            let result = self.call_and_run(method, vec![lhs.clone(), rhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return self.truthy(&result);
            }
        }
        if let Some(method) = PyType::lookup(rhs.ty(), magic::EQ) {
            let result = self.call_and_run(method, vec![rhs.clone(), lhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return self.truthy(&result);
            }
        }
        Ok(Rc::ptr_eq(lhs, rhs))
    }

    fn ordering(&mut self, kind: CompareOpKind, lhs: &PyRef, rhs: &PyRef) -> RunResult<PyRef> {
        if let Some(order) = native_cmp(lhs, rhs) {
            let answer = match kind {
                CompareOpKind::Lt => order == Ordering::Less,
                CompareOpKind::Le => order != Ordering::Greater,
                CompareOpKind::Gt => order == Ordering::Greater,
                CompareOpKind::Ge => order != Ordering::Less,
                _ => unreachable!("ordering handles only ordering kinds"),
            };
            return Ok(bool_value(answer));
        }

        // Sets order by inclusion when both operands are sets.
        if let (Payload::Set(a), Payload::Set(b)) = (lhs.payload(), rhs.payload()) {
            let (a, b) = (a.borrow(), b.borrow());
            let answer = match kind {
                CompareOpKind::Lt => a.len() < b.len() && a.is_subset(&b),
                CompareOpKind::Le => a.is_subset(&b),
                CompareOpKind::Gt => b.len() < a.len() && b.is_subset(&a),
                CompareOpKind::Ge => b.is_subset(&a),
                _ => unreachable!("ordering handles only ordering kinds"),
            };
            return Ok(bool_value(answer));
        }

        let (dunder, reflected) = match kind {
            CompareOpKind::Lt => (magic::LT, magic::GT),
            CompareOpKind::Le => (magic::LE, magic::GE),
            CompareOpKind::Gt => (magic::GT, magic::LT),
            CompareOpKind::Ge => (magic::GE, magic::LE),
            _ => unreachable!("ordering handles only ordering kinds"),
        };
        if let Some(method) = PyType::lookup(lhs.ty(), dunder) {
            let result = self.call_and_run(method, vec![lhs.clone(), rhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(method) = PyType::lookup(rhs.ty(), reflected) {
            let result = self.call_and_run(method, vec![rhs.clone(), lhs.clone()], Vec::new())?;
            if !matches!(result.payload(), Payload::NotImplemented) {
                return Ok(result);
            }
        }
        Err(ExcType::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            kind.symbol(),
            lhs.type_name(),
            rhs.type_name(),
        )))
    }

    /// Membership: `item in container`.
    pub(crate) fn contains(&mut self, container: &PyRef, item: &PyRef) -> RunResult<bool> {
        match container.payload() {
            Payload::Str(haystack) => match item.payload() {
                Payload::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                _ => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name()
                ))),
            },
            Payload::Tuple(items) => self.seq_contains(&items.clone(), item),
            Payload::List(items) => {
                let snapshot = items.borrow().clone();
                self.seq_contains(&snapshot, item)
            }
            Payload::Dict(dict) => {
                let hash = HashKey::for_value(item)?;
                Ok(dict.borrow().contains(&hash))
            }
            Payload::Set(set) => {
                let hash = HashKey::for_value(item)?;
                Ok(set.borrow().contains(&hash))
            }
            Payload::Range(range) => {
                let Some(candidate) = int_of(item) else {
                    return Ok(false);
                };
                let in_span = if range.step.is_positive() {
                    candidate >= range.start && candidate < range.stop
                } else {
                    candidate <= range.start && candidate > range.stop
                };
                use num_integer::Integer;
                use num_traits::{Signed, Zero};
                Ok(in_span && (&candidate - &range.start).mod_floor(&range.step).is_zero())
            }
            _ => {
                if let Some(result) = self.call_type_method(container, magic::CONTAINS, vec![item.clone()])? {
                    return self.truthy(&result);
                }
                Err(ExcType::type_error(format!(
                    "argument of type '{}' is not iterable",
                    container.type_name()
                )))
            }
        }
    }

    fn seq_contains(&mut self, items: &[PyRef], item: &PyRef) -> RunResult<bool> {
        for candidate in items {
            if self.eq_value(item, candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
