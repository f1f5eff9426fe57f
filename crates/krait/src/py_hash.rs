//! Hashing for dict and set keys.
//!
//! Keying is restricted to a pure domain so key equality never re-enters the
//! evaluator: numbers (bool unified with int so `True` and `1` collide as in
//! Python), text, tuples of hashables, `None`, and type identity. Everything
//! else raises `TypeError` when used as a key.

use std::rc::Rc;

use num_bigint::BigInt;

use crate::{
    except::{ExcType, RunError, RunResult},
    value::{Payload, PyRef},
};

/// A hashable projection of a runtime value.
///
/// Hash and equality agree with Python semantics for the hashable builtin
/// kinds; the original value object is stored alongside this key inside dict
/// and set entries, so insertion order and key identity survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HashKey {
    /// The `None` singleton.
    None,
    /// Integers and bools (`True` hashes like `1`).
    Int(BigInt),
    /// Text.
    Str(Rc<str>),
    /// Tuples of hashables.
    Tuple(Box<[HashKey]>),
    /// Type descriptors, by identity.
    Type(usize),
}

impl HashKey {
    /// Projects a value into the hashable domain.
    ///
    /// # Errors
    /// `TypeError` with Python's `unhashable type: '<name>'` message when the
    /// value's kind is not hashable (lists, dicts, sets, and every other
    /// mutable or structural kind).
    pub fn for_value(value: &PyRef) -> RunResult<Self> {
        match value.payload() {
            Payload::None => Ok(Self::None),
            Payload::Bool(b) => Ok(Self::Int(BigInt::from(u8::from(*b)))),
            Payload::Int(int) => Ok(Self::Int(int.clone())),
            Payload::Str(text) => Ok(Self::Str(Rc::clone(text))),
            Payload::Tuple(items) => {
                let keys = items.iter().map(Self::for_value).collect::<RunResult<Vec<_>>>()?;
                Ok(Self::Tuple(keys.into_boxed_slice()))
            }
            Payload::Type(ty) => Ok(Self::Type(Rc::as_ptr(ty) as usize)),
            _ => Err(unhashable(value)),
        }
    }

    /// Projects a borrowed string without cloning the backing value.
    pub fn from_str(text: &str) -> Self {
        Self::Str(Rc::from(text))
    }
}

fn unhashable(value: &PyRef) -> RunError {
    ExcType::type_error(format!("unhashable type: '{}'", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value;

    #[test]
    fn bool_and_int_share_a_key() {
        let one = HashKey::for_value(&value::int_from_i64(1)).unwrap();
        let truth = HashKey::for_value(&value::bool_value(true)).unwrap();
        assert_eq!(one, truth);
    }

    #[test]
    fn tuples_of_hashables_are_hashable() {
        let t = value::tuple(vec![value::int_from_i64(1), value::str_value("x")]);
        let key = HashKey::for_value(&t).unwrap();
        assert_eq!(
            key,
            HashKey::Tuple(vec![HashKey::Int(BigInt::from(1)), HashKey::from_str("x")].into_boxed_slice())
        );
    }

    #[test]
    fn lists_are_unhashable() {
        let l = value::list(vec![value::int_from_i64(1)]);
        let err = HashKey::for_value(&l).unwrap_err();
        assert!(err.is_exc_kind(ExcType::TypeError));
    }
}
