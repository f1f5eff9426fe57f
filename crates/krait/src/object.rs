//! The public value type.
//!
//! [`Object`] is the host-facing representation of interpreter values: it
//! owns all its data, needs no interpreter to inspect, and converts in both
//! directions (inputs seed module globals; outputs come back from a run).
//! Kinds with no natural host mapping (functions, generators, ...) come
//! back output-only as [`Object::Repr`].

use std::fmt;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    except::{ExcType, RunResult},
    py_hash::HashKey,
    value::{self, Dict, Payload, PyRef, Set},
};

/// A value crossing the interpreter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    /// Python's `None` singleton.
    #[serde(alias = "none", alias = "NoneType")]
    None,
    /// Python boolean.
    #[serde(alias = "bool")]
    Bool(bool),
    /// Machine-width integer.
    #[serde(alias = "int")]
    Int(i64),
    /// Integer beyond machine width.
    BigInt(BigInt),
    /// Python string.
    #[serde(alias = "str")]
    String(String),
    /// Python tuple.
    #[serde(alias = "tuple")]
    Tuple(Vec<Object>),
    /// Python list.
    #[serde(alias = "list")]
    List(Vec<Object>),
    /// Python dict, as ordered key/value pairs.
    #[serde(alias = "dict")]
    Dict(Vec<(Object, Object)>),
    /// Python set, as ordered elements.
    #[serde(alias = "set")]
    Set(Vec<Object>),
    /// Output-only: the repr of a value with no direct mapping.
    Repr(String),
}

impl Object {
    /// Deep-converts an interpreter value for the host.
    pub(crate) fn from_value(value: &PyRef) -> Self {
        match value.payload() {
            Payload::None => Self::None,
            Payload::Bool(b) => Self::Bool(*b),
            Payload::Int(int) => match int.to_i64() {
                Some(small) => Self::Int(small),
                None => Self::BigInt(int.clone()),
            },
            Payload::Str(text) => Self::String(text.to_string()),
            Payload::Tuple(items) => Self::Tuple(items.iter().map(Self::from_value).collect()),
            Payload::List(items) => Self::List(items.borrow().iter().map(Self::from_value).collect()),
            Payload::Dict(dict) => Self::Dict(
                dict.borrow()
                    .iter()
                    .map(|(key, entry)| (Self::from_value(key), Self::from_value(entry)))
                    .collect(),
            ),
            Payload::Set(set) => Self::Set(set.borrow().iter().map(Self::from_value).collect()),
            _ => Self::Repr(value::py_repr(value)),
        }
    }

    /// Builds an interpreter value from a host value.
    ///
    /// # Errors
    /// `TypeError` when the structure is not constructible (an unhashable
    /// dict/set key, or a `Repr`).
    pub(crate) fn to_value(&self) -> RunResult<PyRef> {
        match self {
            Self::None => Ok(value::none()),
            Self::Bool(b) => Ok(value::bool_value(*b)),
            Self::Int(i) => Ok(value::int_from_i64(*i)),
            Self::BigInt(i) => Ok(value::int_value(i.clone())),
            Self::String(s) => Ok(value::str_value(s.as_str())),
            Self::Tuple(items) => Ok(value::tuple(items.iter().map(Self::to_value).collect::<RunResult<_>>()?)),
            Self::List(items) => Ok(value::list(items.iter().map(Self::to_value).collect::<RunResult<_>>()?)),
            Self::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, entry) in pairs {
                    let key = key.to_value()?;
                    let entry = entry.to_value()?;
                    let hash = HashKey::for_value(&key)?;
                    dict.insert(hash, key, entry);
                }
                Ok(value::dict_value(dict))
            }
            Self::Set(items) => {
                let mut set = Set::new();
                for item in items {
                    let item = item.to_value()?;
                    let hash = HashKey::for_value(&item)?;
                    set.insert(hash, item);
                }
                Ok(value::set_value(set))
            }
            Self::Repr(_) => Err(ExcType::type_error("repr-only values cannot be used as inputs")),
        }
    }
}

impl fmt::Display for Object {
    /// Renders in Python repr form (the shape `print` would show for
    /// containers).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Dict(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Set(items) => {
                if items.is_empty() {
                    return f.write_str("set()");
                }
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Self::Repr(text) => f.write_str(text),
        }
    }
}

/// Error converting an [`Object`] to a concrete host type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValueError {
    expected: &'static str,
    got: String,
}

impl fmt::Display for InvalidValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.got)
    }
}

impl std::error::Error for InvalidValueError {}

impl TryFrom<&Object> for i64 {
    type Error = InvalidValueError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Int(i) => Ok(*i),
            Object::Bool(b) => Ok(i64::from(*b)),
            Object::BigInt(i) => i.to_i64().ok_or(InvalidValueError {
                expected: "an i64-sized int",
                got: "a larger int".to_owned(),
            }),
            other => Err(InvalidValueError {
                expected: "an int",
                got: format!("{other}"),
            }),
        }
    }
}

impl TryFrom<&Object> for bool {
    type Error = InvalidValueError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::Bool(b) => Ok(*b),
            other => Err(InvalidValueError {
                expected: "a bool",
                got: format!("{other}"),
            }),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = InvalidValueError;

    fn try_from(value: &Object) -> Result<Self, Self::Error> {
        match value {
            Object::String(s) => Ok(s.clone()),
            other => Err(InvalidValueError {
                expected: "a str",
                got: format!("{other}"),
            }),
        }
    }
}
