//! Function signature representation and argument binding.
//!
//! A [`Signature`] is derived once from a code object's parameter metadata
//! (positional then keyword-only varnames, plus the `*args`/`**kwargs`
//! flags) and cached there. Binding follows Python's calling conventions:
//! positionals in order, excess into `*args` or an error, keywords into
//! matching slots or `**kwargs`, defaults for the rest, and errors naming
//! the parameters involved.
//!
//! Builtin callables declare their parameters explicitly with
//! [`BuiltinSignature`]; binding produces the name→value mapping their
//! implementations receive.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    code::{Code, CodeFlags},
    except::{ExcType, RunResult},
    py_hash::HashKey,
    value::{Dict, PyRef, dict_value, int_from_i64, none, str_value, tuple},
};

/// A user function's parameter structure, derived from its code object.
///
/// Slot layout follows the varnames convention:
/// `[positional..., keyword-only..., *args?, **kwargs?, locals...]`.
#[derive(Debug)]
pub(crate) struct Signature {
    positional: Vec<Rc<str>>,
    kwonly: Vec<Rc<str>>,
    varargs: bool,
    varkwargs: bool,
}

impl Signature {
    /// Derives the signature from a code object's parameter metadata.
    pub fn from_code(code: &Code) -> Self {
        let arg_count = code.arg_count as usize;
        let kwonly_count = code.kwonly_arg_count as usize;
        let positional = code.varnames.iter().take(arg_count).cloned().collect();
        let kwonly = code
            .varnames
            .iter()
            .skip(arg_count)
            .take(kwonly_count)
            .cloned()
            .collect();
        Self {
            positional,
            kwonly,
            varargs: code.flags.contains(CodeFlags::VARARGS),
            varkwargs: code.flags.contains(CodeFlags::VARKWARGS),
        }
    }

    /// Number of locals slots occupied by parameters (including the star
    /// slots).
    pub fn param_slots(&self) -> usize {
        self.positional.len() + self.kwonly.len() + usize::from(self.varargs) + usize::from(self.varkwargs)
    }

    fn varargs_slot(&self) -> Option<usize> {
        self.varargs.then(|| self.positional.len() + self.kwonly.len())
    }

    fn varkwargs_slot(&self) -> Option<usize> {
        self.varkwargs
            .then(|| self.positional.len() + self.kwonly.len() + usize::from(self.varargs))
    }

    /// Binds a call's arguments into a fresh locals array.
    ///
    /// Implements the binding steps in order: positionals (excess collected
    /// into `*args` or rejected), keywords (unknown collected into
    /// `**kwargs` or rejected, duplicates rejected), defaults, and finally a
    /// check that nothing required is still empty.
    ///
    /// # Errors
    /// `TypeError` naming the function and the offending parameter(s), with
    /// CPython's message shapes.
    pub fn bind(
        &self,
        func_name: &str,
        nlocals: usize,
        defaults: &[PyRef],
        kw_defaults: &IndexMap<Rc<str>, PyRef>,
        args: Vec<PyRef>,
        kwargs: Vec<(Rc<str>, PyRef)>,
    ) -> RunResult<Vec<Option<PyRef>>> {
        let mut locals: Vec<Option<PyRef>> = vec![None; nlocals];
        let n_pos = self.positional.len();

        // 1-2. Bind positionals in order; collect the tail for *args.
        let mut args_iter = args.into_iter();
        for slot in locals.iter_mut().take(n_pos) {
            match args_iter.next() {
                Some(value) => *slot = Some(value),
                None => break,
            }
        }
        let extra: Vec<PyRef> = args_iter.collect();
        if !extra.is_empty() && !self.varargs {
            let given = n_pos + extra.len();
            return Err(ExcType::type_error(format!(
                "{func_name}() takes {n_pos} positional argument{} but {given} {} given",
                if n_pos == 1 { "" } else { "s" },
                if given == 1 { "was" } else { "were" },
            )));
        }

        // 3. Assign keywords into matching slots; collect the rest.
        let mut excess = Dict::new();
        for (name, value) in kwargs {
            if let Some(index) = self.positional.iter().position(|param| **param == *name) {
                if locals[index].is_some() {
                    return Err(ExcType::type_error(format!(
                        "{func_name}() got multiple values for argument '{name}'"
                    )));
                }
                locals[index] = Some(value);
            } else if let Some(index) = self.kwonly.iter().position(|param| **param == *name) {
                let slot = n_pos + index;
                if locals[slot].is_some() {
                    return Err(ExcType::type_error(format!(
                        "{func_name}() got multiple values for argument '{name}'"
                    )));
                }
                locals[slot] = Some(value);
            } else if self.varkwargs {
                excess.insert(HashKey::Str(Rc::clone(&name)), str_value(Rc::clone(&name)), value);
            } else {
                return Err(ExcType::type_error(format!(
                    "{func_name}() got an unexpected keyword argument '{name}'"
                )));
            }
        }

        // 4. Fill unprovided slots from defaults.
        let first_default = n_pos - defaults.len().min(n_pos);
        for (offset, default) in defaults.iter().enumerate() {
            let slot = first_default + offset;
            if locals[slot].is_none() {
                locals[slot] = Some(default.clone());
            }
        }
        for (index, name) in self.kwonly.iter().enumerate() {
            let slot = n_pos + index;
            if locals[slot].is_none()
                && let Some(default) = kw_defaults.get(name)
            {
                locals[slot] = Some(default.clone());
            }
        }

        // Any remaining empty required slot is an error naming the params.
        let missing: Vec<&str> = self
            .positional
            .iter()
            .enumerate()
            .filter(|&(index, _)| locals[index].is_none())
            .map(|(_, name)| name.as_ref())
            .collect();
        if !missing.is_empty() {
            return Err(ExcType::type_error(format!(
                "{func_name}() missing {} required positional argument{}: {}",
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                join_quoted(&missing),
            )));
        }
        let missing_kw: Vec<&str> = self
            .kwonly
            .iter()
            .enumerate()
            .filter(|&(index, _)| locals[n_pos + index].is_none())
            .map(|(_, name)| name.as_ref())
            .collect();
        if !missing_kw.is_empty() {
            return Err(ExcType::type_error(format!(
                "{func_name}() missing {} required keyword-only argument{}: {}",
                missing_kw.len(),
                if missing_kw.len() == 1 { "" } else { "s" },
                join_quoted(&missing_kw),
            )));
        }

        // 5. Fill the star slots.
        if let Some(slot) = self.varargs_slot() {
            locals[slot] = Some(tuple(extra));
        }
        if let Some(slot) = self.varkwargs_slot() {
            locals[slot] = Some(dict_value(excess));
        }

        Ok(locals)
    }
}

/// Formats parameter names as `'a'`, `'a' and 'b'`, or `'a', 'b', and 'c'`.
fn join_quoted(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [single] => single.clone(),
        [head @ .., last] => {
            if head.len() == 1 {
                format!("{} and {last}", head[0])
            } else {
                format!("{}, and {last}", head.join(", "))
            }
        }
    }
}

/// Parameter roles a builtin callable may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    /// An ordinary parameter, fillable by position or keyword.
    Positional,
    /// Collects excess positional arguments into a tuple.
    PositionalStar,
    /// Keyword-only.
    Keyword,
    /// Collects unknown keyword arguments into a dict.
    KeywordStar,
}

/// Default values expressible in a `const` builtin signature.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BuiltinDefault {
    None,
    Int(i64),
    Str(&'static str),
}

impl BuiltinDefault {
    fn to_value(self) -> PyRef {
        match self {
            Self::None => none(),
            Self::Int(i) => int_from_i64(i),
            Self::Str(s) => str_value(s),
        }
    }
}

/// One declared parameter of a builtin callable.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuiltinParam {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<BuiltinDefault>,
    /// Whether binding fails when the parameter is absent. Optional
    /// parameters without a default are simply left unbound (the
    /// implementation distinguishes "absent" from any real value).
    pub required: bool,
}

impl BuiltinParam {
    /// A required positional parameter.
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Positional,
            default: None,
            required: true,
        }
    }

    /// An optional positional parameter with a default.
    pub const fn optional(name: &'static str, default: BuiltinDefault) -> Self {
        Self {
            name,
            kind: ParamKind::Positional,
            default: Some(default),
            required: false,
        }
    }

    /// An optional positional parameter left unbound when absent
    /// (for signatures where any default value would be a valid argument).
    pub const fn optional_absent(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Positional,
            default: None,
            required: false,
        }
    }

    /// A `*args`-style collector.
    pub const fn star(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::PositionalStar,
            default: None,
            required: false,
        }
    }

    /// A keyword-only parameter with a default.
    pub const fn keyword(name: &'static str, default: BuiltinDefault) -> Self {
        Self {
            name,
            kind: ParamKind::Keyword,
            default: Some(default),
            required: false,
        }
    }
}

/// A builtin callable's declared parameter list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuiltinSignature {
    pub params: &'static [BuiltinParam],
}

/// The name→value mapping a builtin implementation receives after binding.
#[derive(Debug, Default)]
pub(crate) struct BoundArgs {
    entries: Vec<(&'static str, PyRef)>,
}

impl BoundArgs {
    fn insert(&mut self, name: &'static str, value: PyRef) {
        self.entries.push((name, value));
    }

    /// Takes a bound value out by parameter name.
    pub fn take(&mut self, name: &str) -> Option<PyRef> {
        let index = self.entries.iter().position(|(param, _)| *param == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Takes a value the signature guarantees is bound.
    pub fn expect(&mut self, name: &str) -> PyRef {
        self.take(name).expect("parameter bound by signature")
    }
}

/// Binds a call's arguments against a builtin signature.
///
/// Mirrors [`Signature::bind`] over the declared parameter list, producing
/// the name→value mapping of the builtin-function contract. `Positional`
/// parameters accept keywords as well; `PositionalStar` receives a tuple and
/// `KeywordStar` a dict.
pub(crate) fn bind_builtin(
    name: &str,
    signature: &BuiltinSignature,
    args: Vec<PyRef>,
    kwargs: Vec<(Rc<str>, PyRef)>,
) -> RunResult<BoundArgs> {
    let mut bound = BoundArgs::default();
    let positional: Vec<&BuiltinParam> = signature
        .params
        .iter()
        .filter(|param| param.kind == ParamKind::Positional)
        .collect();
    let star = signature.params.iter().find(|param| param.kind == ParamKind::PositionalStar);
    let kw_star = signature.params.iter().find(|param| param.kind == ParamKind::KeywordStar);

    let mut args_iter = args.into_iter();
    for param in &positional {
        match args_iter.next() {
            Some(value) => bound.insert(param.name, value),
            None => break,
        }
    }
    let extra: Vec<PyRef> = args_iter.collect();
    if let Some(star) = star {
        bound.insert(star.name, tuple(extra));
    } else if !extra.is_empty() {
        let takes = positional.len();
        let given = takes + extra.len();
        return Err(ExcType::type_error(format!(
            "{name}() takes {takes} positional argument{} but {given} {} given",
            if takes == 1 { "" } else { "s" },
            if given == 1 { "was" } else { "were" },
        )));
    }

    let mut excess = Dict::new();
    for (keyword, value) in kwargs {
        let known = signature
            .params
            .iter()
            .find(|param| matches!(param.kind, ParamKind::Positional | ParamKind::Keyword) && param.name == &*keyword);
        match known {
            Some(param) => {
                if bound.entries.iter().any(|(bound_name, _)| *bound_name == param.name) {
                    return Err(ExcType::type_error(format!(
                        "{name}() got multiple values for argument '{keyword}'"
                    )));
                }
                bound.insert(param.name, value);
            }
            None => {
                if kw_star.is_some() {
                    excess.insert(HashKey::Str(Rc::clone(&keyword)), str_value(Rc::clone(&keyword)), value);
                } else {
                    return Err(ExcType::type_error(format!(
                        "{name}() got an unexpected keyword argument '{keyword}'"
                    )));
                }
            }
        }
    }
    if let Some(kw_star) = kw_star {
        bound.insert(kw_star.name, dict_value(excess));
    }

    for param in signature.params {
        if matches!(param.kind, ParamKind::Positional | ParamKind::Keyword)
            && !bound.entries.iter().any(|(bound_name, _)| *bound_name == param.name)
        {
            match param.default {
                Some(default) => bound.insert(param.name, default.to_value()),
                None if param.required => {
                    return Err(ExcType::type_error(format!(
                        "{name}() missing 1 required positional argument: '{}'",
                        param.name
                    )));
                }
                None => {}
            }
        }
    }

    Ok(bound)
}
