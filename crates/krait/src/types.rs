//! Type descriptors and the process-wide singleton registry.
//!
//! Every value points at a shared [`PyType`]. A type names its parent
//! (single inheritance; the root `object` type is its own parent), carries an
//! attribute dictionary holding magic-method callables, and a [`TypeSlot`]
//! that acts as its constructor hook.
//!
//! The canonical singletons (`None`, `True`, `False`, `NotImplemented`, the
//! interned small ints, the builtin type objects, the exception hierarchy,
//! and the builtins namespace) are initialized once per thread and read-only
//! afterwards; fresh interpreter instances share them.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use strum::IntoEnumIterator;

use crate::{
    builtins::BuiltinKind,
    except::ExcType,
    intern::{SMALL_INT_MAX, SMALL_INT_MIN},
    value::{Payload, PyObject, PyRef},
};

/// Shared handle to a type descriptor.
pub(crate) type TypeRef = Rc<PyType>;

/// The constructor hook and native-dispatch tag of a type.
///
/// For builtin types this names the payload kind the type constructs; user
/// types use `Instance` (or inherit exception behavior through their parent
/// chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeSlot {
    Object,
    NoneType,
    NotImplementedType,
    Bool,
    Int,
    Str,
    Tuple,
    List,
    Dict,
    Set,
    Range,
    Slice,
    Code,
    Cell,
    Function,
    BuiltinFunction,
    BoundMethod,
    Type,
    Module,
    Generator,
    Iterator,
    Traceback,
    Exception(ExcType),
    Instance,
}

/// A class: name, parent, attribute dictionary, constructor hook.
#[derive(Debug)]
pub(crate) struct PyType {
    name: Rc<str>,
    base: Option<TypeRef>,
    attrs: RefCell<IndexMap<Rc<str>, PyRef>>,
    slot: TypeSlot,
}

impl PyType {
    /// Creates a type descriptor.
    pub fn new(name: impl Into<Rc<str>>, base: Option<TypeRef>, slot: TypeSlot) -> TypeRef {
        Rc::new(Self {
            name: name.into(),
            base,
            attrs: RefCell::new(IndexMap::new()),
            slot,
        })
    }

    /// The class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The constructor hook / dispatch tag.
    pub fn slot(&self) -> TypeSlot {
        self.slot
    }

    /// The parent type. The root type is its own parent; every other chain
    /// terminates at the root.
    pub fn parent(this: &TypeRef) -> TypeRef {
        this.base.clone().unwrap_or_else(|| this.clone())
    }

    /// The declared base, `None` only for the root type.
    pub fn base(&self) -> Option<&TypeRef> {
        self.base.as_ref()
    }

    /// Walks the parent chain (including `this`) for an attribute.
    pub fn lookup(this: &TypeRef, name: &str) -> Option<PyRef> {
        let mut current = this.clone();
        loop {
            if let Some(found) = current.attrs.borrow().get(name) {
                return Some(found.clone());
            }
            match &current.base {
                Some(base) => current = base.clone(),
                None => return None,
            }
        }
    }

    /// Sets an attribute on this type.
    pub fn set_attr(&self, name: Rc<str>, value: PyRef) {
        self.attrs.borrow_mut().insert(name, value);
    }

    /// Removes an attribute from this type.
    pub fn remove_attr(&self, name: &str) -> Option<PyRef> {
        self.attrs.borrow_mut().shift_remove(name)
    }

    /// Whether `this` is `other` or inherits from it.
    pub fn is_subtype_of(this: &TypeRef, other: &TypeRef) -> bool {
        let mut current = this.clone();
        loop {
            if Rc::ptr_eq(&current, other) {
                return true;
            }
            match &current.base {
                Some(base) => current = base.clone(),
                None => return false,
            }
        }
    }

    /// The nearest builtin exception kind in the parent chain, if any.
    ///
    /// Instances of types with an exception kind are raisable.
    pub fn exc_kind(this: &TypeRef) -> Option<ExcType> {
        let mut current = this.clone();
        loop {
            if let TypeSlot::Exception(kind) = current.slot {
                return Some(kind);
            }
            match &current.base {
                Some(base) => current = base.clone(),
                None => return None,
            }
        }
    }
}

/// The read-only singleton registry: builtin types, canonical value
/// singletons, interned small ints, and the builtins namespace.
#[derive(Debug)]
pub(crate) struct Registry {
    pub object_type: TypeRef,
    pub type_type: TypeRef,
    pub none_type: TypeRef,
    pub not_implemented_type: TypeRef,
    pub int_type: TypeRef,
    pub bool_type: TypeRef,
    pub str_type: TypeRef,
    pub tuple_type: TypeRef,
    pub list_type: TypeRef,
    pub dict_type: TypeRef,
    pub set_type: TypeRef,
    pub range_type: TypeRef,
    pub slice_type: TypeRef,
    pub code_type: TypeRef,
    pub cell_type: TypeRef,
    pub function_type: TypeRef,
    pub builtin_function_type: TypeRef,
    pub bound_method_type: TypeRef,
    pub module_type: TypeRef,
    pub generator_type: TypeRef,
    pub iterator_type: TypeRef,
    pub traceback_type: TypeRef,
    exceptions: AHashMap<ExcType, TypeRef>,
    /// Canonical type-object value per builtin type descriptor, so
    /// `type(x) is int` observes one shared object.
    type_values: AHashMap<usize, PyRef>,
    pub none: PyRef,
    pub true_value: PyRef,
    pub false_value: PyRef,
    pub not_implemented: PyRef,
    small_ints: Vec<PyRef>,
    builtins: IndexMap<Rc<str>, PyRef>,
}

impl Registry {
    /// The type descriptor for a builtin exception kind.
    pub fn exc_type(&self, kind: ExcType) -> TypeRef {
        self.exceptions
            .get(&kind)
            .cloned()
            .expect("every exception kind is seeded at bootstrap")
    }

    /// The interned value for a small integer, if `value` is in range.
    pub fn small_int(&self, value: i64) -> Option<PyRef> {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&value) {
            Some(self.small_ints[(value - SMALL_INT_MIN) as usize].clone())
        } else {
            None
        }
    }

    /// Looks up a name in the process-wide builtins mapping.
    pub fn builtin_lookup(&self, name: &str) -> Option<PyRef> {
        self.builtins.get(name).cloned()
    }

    /// The canonical type-object value for a builtin type descriptor.
    pub fn type_object(&self, ty: &TypeRef) -> Option<PyRef> {
        self.type_values.get(&(Rc::as_ptr(ty) as usize)).cloned()
    }

    fn bootstrap() -> Rc<Self> {
        let object_type = PyType::new("object", None, TypeSlot::Object);
        let type_type = PyType::new("type", Some(object_type.clone()), TypeSlot::Type);
        let none_type = PyType::new("NoneType", Some(object_type.clone()), TypeSlot::NoneType);
        let not_implemented_type = PyType::new(
            "NotImplementedType",
            Some(object_type.clone()),
            TypeSlot::NotImplementedType,
        );
        let int_type = PyType::new("int", Some(object_type.clone()), TypeSlot::Int);
        // bool is an int subtype: `isinstance(True, int)` holds.
        let bool_type = PyType::new("bool", Some(int_type.clone()), TypeSlot::Bool);
        let str_type = PyType::new("str", Some(object_type.clone()), TypeSlot::Str);
        let tuple_type = PyType::new("tuple", Some(object_type.clone()), TypeSlot::Tuple);
        let list_type = PyType::new("list", Some(object_type.clone()), TypeSlot::List);
        let dict_type = PyType::new("dict", Some(object_type.clone()), TypeSlot::Dict);
        let set_type = PyType::new("set", Some(object_type.clone()), TypeSlot::Set);
        let range_type = PyType::new("range", Some(object_type.clone()), TypeSlot::Range);
        let slice_type = PyType::new("slice", Some(object_type.clone()), TypeSlot::Slice);
        let code_type = PyType::new("code", Some(object_type.clone()), TypeSlot::Code);
        let cell_type = PyType::new("cell", Some(object_type.clone()), TypeSlot::Cell);
        let function_type = PyType::new("function", Some(object_type.clone()), TypeSlot::Function);
        let builtin_function_type = PyType::new(
            "builtin_function_or_method",
            Some(object_type.clone()),
            TypeSlot::BuiltinFunction,
        );
        let bound_method_type = PyType::new("method", Some(object_type.clone()), TypeSlot::BoundMethod);
        let module_type = PyType::new("module", Some(object_type.clone()), TypeSlot::Module);
        let generator_type = PyType::new("generator", Some(object_type.clone()), TypeSlot::Generator);
        let iterator_type = PyType::new("iterator", Some(object_type.clone()), TypeSlot::Iterator);
        let traceback_type = PyType::new("traceback", Some(object_type.clone()), TypeSlot::Traceback);

        let mut exceptions = AHashMap::new();
        for kind in ExcType::iter() {
            ensure_exception_type(kind, &mut exceptions, &object_type);
        }

        let builtin = |kind: BuiltinKind| -> PyRef {
            PyObject::new(builtin_function_type.clone(), Payload::Builtin(kind))
        };

        // Methods of builtin types live in the type's attribute dictionary
        // and bind to receivers through the normal attribute protocol.
        list_type.set_attr(Rc::from("append"), builtin(BuiltinKind::ListAppend));
        list_type.set_attr(Rc::from("pop"), builtin(BuiltinKind::ListPop));
        dict_type.set_attr(Rc::from("get"), builtin(BuiltinKind::DictGet));
        dict_type.set_attr(Rc::from("items"), builtin(BuiltinKind::DictItems));
        dict_type.set_attr(Rc::from("keys"), builtin(BuiltinKind::DictKeys));
        dict_type.set_attr(Rc::from("values"), builtin(BuiltinKind::DictValues));
        set_type.set_attr(Rc::from("add"), builtin(BuiltinKind::SetAdd));
        str_type.set_attr(Rc::from("join"), builtin(BuiltinKind::StrJoin));
        str_type.set_attr(Rc::from("split"), builtin(BuiltinKind::StrSplit));

        let none = PyObject::new(none_type.clone(), Payload::None);
        let true_value = PyObject::new(bool_type.clone(), Payload::Bool(true));
        let false_value = PyObject::new(bool_type.clone(), Payload::Bool(false));
        let not_implemented = PyObject::new(not_implemented_type.clone(), Payload::NotImplemented);

        let small_ints = (SMALL_INT_MIN..=SMALL_INT_MAX)
            .map(|i| PyObject::new(int_type.clone(), Payload::Int(BigInt::from(i))))
            .collect();

        // One canonical type-object value per descriptor, shared by the
        // builtins namespace, `type()`, and `__class__`.
        let mut type_values: AHashMap<usize, PyRef> = AHashMap::new();
        let all_types = [
            &object_type,
            &type_type,
            &none_type,
            &not_implemented_type,
            &int_type,
            &bool_type,
            &str_type,
            &tuple_type,
            &list_type,
            &dict_type,
            &set_type,
            &range_type,
            &slice_type,
            &code_type,
            &cell_type,
            &function_type,
            &builtin_function_type,
            &bound_method_type,
            &module_type,
            &generator_type,
            &iterator_type,
            &traceback_type,
        ];
        for ty in all_types.into_iter().chain(exceptions.values()) {
            type_values.insert(
                Rc::as_ptr(ty) as usize,
                PyObject::new(type_type.clone(), Payload::Type(ty.clone())),
            );
        }
        let type_object = |ty: &TypeRef| -> PyRef {
            type_values
                .get(&(Rc::as_ptr(ty) as usize))
                .cloned()
                .expect("canonical type objects cover every builtin type")
        };

        let mut builtins: IndexMap<Rc<str>, PyRef> = IndexMap::new();
        for kind in [
            BuiltinKind::Print,
            BuiltinKind::Len,
            BuiltinKind::Repr,
            BuiltinKind::Iter,
            BuiltinKind::Next,
            BuiltinKind::Isinstance,
            BuiltinKind::Abs,
        ] {
            builtins.insert(Rc::from(kind.as_str()), builtin(kind));
        }
        for (name, ty) in [
            ("object", &object_type),
            ("type", &type_type),
            ("int", &int_type),
            ("bool", &bool_type),
            ("str", &str_type),
            ("tuple", &tuple_type),
            ("list", &list_type),
            ("dict", &dict_type),
            ("set", &set_type),
            ("range", &range_type),
        ] {
            builtins.insert(Rc::from(name), type_object(ty));
        }
        for kind in ExcType::iter() {
            let ty = exceptions.get(&kind).expect("exception type seeded");
            builtins.insert(Rc::from(kind.to_string().as_str()), type_object(ty));
        }
        builtins.insert(Rc::from("None"), none.clone());
        builtins.insert(Rc::from("True"), true_value.clone());
        builtins.insert(Rc::from("False"), false_value.clone());
        builtins.insert(Rc::from("NotImplemented"), not_implemented.clone());

        Rc::new(Self {
            object_type,
            type_type,
            none_type,
            not_implemented_type,
            int_type,
            bool_type,
            str_type,
            tuple_type,
            list_type,
            dict_type,
            set_type,
            range_type,
            slice_type,
            code_type,
            cell_type,
            function_type,
            builtin_function_type,
            bound_method_type,
            module_type,
            generator_type,
            iterator_type,
            traceback_type,
            exceptions,
            type_values,
            none,
            true_value,
            false_value,
            not_implemented,
            small_ints,
            builtins,
        })
    }
}

/// Seeds one exception type, creating its parents first so the descriptor
/// chain mirrors the `ExcType` hierarchy.
fn ensure_exception_type(kind: ExcType, map: &mut AHashMap<ExcType, TypeRef>, object_type: &TypeRef) -> TypeRef {
    if let Some(existing) = map.get(&kind) {
        return existing.clone();
    }
    let base = match kind.parent() {
        Some(parent) => ensure_exception_type(parent, map, object_type),
        None => object_type.clone(),
    };
    let ty = PyType::new(<&'static str>::from(kind), Some(base), TypeSlot::Exception(kind));
    map.insert(kind, ty.clone());
    ty
}

thread_local! {
    static REGISTRY: Rc<Registry> = Registry::bootstrap();
}

/// The per-thread singleton registry.
pub(crate) fn registry() -> Rc<Registry> {
    REGISTRY.with(Rc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_type_is_its_own_parent() {
        let registry = registry();
        let root_parent = PyType::parent(&registry.object_type);
        assert!(Rc::ptr_eq(&root_parent, &registry.object_type));
        // Every other chain terminates at the root.
        let mut current = registry.bool_type.clone();
        let mut steps = 0;
        while let Some(base) = current.base().cloned() {
            current = base;
            steps += 1;
            assert!(steps < 10, "parent chain must terminate");
        }
        assert!(Rc::ptr_eq(&current, &registry.object_type));
    }

    #[test]
    fn bool_is_an_int_subtype() {
        let registry = registry();
        assert!(PyType::is_subtype_of(&registry.bool_type, &registry.int_type));
        assert!(!PyType::is_subtype_of(&registry.int_type, &registry.bool_type));
    }

    #[test]
    fn exception_descriptor_chain_mirrors_the_hierarchy() {
        let registry = registry();
        let zde = registry.exc_type(ExcType::ZeroDivisionError);
        let arith = registry.exc_type(ExcType::ArithmeticError);
        let exc = registry.exc_type(ExcType::Exception);
        assert!(PyType::is_subtype_of(&zde, &arith));
        assert!(PyType::is_subtype_of(&zde, &exc));
        assert_eq!(PyType::exc_kind(&zde), Some(ExcType::ZeroDivisionError));
    }

    #[test]
    fn attribute_lookup_walks_the_parent_chain() {
        let registry = registry();
        let user = PyType::new("Point", Some(registry.object_type.clone()), TypeSlot::Instance);
        let sub = PyType::new("Point3", Some(user.clone()), TypeSlot::Instance);
        user.set_attr(Rc::from("dims"), crate::value::int_from_i64(2));
        let found = PyType::lookup(&sub, "dims").expect("inherited attribute");
        assert_eq!(crate::value::py_repr(&found), "2");
        assert!(PyType::lookup(&sub, "missing").is_none());
    }
}
