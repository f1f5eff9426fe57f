use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::value::PyRef;

/// A module: a named, insertion-ordered name→value mapping that serves as
/// the globals of every function defined in it.
///
/// Functions hold an `Rc` to their module, so a module always outlives the
/// functions defined in it.
#[derive(Debug)]
pub(crate) struct ModuleData {
    name: Rc<str>,
    globals: RefCell<IndexMap<Rc<str>, PyRef>>,
}

impl ModuleData {
    /// Creates an empty module.
    pub fn new(name: impl Into<Rc<str>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            globals: RefCell::new(IndexMap::new()),
        })
    }

    /// The module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a global.
    pub fn get(&self, name: &str) -> Option<PyRef> {
        self.globals.borrow().get(name).cloned()
    }

    /// Sets a global, preserving first-insertion order.
    pub fn set(&self, name: Rc<str>, value: PyRef) {
        self.globals.borrow_mut().insert(name, value);
    }

    /// Removes a global, preserving the order of the remaining entries.
    pub fn remove(&self, name: &str) -> Option<PyRef> {
        self.globals.borrow_mut().shift_remove(name)
    }
}
