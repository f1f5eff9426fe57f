use std::rc::Rc;

use indexmap::IndexMap;

use crate::{code::Code, module::ModuleData, signature::Signature, value::PyRef};

/// A user-defined function: a code object paired with its defaults, closure
/// cells, and defining module.
///
/// The closure vector holds one cell per entry in the code's `freevars`,
/// aligned by index. Defaults are owned by the function; code, cells, and the
/// module are shared.
#[derive(Debug)]
pub(crate) struct FunctionData {
    code: Rc<Code>,
    module: Rc<ModuleData>,
    /// Default values for the positional-parameter tail, in parameter order.
    defaults: Vec<PyRef>,
    /// Defaults for keyword-only parameters, by name.
    kw_defaults: IndexMap<Rc<str>, PyRef>,
    /// Captured cells, aligned with the code's freevar list.
    closure: Vec<PyRef>,
}

impl FunctionData {
    pub fn new(
        code: Rc<Code>,
        module: Rc<ModuleData>,
        defaults: Vec<PyRef>,
        kw_defaults: IndexMap<Rc<str>, PyRef>,
        closure: Vec<PyRef>,
    ) -> Self {
        Self {
            code,
            module,
            defaults,
            kw_defaults,
            closure,
        }
    }

    /// The function name, from the code object.
    pub fn name(&self) -> &str {
        &self.code.codename
    }

    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    pub fn module(&self) -> &Rc<ModuleData> {
        &self.module
    }

    pub fn defaults(&self) -> &[PyRef] {
        &self.defaults
    }

    pub fn kw_defaults(&self) -> &IndexMap<Rc<str>, PyRef> {
        &self.kw_defaults
    }

    pub fn closure(&self) -> &[PyRef] {
        &self.closure
    }

    /// The signature derived once from the code object and cached there.
    pub fn signature(&self) -> &Rc<Signature> {
        self.code.signature()
    }
}
