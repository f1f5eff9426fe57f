//! The attribute protocol.
//!
//! Lookup order: the value's instance dictionary (when the kind carries
//! one), kind-specific attributes (module globals, type attributes,
//! exception fields), then the type descriptor's parent chain. Functions
//! found on the chain bind to the receiver as bound methods.

use std::rc::Rc;

use super::{Flow, Vm};
use crate::{
    except::{ExcType, RunResult},
    intern::magic,
    io::PrintWriter,
    tracer::VmTracer,
    types::PyType,
    value::{Payload, PyRef, bound_method, type_value},
};

impl<W: PrintWriter, Tr: VmTracer> Vm<'_, W, Tr> {
    /// Attribute lookup; `Ok(None)` when the value has no such attribute.
    pub(super) fn lookup_attr(&mut self, obj: &PyRef, name: &str) -> RunResult<Option<PyRef>> {
        if name == magic::CLASS {
            return Ok(Some(type_value(obj.ty().clone())));
        }
        if let Some(dict) = obj.instance_dict()
            && let Some(value) = dict.borrow().get(name)
        {
            return Ok(Some(value.clone()));
        }
        match obj.payload() {
            Payload::Module(module) => {
                // Module attributes are exactly its globals.
                return Ok(module.get(name));
            }
            Payload::Type(ty) => {
                // Class attribute access: no binding to a receiver.
                return Ok(PyType::lookup(ty, name));
            }
            Payload::Exception(data) => {
                if let Some(value) = data.attr(name) {
                    return Ok(Some(value));
                }
            }
            _ => {}
        }
        if let Some(found) = PyType::lookup(obj.ty(), name) {
            let value = match found.payload() {
                Payload::Function(_) | Payload::Builtin(_) => bound_method(found.clone(), obj.clone()),
                _ => found,
            };
            return Ok(Some(value));
        }
        Ok(None)
    }

    /// Attribute lookup that raises `AttributeError` when absent.
    pub(super) fn load_attr_value(&mut self, obj: &PyRef, name: &str) -> RunResult<PyRef> {
        match self.lookup_attr(obj, name)? {
            Some(value) => Ok(value),
            None => match obj.payload() {
                Payload::Module(module) => Err(ExcType::AttributeError.with_message(format!(
                    "module '{}' has no attribute '{name}'",
                    module.name()
                ))),
                Payload::Type(ty) => Err(ExcType::AttributeError.with_message(format!(
                    "type object '{}' has no attribute '{name}'",
                    ty.name()
                ))),
                _ => Err(ExcType::attribute_error(obj.type_name(), name)),
            },
        }
    }

    pub(super) fn op_load_attr(&mut self, arg: u32) -> RunResult<Flow> {
        let name = self.attr_name(arg)?;
        let obj = self.current_frame_mut().pop()?;
        let value = self.load_attr_value(&obj, &name)?;
        self.current_frame_mut().push(value)?;
        Ok(Flow::Continue)
    }

    pub(super) fn op_store_attr(&mut self, arg: u32) -> RunResult<Flow> {
        let name = self.attr_name(arg)?;
        let obj = self.current_frame_mut().pop()?;
        let value = self.current_frame_mut().pop()?;
        // A value's type descriptor is fixed for its lifetime.
        if &*name == magic::CLASS {
            return Err(ExcType::type_error("__class__ assignment is not supported"));
        }
        match obj.payload() {
            Payload::Module(module) => {
                module.set(name, value);
                Ok(Flow::Continue)
            }
            Payload::Type(ty) => {
                ty.set_attr(name, value);
                Ok(Flow::Continue)
            }
            _ => match obj.instance_dict() {
                Some(dict) => {
                    dict.borrow_mut().insert(name, value);
                    Ok(Flow::Continue)
                }
                None => Err(ExcType::attribute_error(obj.type_name(), &name)),
            },
        }
    }

    pub(super) fn op_delete_attr(&mut self, arg: u32) -> RunResult<Flow> {
        let name = self.attr_name(arg)?;
        let obj = self.current_frame_mut().pop()?;
        let removed = match obj.payload() {
            Payload::Module(module) => module.remove(&name),
            Payload::Type(ty) => ty.remove_attr(&name),
            _ => match obj.instance_dict() {
                Some(dict) => dict.borrow_mut().shift_remove(&name),
                None => None,
            },
        };
        match removed {
            Some(_) => Ok(Flow::Continue),
            None => Err(ExcType::attribute_error(obj.type_name(), &name)),
        }
    }

    fn attr_name(&self, arg: u32) -> RunResult<Rc<str>> {
        let code = &self.current_frame().code;
        match code.names.get(arg as usize) {
            Some(name) => Ok(Rc::clone(name)),
            None => Err(crate::except::RunError::fatal(format!("name index {arg} out of range"))),
        }
    }
}
