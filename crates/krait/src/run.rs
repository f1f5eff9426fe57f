//! The public entry point: run a decoded code object.

use std::{fmt, rc::Rc};

use crate::{
    code::Code,
    except::{Exception, FatalError, RunError},
    io::{PrintWriter, StdPrint},
    module::ModuleData,
    object::Object,
    resource::ResourceLimits,
    tracer::{NoopTracer, VmTracer},
    vm::Vm,
};

/// Why a run did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// An exception went unhandled; its traceback was written to the
    /// writer's stderr channel in canonical form.
    Exception(Exception),
    /// The interpreter hit a fatal error (malformed code object or engine
    /// bug); never catchable by interpreted code.
    Fatal(FatalError),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exception) => write!(f, "{exception}"),
            Self::Fatal(fatal) => write!(f, "{fatal}"),
        }
    }
}

impl std::error::Error for RunFailure {}

/// Runs a top-level code object against a fresh module namespace.
///
/// The canonical singletons and the builtins mapping are process-wide and
/// shared; each `Runner` gets its own module, so independent runs never see
/// each other's globals.
///
/// ```ignore
/// let runner = Runner::new(code).with_global("limit", Object::Int(10));
/// let result = runner.run()?;
/// ```
#[derive(Debug)]
pub struct Runner {
    code: Rc<Code>,
    module_name: String,
    globals: Vec<(String, Object)>,
    limits: ResourceLimits,
}

impl Runner {
    /// Wraps a decoded top-level code object.
    #[must_use]
    pub fn new(code: Code) -> Self {
        Self {
            code: Rc::new(code),
            module_name: "__main__".to_owned(),
            globals: Vec::new(),
            limits: ResourceLimits::default(),
        }
    }

    /// Seeds a module global before execution.
    #[must_use]
    pub fn with_global(mut self, name: impl Into<String>, value: Object) -> Self {
        self.globals.push((name.into(), value));
        self
    }

    /// Overrides the execution limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs with process stdout/stderr and no tracing.
    pub fn run(&self) -> Result<Object, RunFailure> {
        let mut writer = StdPrint;
        let mut tracer = NoopTracer;
        self.run_with(&mut writer, &mut tracer)
    }

    /// Runs against an explicit output boundary and tracer.
    ///
    /// On an unhandled exception the canonical traceback is written to the
    /// writer's stderr channel and the report is returned; fatal errors are
    /// likewise reported and returned.
    pub fn run_with<W: PrintWriter, Tr: VmTracer>(
        &self,
        writer: &mut W,
        tracer: &mut Tr,
    ) -> Result<Object, RunFailure> {
        let module = ModuleData::new(self.module_name.as_str());
        for (name, value) in &self.globals {
            match value.to_value() {
                Ok(seeded) => module.set(Rc::from(name.as_str()), seeded),
                Err(_) => {
                    return Err(RunFailure::Fatal(FatalError::new(format!(
                        "seed global '{name}' is not constructible"
                    ))));
                }
            }
        }

        let mut vm = Vm::new(self.limits, writer, tracer);
        match vm.run_module(Rc::clone(&self.code), module) {
            Ok(value) => Ok(Object::from_value(&value)),
            Err(RunError::Exc(exc)) => {
                let report = Exception::from_value(&exc);
                vm.write_stderr(&format!("{report}\n"));
                Err(RunFailure::Exception(report))
            }
            Err(RunError::Fatal(fatal)) => {
                vm.write_stderr(&format!("{fatal}\n"));
                Err(RunFailure::Fatal(fatal))
            }
        }
    }
}
