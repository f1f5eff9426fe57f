//! Execution limits for the evaluation engine.
//!
//! The evaluator enforces two bounds: a recursion limit on the number of
//! simultaneously active call frames, and a hard cap on the per-frame value
//! stack a code object may declare. Exceeding the recursion limit raises a
//! catchable `RecursionError`; a code object declaring a stack beyond the
//! hard cap is rejected as malformed input (fatal, not a user exception).

use crate::except::{ExcType, RunError};

/// Default maximum number of nested call frames.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Default hard cap on the per-frame value stack declared by a code object.
pub const DEFAULT_MAX_STACK_SIZE: u32 = 65_535;

/// Limits applied to one run of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum call-frame depth before `RecursionError` is raised.
    pub max_recursion_depth: usize,
    /// Hard cap on `Code::stack_size`; exceeding it is a fatal error.
    pub max_stack_size: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

impl ResourceLimits {
    /// Checks the call-frame depth before a new frame is pushed.
    ///
    /// `RecursionError` is catchable: `try: f() except RecursionError: ...`
    /// must work, so this maps to the user exception plane rather than the
    /// fatal one.
    pub(crate) fn check_recursion_depth(&self, current_depth: usize) -> Result<(), RunError> {
        if current_depth >= self.max_recursion_depth {
            Err(ExcType::RecursionError.with_message("maximum recursion depth exceeded"))
        } else {
            Ok(())
        }
    }
}
