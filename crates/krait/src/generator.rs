//! Generators: iterators backed by a suspended frame.
//!
//! Calling a function whose code carries the `GENERATOR` flag produces a
//! generator value instead of executing the body. Each `__next__` resumes the
//! saved frame until the next yield or until the body returns.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::frame::Frame;

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenState {
    /// Created but not yet started; the frame has never run.
    Created,
    /// Currently executing. Re-entering a running generator is a ValueError.
    Running,
    /// Suspended at a yield; the frame is saved and resumable.
    Suspended,
    /// Finished (returned or raised). Every later resume raises StopIteration.
    Exhausted,
}

/// Payload of a generator value.
///
/// The generator owns its frame exclusively: while suspended the frame lives
/// here, and while running it is moved onto the evaluator's call stack.
#[derive(Debug)]
pub(crate) struct GeneratorData {
    name: Rc<str>,
    state: Cell<GenState>,
    frame: RefCell<Option<Frame>>,
}

impl GeneratorData {
    /// Wraps a freshly bound (never executed) frame.
    pub fn new(name: Rc<str>, frame: Frame) -> Self {
        Self {
            name,
            state: Cell::new(GenState::Created),
            frame: RefCell::new(Some(frame)),
        }
    }

    /// The generator function's name, for repr.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GenState {
        self.state.get()
    }

    pub fn set_state(&self, state: GenState) {
        self.state.set(state);
    }

    /// Takes the suspended frame out for resumption.
    pub fn take_frame(&self) -> Option<Frame> {
        self.frame.borrow_mut().take()
    }

    /// Stores the frame back after a suspension.
    pub fn store_frame(&self, frame: Frame) {
        *self.frame.borrow_mut() = Some(frame);
    }
}
