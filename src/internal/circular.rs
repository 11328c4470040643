//! Circular dependency detection infrastructure.

use std::cell::RefCell;

use crate::error::{DiError, DiResult};

const MAX_DEPTH: usize = 1024;

// Thread-local resolution state for circular dependency detection
thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one frame of the thread-local resolution stack.
///
/// Entering fails when the abstract is already being resolved further up the
/// stack, or when the stack is too deep. The frame is popped on drop, so
/// errors and panics inside a factory leave the stack balanced.
pub(crate) struct ResolutionGuard {
    _private: (),
}

impl ResolutionGuard {
    pub(crate) fn enter(abstract_name: &str) -> DiResult<Self> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            if stack.iter().any(|n| n == abstract_name) {
                let mut path = stack.clone();
                path.push(abstract_name.to_string());
                return Err(DiError::Circular(path));
            }
            if stack.len() >= MAX_DEPTH {
                return Err(DiError::DepthExceeded(stack.len()));
            }

            stack.push(abstract_name.to_string());
            Ok(Self { _private: () })
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
