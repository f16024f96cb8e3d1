//! Per-thread stack of entered public API calls.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::subsystem::Subsystem;

thread_local! {
    static CONTEXTS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// Pops its context when dropped. Not `Send`: it belongs to the thread that
/// entered the call.
#[derive(Debug)]
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ApiContextGuard {
    name: &'static str,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ApiContextGuard {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Nesting depth including this call (1 is top-level).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.depth == 1
    }
}

impl Drop for ApiContextGuard {
    fn drop(&mut self) {
        let _ = CONTEXTS.try_with(|c| {
            if let Ok(mut c) = c.try_borrow_mut() {
                c.pop();
            }
        });
    }
}

/// Enter API call `name` on this thread.
pub fn enter(name: &'static str) -> ApiContextGuard {
    let depth = CONTEXTS.with(|c| {
        let mut c = c.borrow_mut();
        c.push(name);
        c.len()
    });
    ApiContextGuard {
        name,
        depth,
        _not_send: PhantomData,
    }
}

#[must_use]
pub fn depth() -> usize {
    CONTEXTS.with(|c| c.borrow().len())
}

#[must_use]
pub fn current() -> Option<&'static str> {
    CONTEXTS.with(|c| c.borrow().last().copied())
}

/// Detach the thread's context stack, leaving it empty, so user code runs
/// as if at top level. Hand the result to [`resume`] afterwards.
#[must_use]
pub fn suspend() -> Vec<&'static str> {
    CONTEXTS.with(|c| std::mem::take(&mut *c.borrow_mut()))
}

/// Reinstall a stack saved by [`suspend`]. Contexts user code leaked are
/// discarded.
pub fn resume(saved: Vec<&'static str>) {
    CONTEXTS.with(|c| *c.borrow_mut() = saved);
}

/// API context subsystem (`CX`). Contexts are owned by guards, so there is
/// never anything left to tear down.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApiContextPackage;

impl Subsystem for ApiContextPackage {
    fn term_package(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_unwind() {
        assert_eq!(depth(), 0);
        let outer = enter("h5rt_open");
        assert!(outer.is_top_level());
        {
            let inner = enter("h5rt_atclose");
            assert_eq!(inner.depth(), 2);
            assert_eq!(current(), Some("h5rt_atclose"));
        }
        assert_eq!(current(), Some("h5rt_open"));
        drop(outer);
        assert_eq!(depth(), 0);
        assert_eq!(current(), None);
    }

    #[test]
    fn suspend_and_resume_restore_depth() {
        let _g = enter("h5rt_close");
        let saved = suspend();
        assert_eq!(depth(), 0);
        let leaked = enter("user_code");
        std::mem::forget(leaked);
        resume(saved);
        assert_eq!(depth(), 1);
        assert_eq!(current(), Some("h5rt_close"));
    }
}
