//! Per-thread pending-error stack.
//!
//! Public entry points push a record when they fail, much like a libc
//! wrapper sets `errno`. Callers inspect or clear the stack afterwards.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::error::{ErrorClass, LibError};
use crate::subsystem::Subsystem;

/// Upper bound on retained records per thread; older records are dropped.
pub const MAX_DEPTH: usize = 32;

/// One pending error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    /// Entry point that reported the error.
    pub function: &'static str,
    pub message: String,
}

thread_local! {
    static STACK: RefCell<Vec<ErrorRecord>> = const { RefCell::new(Vec::new()) };
}

static AUTO_REPORT: AtomicBool = AtomicBool::new(true);

pub fn push(class: ErrorClass, function: &'static str, message: impl Into<String>) {
    let record = ErrorRecord {
        class,
        function,
        message: message.into(),
    };
    STACK.with(|s| {
        let mut s = s.borrow_mut();
        if s.len() == MAX_DEPTH {
            s.remove(0);
        }
        s.push(record);
    });
}

/// Push `err` on behalf of `function`.
pub fn push_error(function: &'static str, err: &LibError) {
    push(err.class(), function, err.to_string());
}

#[must_use]
pub fn depth() -> usize {
    STACK.with(|s| s.borrow().len())
}

#[must_use]
pub fn records() -> Vec<ErrorRecord> {
    STACK.with(|s| s.borrow().clone())
}

/// Drop every record. Returns how many were cleared.
pub fn clear() -> usize {
    STACK.with(|s| {
        let mut s = s.borrow_mut();
        let n = s.len();
        s.clear();
        n
    })
}

/// Move the current stack out, leaving it empty.
#[must_use]
pub fn take() -> Vec<ErrorRecord> {
    STACK.with(|s| std::mem::take(&mut *s.borrow_mut()))
}

/// Install `records` as the current stack and return what was there.
pub fn replace(records: Vec<ErrorRecord>) -> Vec<ErrorRecord> {
    STACK.with(|s| std::mem::replace(&mut *s.borrow_mut(), records))
}

/// Non-panicking [`take`]; fails if the stack is already borrowed or the
/// thread-local has been destroyed.
pub fn try_take() -> Option<Vec<ErrorRecord>> {
    STACK
        .try_with(|s| s.try_borrow_mut().ok().map(|mut s| std::mem::take(&mut *s)))
        .ok()
        .flatten()
}

/// Non-panicking [`replace`]. On failure `records` is handed back.
pub fn try_replace(records: Vec<ErrorRecord>) -> Result<Vec<ErrorRecord>, Vec<ErrorRecord>> {
    let mut slot = Some(records);
    let swapped = STACK
        .try_with(|s| {
            s.try_borrow_mut()
                .ok()
                .map(|mut s| std::mem::replace(&mut *s, slot.take().unwrap_or_default()))
        })
        .ok()
        .flatten();
    match swapped {
        Some(previous) => Ok(previous),
        None => Err(slot.unwrap_or_default()),
    }
}

/// Whether diagnostics are printed automatically (on by default).
#[must_use]
pub fn auto_report() -> bool {
    AUTO_REPORT.load(Ordering::Acquire)
}

pub fn set_auto_report(on: bool) {
    AUTO_REPORT.store(on, Ordering::Release);
}

/// Error-handling subsystem (`E`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorStackPackage;

impl Subsystem for ErrorStackPackage {
    fn term_package(&self) -> usize {
        usize::from(clear() > 0)
    }
}
