//! Registry of user callbacks run when the library closes.
//!
//! Callbacks run newest-first. Each entry is removed before it is invoked,
//! and the registry is emptied at the end of every termination.

use std::fmt;

use crate::error::{LibError, Result};

/// A shutdown callback. Context travels inside the closure.
pub type AtcloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// One registration.
pub struct AtcloseEntry {
    seq: u64,
    callback: AtcloseCallback,
}

impl AtcloseEntry {
    /// Registration sequence number (1-based, per registry lifetime).
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Consume the entry and return its callback.
    #[must_use]
    pub fn into_callback(self) -> AtcloseCallback {
        self.callback
    }
}

impl fmt::Debug for AtcloseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtcloseEntry")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// How one callback invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Completed,
    /// The callback panicked; the panic was contained.
    Panicked,
    /// Library state could not be saved or restored around the call.
    SandboxFailed,
}

impl CallbackOutcome {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Panicked => "panicked",
            Self::SandboxFailed => "sandbox_failed",
        }
    }
}

/// LIFO callback list.
#[derive(Debug, Default)]
pub struct AtcloseRegistry {
    entries: Vec<AtcloseEntry>,
    next_seq: u64,
}

impl AtcloseRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. An absent callback is a usage error; failure to
    /// grow the list is a resource error and leaves the registry unchanged.
    pub fn register(&mut self, callback: Option<AtcloseCallback>) -> Result<u64> {
        let callback = callback.ok_or(LibError::Usage("NULL func pointer"))?;
        self.entries
            .try_reserve(1)
            .map_err(|_| LibError::Resource("can't allocate 'atclose' node"))?;
        self.next_seq += 1;
        self.entries.push(AtcloseEntry {
            seq: self.next_seq,
            callback,
        });
        Ok(self.next_seq)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detach the newest entry.
    pub fn pop(&mut self) -> Option<AtcloseEntry> {
        self.entries.pop()
    }

    /// Detach every entry, newest first.
    pub fn take_lifo(&mut self) -> Vec<AtcloseEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        drained.reverse();
        drained
    }

    /// Drop all entries without running them.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn missing_callback_is_usage_error() {
        let mut reg = AtcloseRegistry::new();
        let err = reg.register(None).unwrap_err();
        assert!(matches!(err, LibError::Usage(_)));
        assert!(reg.is_empty());
    }

    #[test]
    fn take_lifo_runs_newest_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut reg = AtcloseRegistry::new();
        for tag in ["c1", "c2", "c3"] {
            let order = Arc::clone(&order);
            reg.register(Some(Box::new(move || order.lock().unwrap().push(tag))))
                .unwrap();
        }
        let entries = reg.take_lifo();
        assert!(reg.is_empty());
        assert_eq!(
            entries.iter().map(AtcloseEntry::seq).collect::<Vec<_>>(),
            [3, 2, 1]
        );
        for entry in entries {
            (entry.into_callback())();
        }
        assert_eq!(*order.lock().unwrap(), ["c3", "c2", "c1"]);
    }

    #[test]
    fn clear_discards_without_running() {
        let ran = Arc::new(Mutex::new(false));
        let mut reg = AtcloseRegistry::new();
        let flag = Arc::clone(&ran);
        reg.register(Some(Box::new(move || *flag.lock().unwrap() = true)))
            .unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert!(!*ran.lock().unwrap());
    }
}
