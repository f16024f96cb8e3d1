//! Save and restore thread state around calls into user code.
//!
//! [`prepare`] detaches the thread's pending-error stack (and, with the
//! `threadsafe` feature, its API nesting) so user code starts clean and
//! cannot corrupt what the library was tracking. [`restore`] puts the saved
//! state back regardless of what the user code did.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use thiserror::Error;

use crate::error_stack::{self, ErrorRecord};

#[cfg(feature = "threadsafe")]
use crate::api_context;

/// Failure to save or restore sandbox state. Always an internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("can't save error stack before user callback")]
    SaveErrorStack,
    #[error("can't restore error stack after user callback")]
    RestoreErrorStack,
    #[error("callback state restored on a different thread than it was prepared on")]
    ThreadMismatch,
}

/// State captured by [`prepare`].
#[derive(Debug)]
#[must_use = "the saved state must be handed back to `restore`"]
pub struct UserCallbackState {
    owner: ThreadId,
    errors: Vec<ErrorRecord>,
    #[cfg(feature = "threadsafe")]
    contexts: Vec<&'static str>,
}

/// Snapshot and detach the calling thread's library state.
pub fn prepare() -> Result<UserCallbackState, SandboxError> {
    let errors = error_stack::try_take().ok_or(SandboxError::SaveErrorStack)?;
    Ok(UserCallbackState {
        owner: thread::current().id(),
        errors,
        #[cfg(feature = "threadsafe")]
        contexts: api_context::suspend(),
    })
}

/// Reinstate `state`. Returns the errors user code left on the stack.
pub fn restore(state: UserCallbackState) -> Result<Vec<ErrorRecord>, SandboxError> {
    if state.owner != thread::current().id() {
        return Err(SandboxError::ThreadMismatch);
    }
    #[cfg(feature = "threadsafe")]
    api_context::resume(state.contexts);
    error_stack::try_replace(state.errors).map_err(|_| SandboxError::RestoreErrorStack)
}

/// Run `f` between [`prepare`] and [`restore`].
///
/// A panic inside `f` is resumed after state has been restored. Returns the
/// closure's value and the errors it left behind.
pub fn invoke<R>(f: impl FnOnce() -> R) -> Result<(R, Vec<ErrorRecord>), SandboxError> {
    let state = prepare()?;
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    let leaked = restore(state)?;
    match outcome {
        Ok(value) => Ok((value, leaked)),
        Err(payload) => panic::resume_unwind(payload),
    }
}
