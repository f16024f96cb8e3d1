//! Process-exit finalizer registration.

use std::fmt;

/// Installs a finalizer to run once at normal process exit, in reverse
/// order relative to other finalizers.
pub trait ExitHook: Send + Sync + fmt::Debug {
    /// Returns false if the platform refused the registration.
    fn install(&self, finalizer: extern "C" fn()) -> bool;
}

/// `atexit(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExitHook;

impl ExitHook for ProcessExitHook {
    #[allow(unsafe_code)]
    fn install(&self, finalizer: extern "C" fn()) -> bool {
        // SAFETY: `finalizer` is a plain `extern "C" fn()` with 'static
        // lifetime, which is exactly what atexit expects.
        unsafe { libc::atexit(finalizer) == 0 }
    }
}

/// Never installs anything; for embedders that manage shutdown themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExitHook;

impl ExitHook for NoExitHook {
    fn install(&self, _finalizer: extern "C" fn()) -> bool {
        true
    }
}
