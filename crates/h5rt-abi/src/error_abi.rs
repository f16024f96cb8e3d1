//! ABI layer for the calling thread's error stack.

use std::ffi::c_int;

use h5rt_core::error_stack;

use crate::status::{SUCCEED, herr_t};

/// Number of pending error records on the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn h5rt_error_depth() -> c_int {
    c_int::try_from(error_stack::depth()).unwrap_or(c_int::MAX)
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_error_clear() -> herr_t {
    error_stack::clear();
    SUCCEED
}

/// Turn automatic reporting of errors on (non-zero) or off (zero). With
/// reporting off, shutdown non-convergence is returned without printing.
#[unsafe(no_mangle)]
pub extern "C" fn h5rt_set_error_auto_report(enabled: c_int) -> herr_t {
    error_stack::set_auto_report(enabled != 0);
    SUCCEED
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_get_error_auto_report() -> c_int {
    c_int::from(error_stack::auto_report())
}
