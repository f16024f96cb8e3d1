//! C status conventions shared by every entry point.

use std::ffi::c_int;

use h5rt_core::error_stack;
use h5rt_core::{LibError, Result};

#[allow(non_camel_case_types)]
pub type herr_t = c_int;
#[allow(non_camel_case_types)]
pub type htri_t = c_int;

pub const SUCCEED: herr_t = 0;
pub const FAIL: herr_t = -1;

/// Map a core result onto `SUCCEED`/`FAIL`, recording the error for
/// `function` on failure.
pub(crate) fn finish<T>(function: &'static str, result: Result<T>) -> herr_t {
    match result {
        Ok(_) => SUCCEED,
        Err(err) => fail(function, &err),
    }
}

pub(crate) fn fail(function: &'static str, err: &LibError) -> herr_t {
    error_stack::push_error(function, err);
    FAIL
}
