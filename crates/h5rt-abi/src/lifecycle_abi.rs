//! ABI layer for library open/close, exit-time shutdown and close callbacks.

use std::ffi::c_void;

use h5rt_core::{LibError, library};

use crate::status::{SUCCEED, fail, finish, herr_t};

/// C close callback: `void (*)(void *ctx)`.
pub type AtcloseFunc = unsafe extern "C" fn(ctx: *mut c_void);

/// Caller context pointer handed back to the callback at close time.
struct CallbackContext(*mut c_void);

// SAFETY: the pointer is opaque to the library; the C caller owns whatever
// it points at and promises it is usable from the thread that closes the
// library.
unsafe impl Send for CallbackContext {}

impl CallbackContext {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_open() -> herr_t {
    finish("h5rt_open", library().open())
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_close() -> herr_t {
    finish("h5rt_close", library().terminate())
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_dont_atexit() -> herr_t {
    finish("h5rt_dont_atexit", library().dont_atexit())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_atclose(func: Option<AtcloseFunc>, ctx: *mut c_void) -> herr_t {
    let ctx = CallbackContext(ctx);
    let callback = func.map(|func| -> Box<dyn FnOnce() + Send> {
        Box::new(move || {
            // SAFETY: `func` and `ctx` were registered together by the C
            // caller, which guarantees both remain valid until close.
            unsafe { func(ctx.get()) }
        })
    });
    finish("h5rt_atclose", library().atclose(callback))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_is_library_threadsafe(is_ts: *mut bool) -> herr_t {
    if is_ts.is_null() {
        return fail(
            "h5rt_is_library_threadsafe",
            &LibError::Usage("invalid \"is_ts\" pointer"),
        );
    }
    // SAFETY: non-null and supplied by the caller as writable.
    unsafe { *is_ts = library().is_threadsafe() };
    SUCCEED
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_is_library_terminating(is_terminating: *mut bool) -> herr_t {
    if is_terminating.is_null() {
        return fail(
            "h5rt_is_library_terminating",
            &LibError::Usage("invalid \"is_terminating\" pointer"),
        );
    }
    // SAFETY: non-null and supplied by the caller as writable.
    unsafe { *is_terminating = library().is_terminating() };
    SUCCEED
}
