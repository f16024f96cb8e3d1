//! ABI layer for library-managed memory and free-list tuning.
//!
//! Buffers handed to C are tracked in a live table keyed by address, so a
//! pointer coming back through `h5rt_resize_memory` or `h5rt_free_memory`
//! is resolved to the block that owns it. Pointers the table does not know
//! are rejected rather than freed.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::ptr;
use std::sync::OnceLock;

use h5rt_core::freelist::Block;
use h5rt_core::{LibError, library, memory};
use parking_lot::Mutex;

use crate::status::{SUCCEED, fail, finish, herr_t};

fn live() -> &'static Mutex<HashMap<usize, Block>> {
    static LIVE: OnceLock<Mutex<HashMap<usize, Block>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn publish(mut block: Block) -> *mut c_void {
    let ptr = block.as_mut_ptr().cast::<c_void>();
    live().lock().insert(ptr as usize, block);
    ptr
}

/// Number of buffers currently handed out to C callers.
#[must_use]
pub fn live_allocations() -> usize {
    live().lock().len()
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_allocate_memory(size: usize, clear: bool) -> *mut c_void {
    match memory::allocate(size, clear) {
        Some(block) => publish(block),
        None => {
            if size != 0 {
                fail(
                    "h5rt_allocate_memory",
                    &LibError::Resource("memory allocation failed"),
                );
            }
            ptr::null_mut()
        }
    }
}

/// `realloc` for library buffers. On failure the original buffer is left
/// untouched and still owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_resize_memory(mem: *mut c_void, size: usize) -> *mut c_void {
    let original = if mem.is_null() {
        None
    } else {
        match live().lock().remove(&(mem as usize)) {
            Some(block) => Some(block),
            None => {
                fail(
                    "h5rt_resize_memory",
                    &LibError::Usage("pointer was not allocated by h5rt"),
                );
                return ptr::null_mut();
            }
        }
    };
    match memory::resize(original, size) {
        Ok(Some(block)) => publish(block),
        Ok(None) => ptr::null_mut(),
        Err(err) => {
            if let Some(block) = err.original {
                publish(block);
            }
            fail(
                "h5rt_resize_memory",
                &LibError::Resource("memory reallocation failed"),
            );
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_free_memory(mem: *mut c_void) -> herr_t {
    if mem.is_null() {
        return SUCCEED;
    }
    let Some(block) = live().lock().remove(&(mem as usize)) else {
        return fail(
            "h5rt_free_memory",
            &LibError::Usage("pointer was not allocated by h5rt"),
        );
    };
    memory::release(Some(block));
    SUCCEED
}

/// Set free-list ceilings in bytes; `-1` (any negative) means unlimited.
#[unsafe(no_mangle)]
pub extern "C" fn h5rt_set_free_list_limits(
    reg_global_lim: c_int,
    reg_list_lim: c_int,
    arr_global_lim: c_int,
    arr_list_lim: c_int,
    blk_global_lim: c_int,
    blk_list_lim: c_int,
) -> herr_t {
    finish(
        "h5rt_set_free_list_limits",
        library().set_free_list_limits(
            i64::from(reg_global_lim),
            i64::from(reg_list_lim),
            i64::from(arr_global_lim),
            i64::from(arr_list_lim),
            i64::from(blk_global_lim),
            i64::from(blk_list_lim),
        ),
    )
}

/// Report cached bytes per category through whichever pointers are non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_get_free_list_sizes(
    reg_size: *mut usize,
    arr_size: *mut usize,
    blk_size: *mut usize,
    fac_size: *mut usize,
) -> herr_t {
    let sizes = match library().free_list_sizes() {
        Ok(sizes) => sizes,
        Err(err) => return fail("h5rt_get_free_list_sizes", &err),
    };
    for (out, value) in [
        (reg_size, sizes.regular),
        (arr_size, sizes.array),
        (blk_size, sizes.block),
        (fac_size, sizes.factory),
    ] {
        if !out.is_null() {
            // SAFETY: non-null pointers are writable per the C contract.
            unsafe { *out = value };
        }
    }
    SUCCEED
}

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_garbage_collect() -> herr_t {
    finish("h5rt_garbage_collect", library().garbage_collect())
}
