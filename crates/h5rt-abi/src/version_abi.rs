//! ABI layer for version queries and the header/library compatibility check.

use std::ffi::c_uint;

use h5rt_core::{Version, library};

use crate::status::{SUCCEED, finish, herr_t};

#[unsafe(no_mangle)]
pub extern "C" fn h5rt_check_version(majnum: c_uint, minnum: c_uint, relnum: c_uint) -> herr_t {
    finish(
        "h5rt_check_version",
        library().check_version(Version::new(majnum, minnum, relnum)),
    )
}

/// Write the library version through whichever pointers are non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn h5rt_get_libversion(
    majnum: *mut c_uint,
    minnum: *mut c_uint,
    relnum: *mut c_uint,
) -> herr_t {
    let version = library().lib_version();
    for (out, value) in [
        (majnum, version.major),
        (minnum, version.minor),
        (relnum, version.release),
    ] {
        if !out.is_null() {
            // SAFETY: non-null pointers are writable per the C contract.
            unsafe { *out = value };
        }
    }
    SUCCEED
}
