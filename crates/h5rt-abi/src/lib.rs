// All extern "C" exports accept raw pointers from C callers and check them
// for null before use, so per-function safety docs would be boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # h5rt-abi
//!
//! `extern "C"` boundary for the h5rt lifecycle core.
//!
//! Builds a `cdylib` exporting the `h5rt_*` symbols. Every entry point
//! translates C arguments, delegates to the process-wide
//! [`h5rt_core::library`], and converts failures into a negative status
//! plus a record on the calling thread's error stack.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> h5rt_core::Library -> status code
//! ```

mod status;

pub mod error_abi;
pub mod lifecycle_abi;
pub mod memory_abi;
pub mod version_abi;

pub use status::{FAIL, SUCCEED, herr_t, htri_t};
