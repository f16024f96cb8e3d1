//! # h5rt-core
//!
//! Process-wide lifecycle core of the h5rt hierarchical-data storage engine.
//!
//! This crate brings the engine's subsystems up exactly once per process
//! lifetime, in dependency order, and tears them down again through an
//! iterative fixpoint sweep. It also hosts the cross-cutting services every
//! subsystem relies on:
//!
//! - [`version`]: header/library version compatibility guard.
//! - [`debug`]: runtime debug-stream configuration (`H5RT_DEBUG`).
//! - [`freelist`] and [`memory`]: pooled free lists and the allocation façade.
//! - [`atclose`]: LIFO registry of user shutdown callbacks.
//! - [`sandbox`]: prepare/restore of thread state around user callbacks.
//! - [`lifecycle`]: the init/terminate state machine.
//! - [`shutdown`]: the dependency-ordered shutdown engine.
//!
//! No `unsafe` code is permitted at the crate level. Only descriptor
//! duplication for debug streams and the process-exit hook opt in.

#![deny(unsafe_code)]

pub mod api_context;
pub mod atclose;
pub mod config;
pub mod debug;
pub mod error;
pub mod error_stack;
pub mod exit_hook;
pub mod freelist;
pub mod lifecycle;
pub mod log;
pub mod memory;
pub mod sandbox;
pub mod shutdown;
pub mod subsystem;
pub mod version;

pub use error::{ErrorClass, LibError, Result};
pub use lifecycle::{Library, LibraryConfig, LibraryState, LifecycleState, library};
pub use shutdown::{MAX_SHUTDOWN_SWEEPS, ShutdownPlan, ShutdownReport};
pub use subsystem::{Subsystem, SubsystemId, SubsystemTable};
pub use version::{FatalPolicy, Version};
