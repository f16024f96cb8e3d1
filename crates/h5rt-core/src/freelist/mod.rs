//! Free-list pooled allocation.

pub mod block;
pub mod pool;

use std::sync::OnceLock;

pub use block::Block;
pub use pool::{FreeListCategory, FreeListLimits, FreeListSizes, FreeLists, ListId};

use crate::subsystem::Subsystem;

static FREE_LISTS: OnceLock<FreeLists> = OnceLock::new();

/// The process-wide free lists.
pub fn free_lists() -> &'static FreeLists {
    FREE_LISTS.get_or_init(FreeLists::new)
}

/// Free-list subsystem (`FL`): collects the process-wide pools at shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeListPackage;

impl Subsystem for FreeListPackage {
    fn term_package(&self) -> usize {
        free_lists().term_package()
    }
}
