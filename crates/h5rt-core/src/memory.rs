//! Allocation façade for plugins and callers outside the engine.
//!
//! All buffers come from one block free list so that every participant
//! frees through the same allocator the engine uses.

use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::freelist::{Block, FreeListCategory, FreeListLimits, FreeListSizes, ListId, free_lists};

/// Name of the block list backing the façade.
pub const MEMORY_LIST: &str = "h5rt_memory";

fn memory_list() -> ListId {
    static LIST: OnceLock<ListId> = OnceLock::new();
    *LIST.get_or_init(|| free_lists().register(MEMORY_LIST, FreeListCategory::Block, 0))
}

/// Failed resize; the original buffer is handed back untouched.
#[derive(Error)]
#[error("unable to resize buffer to {requested} bytes")]
pub struct ResizeError {
    pub requested: usize,
    pub original: Option<Block>,
}

impl fmt::Debug for ResizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizeError")
            .field("requested", &self.requested)
            .field("original", &self.original.as_ref().map(Block::len))
            .finish()
    }
}

/// Allocate `size` bytes, zero-filled when `clear`. A zero size yields
/// `None` and is not an error.
#[must_use]
pub fn allocate(size: usize, clear: bool) -> Option<Block> {
    if size == 0 {
        return None;
    }
    free_lists().block_malloc(memory_list(), size, clear)
}

/// `realloc` semantics: `None` input allocates, zero size releases, and a
/// failed resize returns the original buffer inside the error.
pub fn resize(buf: Option<Block>, size: usize) -> Result<Option<Block>, ResizeError> {
    match (buf, size) {
        (None, 0) => Ok(None),
        (None, n) => match allocate(n, false) {
            Some(block) => Ok(Some(block)),
            None => Err(ResizeError {
                requested: n,
                original: None,
            }),
        },
        (Some(block), 0) => {
            release(Some(block));
            Ok(None)
        }
        (Some(block), n) if block.len() == n => Ok(Some(block)),
        (Some(block), n) => {
            let Some(mut grown) = allocate(n, false) else {
                return Err(ResizeError {
                    requested: n,
                    original: Some(block),
                });
            };
            let keep = block.len().min(n);
            grown.as_mut_slice()[..keep].copy_from_slice(&block.as_slice()[..keep]);
            release(Some(block));
            Ok(Some(grown))
        }
    }
}

/// Return a buffer. `None` is a no-op.
pub fn release(buf: Option<Block>) {
    if let Some(block) = buf {
        free_lists().release(memory_list(), block);
    }
}

/// Set pool ceilings; negative values mean unlimited and block limits are
/// mirrored onto the factory category.
pub fn set_limits(
    reg_global: i64,
    reg_list: i64,
    arr_global: i64,
    arr_list: i64,
    blk_global: i64,
    blk_list: i64,
) {
    free_lists().set_limits(FreeListLimits::from_raw(
        reg_global, reg_list, arr_global, arr_list, blk_global, blk_list,
    ));
}

/// Release all cached pool memory. Returns bytes given back.
pub fn garbage_collect() -> usize {
    free_lists().garbage_collect()
}

#[must_use]
pub fn sizes() -> FreeListSizes {
    free_lists().sizes()
}
