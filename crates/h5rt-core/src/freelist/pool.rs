//! Pooled free lists with per-list and per-category byte ceilings.
//!
//! Released blocks are cached on the list they came from, keyed by size,
//! and reused by later requests of the same size. When a list caches more
//! than its per-list limit it is collected; when a category caches more than
//! its global limit every list in that category is collected.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

use super::block::Block;

/// Pool category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FreeListCategory {
    /// Fixed-size objects.
    Regular,
    /// Element size times count.
    Array,
    /// Variable-size blocks.
    Block,
    /// Fixed-size objects whose size is chosen at runtime.
    Factory,
}

impl FreeListCategory {
    pub const ALL: [Self; 4] = [Self::Regular, Self::Array, Self::Block, Self::Factory];

    const fn slot(self) -> usize {
        match self {
            Self::Regular => 0,
            Self::Array => 1,
            Self::Block => 2,
            Self::Factory => 3,
        }
    }
}

/// A byte ceiling; `None` is unlimited.
pub type Limit = Option<usize>;

/// Global and per-list ceilings for each category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListLimits {
    pub regular_global: Limit,
    pub regular_per_list: Limit,
    pub array_global: Limit,
    pub array_per_list: Limit,
    pub block_global: Limit,
    pub block_per_list: Limit,
    pub factory_global: Limit,
    pub factory_per_list: Limit,
}

impl Default for FreeListLimits {
    fn default() -> Self {
        const KIB: usize = 1024;
        const MIB: usize = 1024 * KIB;
        Self {
            regular_global: Some(MIB),
            regular_per_list: Some(64 * KIB),
            array_global: Some(4 * MIB),
            array_per_list: Some(256 * KIB),
            block_global: Some(16 * MIB),
            block_per_list: Some(MIB),
            factory_global: Some(16 * MIB),
            factory_per_list: Some(MIB),
        }
    }
}

fn limit_from_raw(raw: i64) -> Limit {
    usize::try_from(raw).ok()
}

impl FreeListLimits {
    /// Build from signed values where any negative value means unlimited.
    /// Block limits are mirrored onto the factory category.
    #[must_use]
    pub fn from_raw(
        reg_global: i64,
        reg_list: i64,
        arr_global: i64,
        arr_list: i64,
        blk_global: i64,
        blk_list: i64,
    ) -> Self {
        Self {
            regular_global: limit_from_raw(reg_global),
            regular_per_list: limit_from_raw(reg_list),
            array_global: limit_from_raw(arr_global),
            array_per_list: limit_from_raw(arr_list),
            block_global: limit_from_raw(blk_global),
            block_per_list: limit_from_raw(blk_list),
            factory_global: limit_from_raw(blk_global),
            factory_per_list: limit_from_raw(blk_list),
        }
    }

    #[must_use]
    pub const fn global(&self, category: FreeListCategory) -> Limit {
        match category {
            FreeListCategory::Regular => self.regular_global,
            FreeListCategory::Array => self.array_global,
            FreeListCategory::Block => self.block_global,
            FreeListCategory::Factory => self.factory_global,
        }
    }

    #[must_use]
    pub const fn per_list(&self, category: FreeListCategory) -> Limit {
        match category {
            FreeListCategory::Regular => self.regular_per_list,
            FreeListCategory::Array => self.array_per_list,
            FreeListCategory::Block => self.block_per_list,
            FreeListCategory::Factory => self.factory_per_list,
        }
    }
}

/// Cached bytes currently held per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FreeListSizes {
    pub regular: usize,
    pub array: usize,
    pub block: usize,
    pub factory: usize,
}

/// Handle to a registered list. Stays valid across shutdown: a list dropped
/// by [`FreeLists::term_package`] is recreated on its next use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId {
    name: &'static str,
    category: FreeListCategory,
    elem_size: usize,
}

impl ListId {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn category(&self) -> FreeListCategory {
        self.category
    }

    /// Element size; zero for block lists.
    #[must_use]
    pub const fn elem_size(&self) -> usize {
        self.elem_size
    }

    const fn key(&self) -> (FreeListCategory, &'static str) {
        (self.category, self.name)
    }
}

struct FreeList {
    elem_size: usize,
    cached: BTreeMap<usize, Vec<Block>>,
    cached_bytes: usize,
    outstanding: usize,
}

impl FreeList {
    fn new(elem_size: usize) -> Self {
        Self {
            elem_size,
            cached: BTreeMap::new(),
            cached_bytes: 0,
            outstanding: 0,
        }
    }

    fn take(&mut self, size: usize) -> Option<Block> {
        let stack = self.cached.get_mut(&size)?;
        let block = stack.pop()?;
        if stack.is_empty() {
            self.cached.remove(&size);
        }
        self.cached_bytes -= size;
        Some(block)
    }

    fn collect(&mut self) -> usize {
        let freed = self.cached_bytes;
        self.cached.clear();
        self.cached_bytes = 0;
        freed
    }
}

struct PoolState {
    lists: BTreeMap<(FreeListCategory, &'static str), FreeList>,
    category_bytes: [usize; 4],
    limits: FreeListLimits,
}

impl PoolState {
    /// The list behind `id`, recreated if shutdown dropped it.
    fn list_mut(&mut self, id: ListId) -> &mut FreeList {
        self.lists
            .entry(id.key())
            .or_insert_with(|| FreeList::new(id.elem_size))
    }

    fn collect_list(&mut self, key: (FreeListCategory, &'static str)) -> usize {
        let freed = self.lists.get_mut(&key).map_or(0, FreeList::collect);
        self.category_bytes[key.0.slot()] -= freed;
        freed
    }

    fn collect_category(&mut self, category: FreeListCategory) -> usize {
        let freed: usize = self
            .lists
            .iter_mut()
            .filter(|((c, _), _)| *c == category)
            .map(|(_, list)| list.collect())
            .sum();
        self.category_bytes[category.slot()] -= freed;
        freed
    }

    fn collect_all(&mut self) -> usize {
        FreeListCategory::ALL
            .into_iter()
            .map(|c| self.collect_category(c))
            .sum()
    }
}

/// Process-wide set of free lists.
pub struct FreeLists {
    state: Mutex<PoolState>,
}

impl fmt::Debug for FreeLists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FreeLists")
            .field("lists", &state.lists.len())
            .field("category_bytes", &state.category_bytes)
            .field("limits", &state.limits)
            .finish()
    }
}

impl Default for FreeLists {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeLists {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(FreeListLimits::default())
    }

    #[must_use]
    pub fn with_limits(limits: FreeListLimits) -> Self {
        Self {
            state: Mutex::new(PoolState {
                lists: BTreeMap::new(),
                category_bytes: [0; 4],
                limits,
            }),
        }
    }

    /// Register a list, or return the existing one with the same name and
    /// category. `elem_size` is ignored for block lists.
    pub fn register(
        &self,
        name: &'static str,
        category: FreeListCategory,
        elem_size: usize,
    ) -> ListId {
        let elem_size = match category {
            FreeListCategory::Block => 0,
            _ => elem_size,
        };
        let elem_size = self
            .state
            .lock()
            .lists
            .entry((category, name))
            .or_insert_with(|| FreeList::new(elem_size))
            .elem_size;
        ListId {
            name,
            category,
            elem_size,
        }
    }

    #[must_use]
    pub fn is_registered(&self, id: ListId) -> bool {
        self.state.lock().lists.contains_key(&id.key())
    }

    /// One element from a regular or factory list.
    pub fn malloc(&self, id: ListId, clear: bool) -> Option<Block> {
        self.acquire(id, id.elem_size, clear)
    }

    /// `count` elements from an array list.
    pub fn array_malloc(&self, id: ListId, count: usize, clear: bool) -> Option<Block> {
        let size = id.elem_size.checked_mul(count)?;
        self.acquire(id, size, clear)
    }

    /// A `size`-byte block from a block list.
    pub fn block_malloc(&self, id: ListId, size: usize, clear: bool) -> Option<Block> {
        self.acquire(id, size, clear)
    }

    fn acquire(&self, id: ListId, size: usize, clear: bool) -> Option<Block> {
        {
            let mut state = self.state.lock();
            let list = state.list_mut(id);
            if let Some(mut block) = list.take(size) {
                list.outstanding += 1;
                state.category_bytes[id.category.slot()] -= size;
                if clear {
                    block.zero();
                }
                return Some(block);
            }
        }
        // Cached memory elsewhere may be what stands between us and success.
        let block = match Block::allocate(size) {
            Some(block) => block,
            None => {
                self.garbage_collect();
                Block::allocate(size)?
            }
        };
        self.state.lock().list_mut(id).outstanding += 1;
        Some(block)
    }

    /// Return a block to its list, enforcing the configured ceilings.
    pub fn release(&self, id: ListId, block: Block) {
        let size = block.len();
        let mut state = self.state.lock();
        let list = state.list_mut(id);
        list.outstanding = list.outstanding.saturating_sub(1);
        list.cached.entry(size).or_default().push(block);
        list.cached_bytes += size;
        let list_bytes = list.cached_bytes;
        state.category_bytes[id.category.slot()] += size;

        if state
            .limits
            .per_list(id.category)
            .is_some_and(|limit| list_bytes > limit)
        {
            state.collect_list(id.key());
        }
        let category_bytes = state.category_bytes[id.category.slot()];
        if state
            .limits
            .global(id.category)
            .is_some_and(|limit| category_bytes > limit)
        {
            state.collect_category(id.category);
        }
    }

    /// Release every cached block. Returns the bytes given back.
    pub fn garbage_collect(&self) -> usize {
        self.state.lock().collect_all()
    }

    pub fn collect_category(&self, category: FreeListCategory) -> usize {
        self.state.lock().collect_category(category)
    }

    /// Replace the ceilings. Already-cached memory is left until the next
    /// release or collection.
    pub fn set_limits(&self, limits: FreeListLimits) {
        self.state.lock().limits = limits;
    }

    #[must_use]
    pub fn limits(&self) -> FreeListLimits {
        self.state.lock().limits
    }

    #[must_use]
    pub fn sizes(&self) -> FreeListSizes {
        let bytes = self.state.lock().category_bytes;
        FreeListSizes {
            regular: bytes[FreeListCategory::Regular.slot()],
            array: bytes[FreeListCategory::Array.slot()],
            block: bytes[FreeListCategory::Block.slot()],
            factory: bytes[FreeListCategory::Factory.slot()],
        }
    }

    /// Blocks handed out and not yet released.
    #[must_use]
    pub fn outstanding(&self, id: ListId) -> usize {
        self.state
            .lock()
            .lists
            .get(&id.key())
            .map_or(0, |l| l.outstanding)
    }

    #[must_use]
    pub fn list_count(&self) -> usize {
        self.state.lock().lists.len()
    }

    /// Shutdown step: collect everything and drop idle lists. Returns 1 if
    /// anything was released or removed, 0 once quiescent.
    pub fn term_package(&self) -> usize {
        let mut state = self.state.lock();
        let freed = state.collect_all();
        let before = state.lists.len();
        state.lists.retain(|_, list| list.outstanding > 0);
        usize::from(freed > 0 || state.lists.len() != before)
    }
}
