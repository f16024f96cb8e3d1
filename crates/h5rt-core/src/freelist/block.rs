//! Owned heap buffers handed out by the free lists.

use std::fmt;

/// A fixed-length, zero-initialized heap buffer.
///
/// The backing allocation never moves while the block is alive, so its
/// address can be exposed across the C boundary and used as a lookup key.
pub struct Block {
    buf: Box<[u8]>,
}

impl Block {
    /// Allocate `size` zeroed bytes. Returns `None` if the system allocator
    /// refuses the request.
    #[must_use]
    pub fn allocate(size: usize) -> Option<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(Self {
            buf: buf.into_boxed_slice(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    /// Address of the first byte, stable for the block's lifetime.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    pub(crate) fn zero(&mut self) {
        self.buf.fill(0);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}
