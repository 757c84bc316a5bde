//! Process-wide free list of default-sized read buffers.
//!
//! Membership is a cache: a released buffer may go to any later reader or
//! simply be dropped when the list is full.

use parking_lot::Mutex;

use super::config::DEFAULT_INITIAL_BUFFER;

/// Buffers kept beyond this count are dropped on release.
const MAX_POOLED: usize = 16;

static POOL: BufferPool = BufferPool::new(DEFAULT_INITIAL_BUFFER, MAX_POOLED);

struct BufferPool {
    size: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    const fn new(size: usize, capacity: usize) -> Self {
        Self {
            size,
            capacity,
            free: parking_lot::const_mutex(Vec::new()),
        }
    }

    /// A buffer of exactly the pool's size. Reused buffers keep their old
    /// bytes; readers only look at the range they just filled.
    fn acquire(&self) -> Vec<u8> {
        self.free.lock().pop().unwrap_or_else(|| vec![0; self.size])
    }

    /// Returns `true` when the buffer was pooled.
    fn release(&self, buffer: Vec<u8>) -> bool {
        if buffer.len() != self.size {
            return false;
        }
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            return false;
        }
        free.push(buffer);
        true
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

/// Size of the buffers the shared pool hands out.
#[must_use]
pub fn pooled_buffer_size() -> usize {
    POOL.size
}

/// Take a read buffer of `size` bytes, reusing a pooled one when `size`
/// matches the pool's fixed size.
pub(super) fn acquire(size: usize) -> Vec<u8> {
    if size == POOL.size {
        POOL.acquire()
    } else {
        vec![0; size]
    }
}

/// Hand a buffer back. Mismatched sizes are dropped, never pooled.
pub(super) fn release(buffer: Vec<u8>) -> bool {
    POOL.release(buffer)
}
