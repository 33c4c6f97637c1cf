//! See [`MemoryPool`].

use std::cell::{Cell, RefCell};

use bytes::BytesMut;

/// Pool of reusable byte buffers shared by the [lanes](crate::lane) of a
/// connection.
///
/// Every buffer handed out by [`allocate`] must eventually be handed back
/// through [`release`], on the happy path and the teardown path alike. The
/// pool counts buffers currently held by callers, so a leak shows up as a
/// non-zero [`outstanding`] count and a double release panics.
///
/// The pool is owned by a single-threaded dispatch loop, like the lanes
/// themselves; clone it around with [`std::rc::Rc`].
///
/// [`allocate`]: MemoryPool::allocate
/// [`release`]: MemoryPool::release
/// [`outstanding`]: MemoryPool::outstanding
#[derive(Debug)]
pub struct MemoryPool {
    free: RefCell<Vec<BytesMut>>,
    buf_capacity: usize,
    max_outstanding: Option<usize>,
    outstanding: Cell<usize>,
}

/// The [`MemoryPool`] refused to hand out another buffer because too many
/// are already outstanding.
///
/// This is fatal to the connection that hit it; the dispatch loop is
/// expected to tear the connection down and [`reset`](crate::lane::Lane::reset)
/// its lanes.
#[derive(Debug, Clone, thiserror::Error)]
#[error("out of pooled buffers")]
pub struct OutOfMemory;

impl MemoryPool {
    /// Creates a pool handing out buffers with at least `buf_capacity` bytes
    /// of capacity, with no limit on how many may be outstanding at once.
    #[must_use]
    pub fn new(buf_capacity: usize) -> Self {
        Self {
            free: RefCell::new(Vec::new()),
            buf_capacity,
            max_outstanding: None,
            outstanding: Cell::new(0),
        }
    }

    /// Creates a pool which refuses to hand out more than `max_outstanding`
    /// buffers at once.
    #[must_use]
    pub fn with_limit(buf_capacity: usize, max_outstanding: usize) -> Self {
        Self {
            max_outstanding: Some(max_outstanding),
            ..Self::new(buf_capacity)
        }
    }

    /// Takes an empty buffer out of the pool, allocating a fresh one if the
    /// pool has none to reuse.
    ///
    /// # Errors
    ///
    /// Errors if the pool's outstanding-buffer limit has been reached.
    pub fn allocate(&self) -> Result<BytesMut, OutOfMemory> {
        if self
            .max_outstanding
            .is_some_and(|max| self.outstanding.get() >= max)
        {
            return Err(OutOfMemory);
        }
        self.outstanding.set(self.outstanding.get() + 1);
        Ok(self
            .free
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buf_capacity)))
    }

    /// Returns a buffer to the pool.
    ///
    /// # Panics
    ///
    /// Panics if more buffers are released than were allocated.
    pub fn release(&self, mut buf: BytesMut) {
        let outstanding = self
            .outstanding
            .get()
            .checked_sub(1)
            .expect("released more buffers than were allocated");
        self.outstanding.set(outstanding);
        buf.clear();
        self.free.borrow_mut().push(buf);
    }

    /// Gets the number of buffers currently held by callers.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }
}
