//! Fixed-capacity pool of reusable native frame buffers
//!
//! Video decoders write each decoded picture into a buffer acquired from
//! the pool, so steady-state decoding performs no allocation. Buffers are
//! handed out as [`PoolBuffer`] handles that go back to the pool either
//! through [`Pool::release`] or when the handle is dropped.
//!
//! The pool is generational: [`Pool::reset`] discards the free list and
//! starts a new generation without waiting for in-flight buffers. When a
//! buffer from an older generation comes back late, the stale memory is
//! freed and a fresh buffer is provisioned into the current generation.

use crate::utils::error::{CCPlayerError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Heap block owned by a pool
///
/// Every live block is counted in its pool's allocation counter, which is
/// how tests observe that `close()` leaves no outstanding native memory.
struct NativeBuffer {
    data: Box<[u8]>,
    live: Arc<AtomicUsize>,
}

impl NativeBuffer {
    fn allocate(size: usize, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            live: Arc::clone(live),
        }
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bookkeeping guarded by the pool mutex
struct PoolState {
    /// Buffers ready to be acquired
    available: Vec<NativeBuffer>,

    /// Current generation, bumped by every reset
    generation: u64,

    /// Buffers of the current generation held by consumers
    in_flight: usize,

    /// Buffers of previous generations not yet returned
    stale: usize,
}

struct PoolInner {
    capacity: usize,
    buffer_size: usize,
    state: Mutex<PoolState>,
    closed: AtomicBool,
    released: Notify,
    live: Arc<AtomicUsize>,
}

impl PoolInner {
    fn allocate(&self) -> NativeBuffer {
        NativeBuffer::allocate(self.buffer_size, &self.live)
    }

    /// Return a buffer to the free list of the current generation
    fn give_back(&self, native: NativeBuffer, generation: u64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CCPlayerError::Closed("Pool"));
        }

        {
            let mut state = self.state.lock();

            if generation == state.generation {
                state.in_flight = state.in_flight.saturating_sub(1);
                state.available.push(native);
            } else {
                debug!(
                    "Dropping stale pool buffer from generation {} (current {})",
                    generation, state.generation
                );
                state.stale = state.stale.saturating_sub(1);
                drop(native);
                state.available.push(self.allocate());
            }
        }

        self.released.notify_waiters();
        Ok(())
    }
}

/// Handle to a buffer checked out of a [`Pool`]
pub struct PoolBuffer {
    native: Option<NativeBuffer>,
    generation: u64,
    pool: Weak<PoolInner>,
}

impl PoolBuffer {
    /// Read access to the buffer contents
    pub fn as_slice(&self) -> &[u8] {
        self.native.as_ref().map(|n| &n.data[..]).unwrap_or(&[])
    }

    /// Write access for decoders
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.native.as_mut() {
            Some(native) => &mut native.data[..],
            None => &mut [],
        }
    }

    /// Size of the buffer in bytes
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool generation this buffer was acquired in
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            if let Some(pool) = self.pool.upgrade() {
                // A closed pool simply frees the memory here.
                let _ = pool.give_back(native, self.generation);
            }
        }
    }
}

impl fmt::Debug for PoolBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("len", &self.len())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Fixed-capacity set of pre-allocated frame buffers
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of buffers, must be positive
    /// * `buffer_size` - Size of each buffer in bytes, must be positive
    pub fn new(capacity: usize, buffer_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CCPlayerError::InvalidArgument(
                "Pool capacity must be positive".to_string(),
            ));
        }
        if buffer_size == 0 {
            return Err(CCPlayerError::InvalidArgument(
                "Pool buffer size must be positive".to_string(),
            ));
        }

        let live = Arc::new(AtomicUsize::new(0));
        let available = (0..capacity)
            .map(|_| NativeBuffer::allocate(buffer_size, &live))
            .collect();

        Ok(Self {
            inner: Arc::new(PoolInner {
                capacity,
                buffer_size,
                state: Mutex::new(PoolState {
                    available,
                    generation: 0,
                    in_flight: 0,
                    stale: 0,
                }),
                closed: AtomicBool::new(false),
                released: Notify::new(),
                live,
            }),
        })
    }

    /// Acquire a buffer, suspending until one is available
    ///
    /// Fails with `Closed` if the pool is closed, including while waiting.
    pub async fn acquire(&self) -> Result<PoolBuffer> {
        loop {
            // Register interest before checking so a concurrent release
            // between the check and the await is not missed.
            let released = self.inner.released.notified();

            if let Some(buffer) = self.try_acquire()? {
                return Ok(buffer);
            }

            released.await;
        }
    }

    /// Acquire a buffer without waiting
    pub fn try_acquire(&self) -> Result<Option<PoolBuffer>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CCPlayerError::Closed("Pool"));
        }

        let mut state = self.inner.state.lock();
        Ok(state.available.pop().map(|native| {
            state.in_flight += 1;
            PoolBuffer {
                native: Some(native),
                generation: state.generation,
                pool: Arc::downgrade(&self.inner),
            }
        }))
    }

    /// Return a buffer to the pool
    pub fn release(&self, mut buffer: PoolBuffer) -> Result<()> {
        if !Weak::ptr_eq(&buffer.pool, &Arc::downgrade(&self.inner)) {
            return Err(CCPlayerError::InvalidArgument(
                "Buffer does not belong to this pool".to_string(),
            ));
        }

        let native = buffer
            .native
            .take()
            .ok_or_else(|| crate::internal_error!("Pool buffer has no backing memory"))?;

        self.inner.give_back(native, buffer.generation)
    }

    /// Start a new generation with a fresh free list
    ///
    /// Buffers currently in flight are not waited for. Until they come
    /// back the pool runs short by their number.
    pub fn reset(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CCPlayerError::Closed("Pool"));
        }

        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.stale += state.in_flight;
            state.in_flight = 0;

            let target = self.inner.capacity.saturating_sub(state.stale);
            let mut available = std::mem::take(&mut state.available);
            available.truncate(target);
            while available.len() < target {
                available.push(self.inner.allocate());
            }
            state.available = available;

            if state.stale > 0 {
                warn!(
                    "Pool reset with {} buffers still in flight, generation {}",
                    state.stale, state.generation
                );
            }
        }

        self.inner.released.notify_waiters();
        Ok(())
    }

    /// Close the pool and free all pooled memory
    ///
    /// Idempotent. Waiters in `acquire` fail with `Closed`; buffers still in
    /// flight are freed when their handles drop.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let drained = std::mem::take(&mut self.inner.state.lock().available);
        debug!("Closing pool, freeing {} buffers", drained.len());
        drop(drained);

        self.inner.released.notify_waiters();
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers ready to be acquired
    pub fn available(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    /// Number of current-generation buffers held by consumers
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of native buffers allocated by this pool and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("buffer_size", &self.buffer_size())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}
