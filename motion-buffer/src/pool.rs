//! Frame buffer pool shared by capture, streaming and snapshot readers
//!
//! Buffers move between three owners:
//! - *Unused*: free for capture to fill
//! - *Ready*: filled, waiting for a reader
//! - in flight: owned by a caller, a pipeline stage or a [`ReadyBufferGuard`]
//!
//! Buckets own their buffers, so moving a buffer out of one bucket is the
//! only way to obtain it and a buffer can never sit in two places at once.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::buffer::RawImageBuffer;

/// Pool of reusable frame buffers with memory accounting.
///
/// Create one per process and share it as `Arc<BufferPool>`.
pub struct BufferPool {
    unused: SegQueue<Box<RawImageBuffer>>,
    ready: Mutex<VecDeque<Box<RawImageBuffer>>>,

    memory_use_bytes: AtomicUsize,
    num_buffers: AtomicUsize,
    target_memory_bytes: AtomicUsize,

    // Bumped by reset(); buffers from an older generation are dropped on return
    generation: AtomicU64,
    stolen_ready: AtomicU64,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            unused: SegQueue::new(),
            ready: Mutex::new(VecDeque::new()),
            memory_use_bytes: AtomicUsize::new(0),
            num_buffers: AtomicUsize::new(0),
            target_memory_bytes: AtomicUsize::new(0),
            generation: AtomicU64::new(1),
            stolen_ready: AtomicU64::new(0),
        }
    }

    fn register(&self, buffer: &mut RawImageBuffer) {
        buffer.generation = self.generation.load(Ordering::Acquire);
        self.memory_use_bytes
            .fetch_add(buffer.capacity(), Ordering::AcqRel);
        self.num_buffers.fetch_add(1, Ordering::AcqRel);
    }

    /// Adopt buffers never seen before; reject those from before a reset
    fn admit(&self, buffer: &mut RawImageBuffer) -> bool {
        if buffer.generation == 0 {
            self.register(buffer);
            return true;
        }
        if buffer.generation != self.generation.load(Ordering::Acquire) {
            log::debug!("Dropping buffer {:?} returned after pool reset", buffer.id());
            return false;
        }
        true
    }

    /// Register a newly allocated buffer as unused
    pub fn add_buffer(&self, buffer: RawImageBuffer) {
        let mut buffer = Box::new(buffer);
        self.register(&mut buffer);
        self.unused.push(buffer);
    }

    /// Take a buffer for capture without blocking.
    ///
    /// Falls back to the oldest ready buffer when no unused one is left, which
    /// discards that frame in favour of the new capture. Returns `None` only
    /// when both buckets are empty; the caller drops the frame.
    pub fn dequeue_unused_buffer(&self) -> Option<Box<RawImageBuffer>> {
        if let Some(mut buffer) = self.unused.pop() {
            buffer.reset();
            return Some(buffer);
        }

        let mut buffer = self.ready.lock().pop_front()?;
        self.stolen_ready.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "No unused buffers, reusing ready frame {}",
            buffer.timestamp()
        );
        buffer.reset();
        Some(buffer)
    }

    /// Publish a filled buffer to readers
    pub fn enqueue_ready_buffer(&self, mut buffer: Box<RawImageBuffer>) {
        if self.admit(&mut buffer) {
            self.ready.lock().push_back(buffer);
        }
    }

    /// Return a buffer straight to unused, bypassing ready
    pub fn discard_buffer(&self, mut buffer: Box<RawImageBuffer>) {
        if self.admit(&mut buffer) {
            self.unused.push(buffer);
        }
    }

    pub fn discard_buffers(&self, buffers: impl IntoIterator<Item = Box<RawImageBuffer>>) {
        for buffer in buffers {
            self.discard_buffer(buffer);
        }
    }

    /// Take the ready buffer with the newest timestamp
    pub fn consume_latest_buffer(&self) -> Option<ReadyBufferGuard<'_>> {
        let buffer = {
            let mut ready = self.ready.lock();
            let index = ready
                .iter()
                .enumerate()
                .max_by_key(|(_, buffer)| buffer.timestamp())
                .map(|(index, _)| index)?;
            ready.remove(index)?
        };
        Some(ReadyBufferGuard::new(self, vec![buffer]))
    }

    /// Take the ready buffer captured at `timestamp`
    pub fn consume_buffer(&self, timestamp: i64) -> Option<ReadyBufferGuard<'_>> {
        let buffer = {
            let mut ready = self.ready.lock();
            let index = ready.iter().position(|buffer| buffer.timestamp() == timestamp)?;
            ready.remove(index)?
        };
        Some(ReadyBufferGuard::new(self, vec![buffer]))
    }

    /// Take every ready buffer, oldest first
    pub fn consume_all_buffers(&self) -> ReadyBufferGuard<'_> {
        let buffers: Vec<_> = self.ready.lock().drain(..).collect();
        ReadyBufferGuard::new(self, buffers)
    }

    /// Put consumed buffers back, keeping ready ordered by timestamp
    fn return_to_ready(&self, buffers: Vec<Box<RawImageBuffer>>) {
        let mut ready = self.ready.lock();
        for mut buffer in buffers {
            if !self.admit(&mut buffer) {
                continue;
            }
            let index = ready.partition_point(|b| b.timestamp() <= buffer.timestamp());
            ready.insert(index, buffer);
        }
    }

    pub fn memory_use_bytes(&self) -> usize {
        self.memory_use_bytes.load(Ordering::Acquire)
    }

    pub fn num_buffers(&self) -> usize {
        self.num_buffers.load(Ordering::Acquire)
    }

    pub fn num_ready_buffers(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn num_unused_buffers(&self) -> usize {
        self.unused.len()
    }

    /// Ready frames overwritten because capture ran out of unused buffers
    pub fn stolen_ready_count(&self) -> u64 {
        self.stolen_ready.load(Ordering::Relaxed)
    }

    /// Memory budget for buffer allocation. Zero means unlimited.
    pub fn set_target_memory(&self, bytes: usize) {
        self.target_memory_bytes.store(bytes, Ordering::Release);
    }

    pub fn target_memory_bytes(&self) -> usize {
        self.target_memory_bytes.load(Ordering::Acquire)
    }

    /// Whether a buffer of `len` bytes fits in the budget
    pub fn can_allocate(&self, len: usize) -> bool {
        let target = self.target_memory_bytes();
        target == 0 || self.memory_use_bytes() + len <= target
    }

    /// Free unused buffers until memory use is within budget.
    ///
    /// Returns the number of buffers released.
    pub fn trim_to_target(&self) -> usize {
        let target = self.target_memory_bytes();
        if target == 0 {
            return 0;
        }

        let mut freed = 0;
        while self.memory_use_bytes() > target {
            let Some(buffer) = self.unused.pop() else {
                break;
            };
            self.memory_use_bytes
                .fetch_sub(buffer.capacity(), Ordering::AcqRel);
            self.num_buffers.fetch_sub(1, Ordering::AcqRel);
            freed += 1;
        }

        if freed > 0 {
            log::info!(
                "Released {} buffers, {} bytes in use of {} target",
                freed,
                self.memory_use_bytes(),
                target
            );
        }
        freed
    }

    /// Drop every pooled buffer and zero the counters.
    ///
    /// Buffers still held elsewhere are freed when they come back.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        while self.unused.pop().is_some() {}
        self.ready.lock().clear();
        self.memory_use_bytes.store(0, Ordering::Release);
        self.num_buffers.store(0, Ordering::Release);
        self.stolen_ready.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        let unused = self.num_unused_buffers();
        let ready = self.num_ready_buffers();
        let total = self.num_buffers();
        PoolStats {
            total,
            unused,
            ready,
            in_flight: total.saturating_sub(unused + ready),
            memory_use_bytes: self.memory_use_bytes(),
            target_memory_bytes: self.target_memory_bytes(),
            stolen_ready: self.stolen_ready_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub unused: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub memory_use_bytes: usize,
    pub target_memory_bytes: usize,
    pub stolen_ready: u64,
}

/// Buffers taken from the ready bucket.
///
/// Dropping the guard puts them back into ready, so a reader that bails out
/// early never loses a frame. Call [`ReadyBufferGuard::discard`] once the
/// frames are no longer needed.
pub struct ReadyBufferGuard<'a> {
    pool: &'a BufferPool,
    buffers: Vec<Box<RawImageBuffer>>,
}

impl<'a> ReadyBufferGuard<'a> {
    fn new(pool: &'a BufferPool, buffers: Vec<Box<RawImageBuffer>>) -> Self {
        Self { pool, buffers }
    }

    /// Release the buffers to unused instead of ready
    pub fn discard(mut self) {
        let buffers = std::mem::take(&mut self.buffers);
        self.pool.discard_buffers(buffers);
    }
}

impl Deref for ReadyBufferGuard<'_> {
    type Target = [Box<RawImageBuffer>];

    fn deref(&self) -> &Self::Target {
        &self.buffers
    }
}

impl DerefMut for ReadyBufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffers
    }
}

impl Drop for ReadyBufferGuard<'_> {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            self.pool.return_to_ready(std::mem::take(&mut self.buffers));
        }
    }
}

#[cfg(test)]
impl BufferPool {
    /// Ids currently in (unused, ready)
    fn bucket_ids(&self) -> (Vec<crate::BufferId>, Vec<crate::BufferId>) {
        let mut unused = Vec::new();
        let mut held = Vec::new();
        while let Some(buffer) = self.unused.pop() {
            unused.push(buffer.id());
            held.push(buffer);
        }
        for buffer in held {
            self.unused.push(buffer);
        }
        let ready = self.ready.lock().iter().map(|b| b.id()).collect();
        (unused, ready)
    }
}
