//! Reusable RAW frame buffer

use std::fmt;
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use motion_codec::FrameLayout;
use thiserror::Error;

use crate::metadata::FrameMetadata;
use crate::native::{BufferKind, DeviceBuffer, HostBuffer, NativeBuffer};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("range {start}..{end} outside buffer of {capacity} bytes")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        capacity: usize,
    },

    #[error("{needed} bytes do not fit in buffer of {capacity} bytes")]
    Overflow { needed: usize, capacity: usize },

    #[error("backing store: {0}")]
    Storage(#[from] io::Error),
}

/// A frame buffer: backing store, valid byte range and capture metadata.
///
/// Buffers are allocated once and recycled through the pool; only the valid
/// range and metadata change between frames.
pub struct RawImageBuffer {
    id: BufferId,
    data: Box<dyn NativeBuffer>,
    valid: Range<usize>,
    pub(crate) generation: u64,
    pub metadata: FrameMetadata,
}

impl RawImageBuffer {
    pub fn new(data: Box<dyn NativeBuffer>) -> Self {
        Self {
            id: BufferId::next(),
            data,
            valid: 0..0,
            generation: 0,
            metadata: FrameMetadata::default(),
        }
    }

    /// Heap-backed buffer of `capacity` bytes
    pub fn host(capacity: usize) -> Self {
        Self::new(Box::new(HostBuffer::new(capacity)))
    }

    /// Device-backed buffer of `capacity` bytes
    pub fn device(capacity: usize) -> io::Result<Self> {
        Ok(Self::new(Box::new(DeviceBuffer::new(capacity)?)))
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.data.kind()
    }

    /// Allocated size of the backing store
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn valid_range(&self) -> Range<usize> {
        self.valid.clone()
    }

    pub fn valid_len(&self) -> usize {
        self.valid.len()
    }

    pub fn timestamp(&self) -> i64 {
        self.metadata.timestamp
    }

    pub fn layout(&self) -> FrameLayout {
        self.metadata.layout()
    }

    pub fn native(&mut self) -> &mut dyn NativeBuffer {
        self.data.as_mut()
    }

    pub fn set_valid_range(&mut self, start: usize, end: usize) -> Result<(), BufferError> {
        let capacity = self.data.len();
        if start > end || end > capacity {
            return Err(BufferError::RangeOutOfBounds {
                start,
                end,
                capacity,
            });
        }
        self.valid = start..end;
        Ok(())
    }

    /// Run `f` over the valid bytes while the store is locked
    pub fn with_valid_data<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let range = self.valid.clone();
        let result = f(&mut self.data.lock()[range]);
        self.data.unlock();
        result
    }

    /// Copy of the valid bytes
    pub fn copy_valid_data(&mut self) -> Vec<u8> {
        self.with_valid_data(|data| data.to_vec())
    }

    /// Overwrite the store from offset 0 and make `bytes` the valid range
    pub fn write_valid_data(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let capacity = self.data.len();
        if bytes.len() > capacity {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                capacity,
            });
        }
        self.data.lock()[..bytes.len()].copy_from_slice(bytes);
        self.data.unlock();
        self.valid = 0..bytes.len();
        Ok(())
    }

    /// Fill with a captured frame
    pub fn fill(&mut self, bytes: &[u8], metadata: FrameMetadata) -> Result<(), BufferError> {
        self.write_valid_data(bytes)?;
        self.metadata = metadata;
        Ok(())
    }

    /// Forget the previous frame; the allocation is kept
    pub fn reset(&mut self) {
        self.valid = 0..0;
        self.metadata = FrameMetadata::default();
    }

    /// Deep copy with a fresh identity
    pub fn duplicate(&self) -> Result<Self, BufferError> {
        Ok(Self {
            id: BufferId::next(),
            data: self.data.clone_buffer()?,
            valid: self.valid.clone(),
            generation: self.generation,
            metadata: self.metadata.clone(),
        })
    }
}

impl fmt::Debug for RawImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImageBuffer")
            .field("id", &self.id)
            .field("kind", &self.data.kind())
            .field("capacity", &self.data.len())
            .field("valid", &self.valid)
            .field("timestamp", &self.metadata.timestamp)
            .finish()
    }
}
