//! Backing storage for frame buffers
//!
//! Pipeline and container code only see [`NativeBuffer`]. Host buffers are
//! plain heap memory; device buffers are page-aligned shared mappings that
//! can be handed to a hardware producer through their native handle.

use std::io;

use memmap2::MmapMut;

/// Where a buffer's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Host,
    Device,
}

/// Capability interface over host or device memory
pub trait NativeBuffer: Send {
    fn kind(&self) -> BufferKind;

    /// Allocated length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map the buffer for CPU access. Must be paired with [`NativeBuffer::unlock`].
    fn lock(&mut self) -> &mut [u8];

    fn unlock(&mut self);

    /// Opaque handle identifying the underlying allocation
    fn native_handle(&self) -> u64;

    /// Deep copy into a new allocation of the same kind
    fn clone_buffer(&self) -> io::Result<Box<dyn NativeBuffer>>;

    /// Release storage beyond `len` bytes
    fn shrink(&mut self, len: usize) -> io::Result<()>;
}

/// Heap-backed buffer
pub struct HostBuffer {
    data: Vec<u8>,
    locks: u32,
}

impl HostBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            locks: 0,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, locks: 0 }
    }
}

impl NativeBuffer for HostBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::Host
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn lock(&mut self) -> &mut [u8] {
        self.locks += 1;
        &mut self.data
    }

    fn unlock(&mut self) {
        debug_assert!(self.locks > 0, "unlock without lock");
        self.locks = self.locks.saturating_sub(1);
    }

    fn native_handle(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    fn clone_buffer(&self) -> io::Result<Box<dyn NativeBuffer>> {
        Ok(Box::new(HostBuffer::from_vec(self.data.clone())))
    }

    fn shrink(&mut self, len: usize) -> io::Result<()> {
        self.data.truncate(len);
        self.data.shrink_to_fit();
        Ok(())
    }
}

/// Anonymous shared mapping standing in for device-visible memory
pub struct DeviceBuffer {
    map: MmapMut,
    len: usize,
    locks: u32,
}

impl DeviceBuffer {
    pub fn new(len: usize) -> io::Result<Self> {
        // Zero-length mappings are rejected by the kernel
        let map = MmapMut::map_anon(len.max(1))?;
        Ok(Self { map, len, locks: 0 })
    }
}

impl NativeBuffer for DeviceBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::Device
    }

    fn len(&self) -> usize {
        self.len
    }

    fn lock(&mut self) -> &mut [u8] {
        self.locks += 1;
        &mut self.map[..self.len]
    }

    fn unlock(&mut self) {
        debug_assert!(self.locks > 0, "unlock without lock");
        self.locks = self.locks.saturating_sub(1);
    }

    fn native_handle(&self) -> u64 {
        self.map.as_ptr() as u64
    }

    fn clone_buffer(&self) -> io::Result<Box<dyn NativeBuffer>> {
        let mut copy = DeviceBuffer::new(self.len)?;
        copy.map[..self.len].copy_from_slice(&self.map[..self.len]);
        Ok(Box::new(copy))
    }

    fn shrink(&mut self, len: usize) -> io::Result<()> {
        if len >= self.len {
            return Ok(());
        }
        let mut smaller = MmapMut::map_anon(len.max(1))?;
        smaller[..len].copy_from_slice(&self.map[..len]);
        self.map = smaller;
        self.len = len;
        Ok(())
    }
}
