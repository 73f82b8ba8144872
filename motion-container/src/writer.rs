//! Container writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use motion_buffer::{CameraDescription, RawImageBuffer};
use serde_json::Value;

use crate::error::{ContainerError, ContainerResult};
use crate::format::{write_item, GlobalMetadata, Header, Index, ItemOffset, ItemType, HEADER_SIZE};
use crate::{frame_name, ContainerState};

/// A frame held back until commit
struct PendingFrame {
    name: String,
    timestamp: i64,
    payload: Vec<u8>,
    metadata: Vec<u8>,
}

/// Append-only writer for one container.
///
/// Frames added with `flush = true` go straight to disk and survive a crash
/// (recoverable without the index). Frames added with `flush = false` are
/// copied and written on commit.
pub struct ContainerWriter {
    sink: Option<BufWriter<File>>,
    global: Vec<u8>,
    state: ContainerState,
    position: u64,
    offsets: Vec<ItemOffset>,
    pending: Vec<PendingFrame>,
}

impl ContainerWriter {
    pub fn create(
        path: impl AsRef<Path>,
        camera: &CameraDescription,
        num_segments: u32,
        extra: Value,
    ) -> ContainerResult<Self> {
        let file = File::create(path.as_ref())?;
        log::debug!("Creating container {}", path.as_ref().display());
        Self::create_from_file(file, camera, num_segments, extra)
    }

    /// Write into an already opened file at its current position
    pub fn create_from_file(
        file: File,
        camera: &CameraDescription,
        num_segments: u32,
        extra: Value,
    ) -> ContainerResult<Self> {
        let mut writer = Self::create_in_memory(camera, num_segments, extra)?;
        let mut sink = BufWriter::new(file);
        // Reaches the disk with the first flushed frame or on commit
        writer.position = write_preamble(&mut sink, &writer.global)?;
        writer.sink = Some(sink);
        Ok(writer)
    }

    /// Collect frames in memory; the file is produced by [`Self::commit_to`]
    pub fn create_in_memory(
        camera: &CameraDescription,
        num_segments: u32,
        extra: Value,
    ) -> ContainerResult<Self> {
        let global = GlobalMetadata {
            camera: camera.clone(),
            num_segments,
            extra,
        }
        .to_json()?;

        Ok(Self {
            sink: None,
            global,
            state: ContainerState::Create,
            position: 0,
            offsets: Vec::new(),
            pending: Vec::new(),
        })
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Frames written plus frames pending
    pub fn frame_count(&self) -> usize {
        self.offsets.len() + self.pending.len()
    }

    /// Bytes written to the backing file so far
    pub fn written_bytes(&self) -> u64 {
        self.position
    }

    pub fn add(&mut self, buffer: &mut RawImageBuffer, flush: bool) -> ContainerResult<()> {
        self.ensure_state("add")?;

        let mut metadata = buffer.metadata.clone();
        if !metadata.is_compressed {
            metadata.uncompressed_size = buffer.valid_len() as u64;
        }
        let metadata = serde_json::to_vec(&metadata)?;
        let timestamp = buffer.timestamp();

        if flush {
            let sink = self.sink.as_mut().ok_or(ContainerError::NotBacked)?;
            let offset = self.position;
            let mut written = buffer.with_valid_data(|data| write_item(sink, ItemType::Buffer, data))?;
            written += write_item(sink, ItemType::Metadata, &metadata)?;
            sink.flush()?;

            self.position += written;
            self.offsets.push(ItemOffset::new(offset, timestamp));
            return Ok(());
        }

        let name = frame_name(timestamp);
        let frame = PendingFrame {
            name: name.clone(),
            timestamp,
            payload: buffer.copy_valid_data(),
            metadata,
        };
        match self.pending.iter_mut().find(|pending| pending.name == name) {
            Some(existing) => *existing = frame,
            None => self.pending.push(frame),
        }
        Ok(())
    }

    /// Drop a frame from the container.
    ///
    /// Pending frames are discarded outright. Flushed frames only leave the
    /// index; their bytes stay in the file.
    pub fn remove_frame(&mut self, name: &str) -> ContainerResult<()> {
        self.ensure_state("remove frame")?;

        if let Some(pos) = self.pending.iter().position(|frame| frame.name == name) {
            self.pending.remove(pos);
            return Ok(());
        }
        if let Some(pos) = self
            .offsets
            .iter()
            .position(|entry| frame_name(entry.timestamp()) == name)
        {
            self.offsets.remove(pos);
            return Ok(());
        }
        Err(ContainerError::FrameNotFound(name.to_string()))
    }

    /// Write pending frames and the index, closing the container
    pub fn commit(&mut self) -> ContainerResult<()> {
        self.ensure_state("commit")?;
        let mut sink = self.sink.take().ok_or(ContainerError::NotBacked)?;
        let result = self.finish(&mut sink);
        self.state = ContainerState::Closed;
        result
    }

    /// Write an in-memory container to `path`
    pub fn commit_to(&mut self, path: impl AsRef<Path>) -> ContainerResult<()> {
        self.ensure_state("commit to a path")?;
        if self.sink.is_some() {
            return Err(ContainerError::InvalidState {
                operation: "commit a file-backed container to a path",
                state: self.state,
            });
        }

        let mut sink = BufWriter::new(File::create(path.as_ref())?);
        self.position = write_preamble(&mut sink, &self.global)?;
        let result = self.finish(&mut sink);
        self.state = ContainerState::Closed;
        log::debug!(
            "Committed {} frames to {}",
            self.offsets.len(),
            path.as_ref().display()
        );
        result
    }

    fn finish(&mut self, sink: &mut BufWriter<File>) -> ContainerResult<()> {
        for frame in std::mem::take(&mut self.pending) {
            let offset = self.position;
            self.position += write_item(sink, ItemType::Buffer, &frame.payload)?;
            self.position += write_item(sink, ItemType::Metadata, &frame.metadata)?;
            self.offsets.push(ItemOffset::new(offset, frame.timestamp));
        }

        let count = u32::try_from(self.offsets.len())
            .map_err(|_| ContainerError::ItemTooLarge(self.offsets.len()))?;
        sink.write_all(bytemuck::cast_slice(&self.offsets))?;
        sink.write_all(bytemuck::bytes_of(&Index::new(count)))?;
        self.position += (self.offsets.len() * std::mem::size_of::<ItemOffset>()
            + std::mem::size_of::<Index>()) as u64;

        sink.flush()?;
        sink.get_ref().sync_all()?;
        Ok(())
    }

    fn ensure_state(&self, operation: &'static str) -> ContainerResult<()> {
        if self.state != ContainerState::Create {
            return Err(ContainerError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.state != ContainerState::Create {
            return;
        }
        if self.sink.is_some() {
            if let Err(e) = self.commit() {
                log::error!("Failed to commit container on drop: {}", e);
            }
        } else if !self.pending.is_empty() {
            log::warn!(
                "In-memory container dropped with {} uncommitted frames",
                self.pending.len()
            );
        }
    }
}

fn write_preamble(sink: &mut impl Write, global: &[u8]) -> ContainerResult<u64> {
    sink.write_all(bytemuck::bytes_of(&Header::current()))?;
    Ok(HEADER_SIZE + write_item(sink, ItemType::Metadata, global)?)
}
