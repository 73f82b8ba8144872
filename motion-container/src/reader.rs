//! Container reader and crash recovery

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use motion_buffer::{
    CameraDescription, CompressionType, FrameMetadata, HostBuffer, RawImageBuffer,
};
use motion_codec::decompress;
use serde_json::Value;

use crate::error::{ContainerError, ContainerResult};
use crate::format::{
    read_pod, GlobalMetadata, Header, Index, ItemHeader, ItemOffset, ItemType, HEADER_SIZE,
    INDEX_SIZE, ITEM_HEADER_SIZE, ITEM_OFFSET_SIZE,
};
use crate::{frame_name, ContainerState};

#[derive(Debug, Clone)]
struct FrameEntry {
    name: String,
    timestamp: i64,
    offset: u64,
}

/// Location of one frame's payload and metadata inside the file
struct ItemPair {
    payload_offset: u64,
    payload_len: u64,
    metadata_offset: u64,
    metadata_len: u64,
}

impl ItemPair {
    fn end(&self) -> u64 {
        self.metadata_offset + self.metadata_len
    }
}

pub struct ContainerReader {
    file: File,
    file_len: u64,
    state: ContainerState,
    global: GlobalMetadata,
    frames_start: u64,
    entries: Vec<FrameEntry>,
}

impl ContainerReader {
    pub fn open(path: impl AsRef<Path>) -> ContainerResult<Self> {
        Self::open_file(File::open(path)?)
    }

    /// Open a container.
    ///
    /// A bad header or global metadata is an error. A missing or damaged
    /// index is not: the reader comes back [`ContainerState::Corrupted`].
    pub fn open_file(mut file: File) -> ContainerResult<Self> {
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let header: Header = read_pod(&mut file).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ContainerError::InvalidHeader,
            _ => ContainerError::Io(e),
        })?;
        header.validate()?;

        let item: ItemHeader = read_pod(&mut file)?;
        if item.kind() != Some(ItemType::Metadata) {
            return Err(ContainerError::CorruptItem {
                offset: HEADER_SIZE,
                reason: "expected global metadata".to_string(),
            });
        }
        let frames_start = HEADER_SIZE + ITEM_HEADER_SIZE + item.size() as u64;
        if frames_start > file_len {
            return Err(ContainerError::CorruptItem {
                offset: HEADER_SIZE,
                reason: "global metadata truncated".to_string(),
            });
        }
        let mut json = vec![0u8; item.size() as usize];
        file.read_exact(&mut json)?;
        let global = GlobalMetadata::from_json(&json)?;

        let mut reader = Self {
            file,
            file_len,
            state: ContainerState::Corrupted,
            global,
            frames_start,
            entries: Vec::new(),
        };

        match reader.read_index()? {
            Some(entries) => {
                reader.entries = entries;
                reader.state = ContainerState::Read;
            }
            None => log::warn!("Container index missing or invalid; recovery required"),
        }
        Ok(reader)
    }

    /// Index entries, or `None` when the trailer does not describe this file
    fn read_index(&mut self) -> ContainerResult<Option<Vec<FrameEntry>>> {
        if self.file_len < self.frames_start + INDEX_SIZE {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(self.file_len - INDEX_SIZE))?;
        let index: Index = read_pod(&mut self.file)?;
        if !index.is_valid() {
            return Ok(None);
        }

        let table_len = index.count() as u64 * ITEM_OFFSET_SIZE;
        let table_end = self.file_len - INDEX_SIZE;
        if table_len > table_end - self.frames_start {
            return Ok(None);
        }
        let table_start = table_end - table_len;

        self.file.seek(SeekFrom::Start(table_start))?;
        let mut table = vec![ItemOffset::new(0, 0); index.count() as usize];
        self.file.read_exact(bytemuck::cast_slice_mut(&mut table))?;

        let mut entries = Vec::with_capacity(table.len());
        for entry in &table {
            let Ok(offset) = u64::try_from(entry.offset()) else {
                return Ok(None);
            };
            let in_range = offset
                .checked_add(2 * ITEM_HEADER_SIZE)
                .is_some_and(|end| end <= table_start);
            if offset < self.frames_start || !in_range {
                return Ok(None);
            }
            entries.push(FrameEntry {
                name: frame_name(entry.timestamp()),
                timestamp: entry.timestamp(),
                offset,
            });
        }
        Ok(Some(entries))
    }

    /// Rebuild the frame list by scanning items from the first frame.
    ///
    /// Stops at the first truncated or malformed pair; every complete frame
    /// before it is kept.
    pub fn recover(&mut self) -> ContainerResult<usize> {
        if self.state != ContainerState::Corrupted {
            return Err(ContainerError::InvalidState {
                operation: "recover",
                state: self.state,
            });
        }

        let mut entries = Vec::new();
        let mut offset = self.frames_start;
        while offset < self.file_len {
            let pair = match self.locate(offset, self.file_len) {
                Ok(pair) => pair,
                Err(e) => {
                    log::debug!("Recovery stopped at offset {}: {}", offset, e);
                    break;
                }
            };
            let metadata = match self.read_metadata(&pair) {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::debug!("Recovery stopped at offset {}: {}", offset, e);
                    break;
                }
            };
            entries.push(FrameEntry {
                name: frame_name(metadata.timestamp),
                timestamp: metadata.timestamp,
                offset,
            });
            offset = pair.end();
        }

        log::info!("Recovered {} frames", entries.len());
        self.entries = entries;
        self.state = ContainerState::Read;
        Ok(self.entries.len())
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn camera_metadata(&self) -> &CameraDescription {
        &self.global.camera
    }

    pub fn extra_metadata(&self) -> &Value {
        &self.global.extra
    }

    pub fn num_segments(&self) -> u32 {
        self.global.num_segments
    }

    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    /// Frame names in stored (arrival) order
    pub fn frames(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Frame names in capture order
    pub fn frames_by_timestamp(&self) -> Vec<String> {
        let mut entries: Vec<&FrameEntry> = self.entries.iter().collect();
        entries.sort_by_key(|entry| entry.timestamp);
        entries.into_iter().map(|entry| entry.name.clone()).collect()
    }

    /// Metadata of one frame without reading its pixels
    pub fn frame(&self, name: &str) -> ContainerResult<FrameMetadata> {
        let pair = self.locate(self.entry(name)?.offset, self.file_len)?;
        self.read_metadata(&pair)
    }

    /// Read and decode one frame into a new host buffer
    pub fn load_frame(&self, name: &str) -> ContainerResult<RawImageBuffer> {
        let pair = self.locate(self.entry(name)?.offset, self.file_len)?;
        let mut metadata = self.read_metadata(&pair)?;

        let mut payload = vec![0u8; pair.payload_len as usize];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pair.payload_offset))?;
        file.read_exact(&mut payload)?;

        let data = if metadata.is_compressed {
            let layout = metadata.layout();
            let expected = match metadata.uncompressed_size {
                0 => layout.min_len(),
                size => size as usize,
            };
            decompress(metadata.compression_type, &payload, &layout, expected)?
        } else {
            payload
        };

        metadata.is_compressed = false;
        metadata.compression_type = CompressionType::Uncompressed;
        metadata.uncompressed_size = data.len() as u64;

        let len = data.len();
        let mut buffer = RawImageBuffer::new(Box::new(HostBuffer::from_vec(data)));
        buffer.set_valid_range(0, len)?;
        buffer.metadata = metadata;
        Ok(buffer)
    }

    /// Hide a frame from this reader. The file is not modified.
    pub fn remove_frame(&mut self, name: &str) -> ContainerResult<()> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| ContainerError::FrameNotFound(name.to_string()))?;
        self.entries.remove(pos);
        Ok(())
    }

    fn entry(&self, name: &str) -> ContainerResult<&FrameEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| ContainerError::FrameNotFound(name.to_string()))
    }

    /// Validate the BUFFER + METADATA headers starting at `offset`
    fn locate(&self, offset: u64, limit: u64) -> ContainerResult<ItemPair> {
        let mut file = &self.file;
        let truncated = |reason: &str| ContainerError::CorruptItem {
            offset,
            reason: reason.to_string(),
        };
        let past_limit = |start: u64, len: u64| start.checked_add(len).map_or(true, |end| end > limit);

        if past_limit(offset, ITEM_HEADER_SIZE) {
            return Err(truncated("buffer header truncated"));
        }
        file.seek(SeekFrom::Start(offset))?;
        let buffer: ItemHeader = read_pod(&mut file)?;
        if buffer.kind() != Some(ItemType::Buffer) {
            return Err(truncated("expected buffer item"));
        }

        let payload_offset = offset + ITEM_HEADER_SIZE;
        let payload_len = buffer.size() as u64;
        if past_limit(payload_offset, payload_len) {
            return Err(truncated("buffer payload truncated"));
        }
        let metadata_header = payload_offset + payload_len;
        if past_limit(metadata_header, ITEM_HEADER_SIZE) {
            return Err(truncated("buffer payload truncated"));
        }
        file.seek(SeekFrom::Start(metadata_header))?;
        let metadata: ItemHeader = read_pod(&mut file)?;
        if metadata.kind() != Some(ItemType::Metadata) {
            return Err(truncated("expected metadata item"));
        }

        let metadata_offset = metadata_header + ITEM_HEADER_SIZE;
        let metadata_len = metadata.size() as u64;
        if past_limit(metadata_offset, metadata_len) {
            return Err(truncated("metadata truncated"));
        }
        let pair = ItemPair {
            payload_offset,
            payload_len,
            metadata_offset,
            metadata_len,
        };
        Ok(pair)
    }

    fn read_metadata(&self, pair: &ItemPair) -> ContainerResult<FrameMetadata> {
        let mut file = &self.file;
        let mut json = vec![0u8; pair.metadata_len as usize];
        file.seek(SeekFrom::Start(pair.metadata_offset))?;
        file.read_exact(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ContainerWriter;
    use motion_buffer::PixelFormat;
    use std::io::Write;

    fn write_frames(path: &Path, timestamps: &[i64]) {
        let mut writer =
            ContainerWriter::create(path, &CameraDescription::default(), 2, Value::Null).unwrap();
        for &timestamp in timestamps {
            let mut buffer = RawImageBuffer::host(10);
            let metadata = FrameMetadata {
                timestamp,
                width: 8,
                height: 1,
                pixel_format: PixelFormat::Raw10,
                ..Default::default()
            };
            buffer.fill(&[timestamp as u8; 10], metadata).unwrap();
            writer.add(&mut buffer, true).unwrap();
        }
        writer.commit().unwrap();
    }

    #[test]
    fn test_open_reads_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mcraw");
        write_frames(&path, &[30, 10, 20]);

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.state(), ContainerState::Read);
        assert_eq!(reader.num_segments(), 2);
        assert_eq!(reader.frames(), vec!["30", "10", "20"]);
        assert_eq!(reader.frames_by_timestamp(), vec!["10", "20", "30"]);

        let frame = reader.load_frame("20").unwrap();
        assert_eq!(frame.timestamp(), 20);
        assert_eq!(frame.valid_len(), 10);
    }

    #[test]
    fn test_bad_magic_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.mcraw");
        write_frames(&path, &[1, 2]);

        let mut bytes = std::fs::read(&path).unwrap();
        let tail = bytes.len() - INDEX_SIZE as usize;
        bytes[tail] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.state(), ContainerState::Corrupted);
        assert!(reader.frames().is_empty());

        assert_eq!(reader.recover().unwrap(), 2);
        assert_eq!(reader.state(), ContainerState::Read);
        assert_eq!(reader.frames(), vec!["1", "2"]);
        assert!(reader.recover().is_err());
    }

    #[test]
    fn test_index_count_larger_than_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.mcraw");
        write_frames(&path, &[1]);

        let mut bytes = std::fs::read(&path).unwrap();
        let count = bytes.len() - 4;
        bytes[count..].copy_from_slice(&1000u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.state(), ContainerState::Corrupted);
    }

    #[test]
    fn test_out_of_range_index_offset_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.mcraw");
        write_frames(&path, &[5]);
        let pristine = std::fs::read(&path).unwrap();
        let entry = pristine.len() - INDEX_SIZE as usize - ITEM_OFFSET_SIZE as usize;

        for bad in [-1i64, i64::MIN, i64::MAX, i64::MAX - 2] {
            let mut bytes = pristine.clone();
            bytes[entry..entry + 8].copy_from_slice(&bad.to_le_bytes());
            std::fs::write(&path, &bytes).unwrap();

            let mut reader = ContainerReader::open(&path).unwrap();
            assert_eq!(reader.state(), ContainerState::Corrupted, "offset {bad}");
            assert_eq!(reader.recover().unwrap(), 1);
            assert_eq!(reader.frames(), vec!["5"]);
        }
    }

    #[test]
    fn test_bad_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.mcraw");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"NOTMOTION").unwrap();
        drop(file);
        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::InvalidHeader)
        ));

        std::fs::write(&path, b"MOT").unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::InvalidHeader)
        ));

        std::fs::write(&path, b"MOTION \x07").unwrap();
        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_missing_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.mcraw");
        write_frames(&path, &[1]);

        let mut reader = ContainerReader::open(&path).unwrap();
        assert!(matches!(
            reader.frame("2"),
            Err(ContainerError::FrameNotFound(_))
        ));
        reader.remove_frame("1").unwrap();
        assert_eq!(reader.frame_count(), 0);
    }
}
