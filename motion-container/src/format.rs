//! On-disk layout
//!
//! ```text
//! Header        { ident[7] = "MOTION ", version: u8 }
//! Item          { type: u8, size: u32, payload[size] }   METADATA: global
//! Item, Item    BUFFER + METADATA per frame
//! ItemOffset[]  { offset: i64, timestamp: i64 }          written on commit
//! Index         { magic: u32, count: u32 }
//! ```
//!
//! All integers are little-endian and structs carry no padding.

use std::io::{Read, Write};

use bytemuck::{Pod, Zeroable};
use motion_buffer::CameraDescription;
use serde_json::{Map, Value};

use crate::error::{ContainerError, ContainerResult};

pub const CONTAINER_IDENT: [u8; 7] = *b"MOTION ";
pub const CONTAINER_VERSION: u8 = 1;
pub const INDEX_MAGIC: u32 = 0x3488_4CED;

/// Kind of record stored in an item
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Buffer = 0,
    Metadata = 1,
}

impl ItemType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ItemType::Buffer),
            1 => Some(ItemType::Metadata),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Header {
    ident: [u8; 7],
    version: u8,
}

impl Header {
    pub fn current() -> Self {
        Self {
            ident: CONTAINER_IDENT,
            version: CONTAINER_VERSION,
        }
    }

    pub fn validate(&self) -> ContainerResult<()> {
        if self.ident != CONTAINER_IDENT {
            return Err(ContainerError::InvalidHeader);
        }
        if self.version != CONTAINER_VERSION {
            return Err(ContainerError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ItemHeader {
    kind: u8,
    size: u32,
}

impl ItemHeader {
    pub fn new(kind: ItemType, size: u32) -> Self {
        Self {
            kind: kind as u8,
            size: size.to_le(),
        }
    }

    pub fn kind(&self) -> Option<ItemType> {
        ItemType::from_u8(self.kind)
    }

    pub fn size(&self) -> u32 {
        u32::from_le(self.size)
    }
}

/// Index entry locating one frame's BUFFER item
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ItemOffset {
    offset: i64,
    timestamp: i64,
}

impl ItemOffset {
    pub fn new(offset: u64, timestamp: i64) -> Self {
        Self {
            offset: (offset as i64).to_le(),
            timestamp: timestamp.to_le(),
        }
    }

    /// Stored as signed; a negative value only appears in a damaged file
    pub fn offset(&self) -> i64 {
        i64::from_le(self.offset)
    }

    pub fn timestamp(&self) -> i64 {
        i64::from_le(self.timestamp)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Index {
    magic: u32,
    count: u32,
}

impl Index {
    pub fn new(count: u32) -> Self {
        Self {
            magic: INDEX_MAGIC.to_le(),
            count: count.to_le(),
        }
    }

    pub fn is_valid(&self) -> bool {
        u32::from_le(self.magic) == INDEX_MAGIC
    }

    pub fn count(&self) -> u32 {
        u32::from_le(self.count)
    }
}

pub const HEADER_SIZE: u64 = std::mem::size_of::<Header>() as u64;
pub const ITEM_HEADER_SIZE: u64 = std::mem::size_of::<ItemHeader>() as u64;
pub const ITEM_OFFSET_SIZE: u64 = std::mem::size_of::<ItemOffset>() as u64;
pub const INDEX_SIZE: u64 = std::mem::size_of::<Index>() as u64;

const _: () = assert!(HEADER_SIZE == 8);
const _: () = assert!(ITEM_HEADER_SIZE == 5);
const _: () = assert!(ITEM_OFFSET_SIZE == 16);
const _: () = assert!(INDEX_SIZE == 8);

pub fn read_pod<T: Pod, R: Read>(reader: &mut R) -> std::io::Result<T> {
    let mut value = T::zeroed();
    reader.read_exact(bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

/// Write one item, returning the number of bytes written
pub fn write_item<W: Write>(writer: &mut W, kind: ItemType, payload: &[u8]) -> ContainerResult<u64> {
    let size = u32::try_from(payload.len()).map_err(|_| ContainerError::ItemTooLarge(payload.len()))?;
    writer.write_all(bytemuck::bytes_of(&ItemHeader::new(kind, size)))?;
    writer.write_all(payload)?;
    Ok(ITEM_HEADER_SIZE + payload.len() as u64)
}

/// Global metadata as stored in the leading METADATA item
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMetadata {
    pub camera: CameraDescription,
    pub num_segments: u32,
    pub extra: Value,
}

impl GlobalMetadata {
    pub fn to_json(&self) -> ContainerResult<Vec<u8>> {
        let mut object = match serde_json::to_value(&self.camera)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("numSegments".to_string(), Value::from(self.num_segments));
        object.insert("extraData".to_string(), self.extra.clone());
        Ok(serde_json::to_vec(&Value::Object(object))?)
    }

    pub fn from_json(bytes: &[u8]) -> ContainerResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let num_segments = match value.get("numSegments") {
            Some(segments) => serde_json::from_value::<u32>(segments.clone())?,
            None => 1,
        };
        let extra = value.get("extraData").cloned().unwrap_or(Value::Null);
        let camera = serde_json::from_value(value)?;
        Ok(Self {
            camera,
            num_segments,
            extra,
        })
    }
}
