use std::fs::OpenOptions;
use std::path::Path;

use motion_buffer::{CameraDescription, FrameMetadata, PixelFormat, RawImageBuffer};
use motion_codec::{compress, CompressionType, FrameLayout};
use motion_container::{ContainerError, ContainerReader, ContainerState, ContainerWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 16;

fn random_frame(rng: &mut StdRng, timestamp: i64) -> (Vec<u8>, FrameMetadata) {
    let layout = FrameLayout::tight(PixelFormat::Raw10, WIDTH, HEIGHT);
    let samples: Vec<u16> = (0..layout.pixel_count())
        .map(|_| rng.gen_range(60..200))
        .collect();
    let bytes = motion_codec::pack(&layout, &samples).unwrap();
    let metadata = FrameMetadata {
        timestamp,
        width: WIDTH,
        height: HEIGHT,
        row_stride: layout.row_stride,
        pixel_format: PixelFormat::Raw10,
        iso: 100,
        exposure_time: 10_000_000,
        dynamic_white_level: 1023.0,
        ..Default::default()
    };
    (bytes, metadata)
}

/// Fill a buffer, compressing it the way the streaming pipeline does
fn make_buffer(bytes: &[u8], metadata: &FrameMetadata, ty: CompressionType) -> RawImageBuffer {
    let mut buffer = RawImageBuffer::host(bytes.len() * 2);
    let mut metadata = metadata.clone();
    if ty != CompressionType::Uncompressed {
        let payload = compress(ty, bytes, &metadata.layout()).unwrap();
        metadata.is_compressed = true;
        metadata.compression_type = ty;
        metadata.uncompressed_size = bytes.len() as u64;
        buffer.fill(&payload, metadata).unwrap();
    } else {
        buffer.fill(bytes, metadata).unwrap();
    }
    buffer
}

fn write_container(
    path: &Path,
    frames: &[(Vec<u8>, FrameMetadata)],
    ty: CompressionType,
    flush: bool,
) {
    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(path, &camera, 1, json!({ "device": "test" })).unwrap();
    for (bytes, metadata) in frames {
        let mut buffer = make_buffer(bytes, metadata, ty);
        writer.add(&mut buffer, flush).unwrap();
    }
    writer.commit().unwrap();
}

fn frames(count: usize, seed: u64) -> Vec<(Vec<u8>, FrameMetadata)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| random_frame(&mut rng, 1_000_000 + i as i64 * 33_333_333))
        .collect()
}

#[test]
fn test_round_trip_every_codec() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(4, 1);

    for ty in [
        CompressionType::Uncompressed,
        CompressionType::Zstd,
        CompressionType::BitPack,
        CompressionType::DeltaBitPack,
        CompressionType::BitPlane,
    ] {
        for flush in [true, false] {
            let path = dir.path().join(format!("{ty:?}-{flush}.mcraw"));
            write_container(&path, &originals, ty, flush);

            let reader = ContainerReader::open(&path).unwrap();
            assert_eq!(reader.state(), ContainerState::Read);
            assert_eq!(reader.frame_count(), originals.len());
            assert_eq!(reader.extra_metadata()["device"], json!("test"));

            for (bytes, metadata) in &originals {
                let name = metadata.timestamp.to_string();
                let stored = reader.frame(&name).unwrap();
                assert_eq!(stored.compression_type, ty);
                assert_eq!(stored.iso, 100);

                let mut loaded = reader.load_frame(&name).unwrap();
                assert_eq!(&loaded.copy_valid_data(), bytes, "{ty:?} flush={flush}");
                assert!(!loaded.metadata.is_compressed);
            }
        }
    }
}

#[test]
fn test_crash_recovery_keeps_complete_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(6, 2);
    let path = dir.path().join("crash.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();
    let mut ends = Vec::new();
    for (bytes, metadata) in &originals {
        let mut buffer = make_buffer(bytes, metadata, CompressionType::Zstd);
        writer.add(&mut buffer, true).unwrap();
        ends.push(writer.written_bytes());
    }

    // Simulate power loss mid-way through the fifth frame
    let cut = ends[3] + (ends[4] - ends[3]) / 2;
    std::mem::forget(writer);
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(cut)
        .unwrap();

    let mut reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.state(), ContainerState::Corrupted);
    assert_eq!(reader.recover().unwrap(), 4);

    let expected: Vec<String> = originals[..4]
        .iter()
        .map(|(_, metadata)| metadata.timestamp.to_string())
        .collect();
    assert_eq!(reader.frames(), expected);

    for (bytes, metadata) in &originals[..4] {
        let mut loaded = reader.load_frame(&metadata.timestamp.to_string()).unwrap();
        assert_eq!(&loaded.copy_valid_data(), bytes);
    }
}

#[test]
fn test_recovery_of_unindexed_complete_file() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(3, 3);
    let path = dir.path().join("noindex.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();
    for (bytes, metadata) in &originals {
        writer
            .add(&mut make_buffer(bytes, metadata, CompressionType::Uncompressed), true)
            .unwrap();
    }
    std::mem::forget(writer);

    let mut reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.state(), ContainerState::Corrupted);
    assert_eq!(reader.recover().unwrap(), 3);
}

#[test]
fn test_removed_frame_is_not_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(3, 4);
    let path = dir.path().join("removed.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();
    for (i, (bytes, metadata)) in originals.iter().enumerate() {
        let mut buffer = make_buffer(bytes, metadata, CompressionType::Zstd);
        writer.add(&mut buffer, i % 2 == 0).unwrap();
    }
    let flushed = originals[0].1.timestamp.to_string();
    let pending = originals[1].1.timestamp.to_string();
    writer.remove_frame(&flushed).unwrap();
    writer.remove_frame(&pending).unwrap();
    writer.commit().unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.frames(), vec![originals[2].1.timestamp.to_string()]);
}

#[test]
fn test_decode_failure_is_isolated_to_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(2, 5);
    let path = dir.path().join("damaged.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();
    let first_offset = writer.written_bytes();
    for (bytes, metadata) in &originals {
        writer
            .add(&mut make_buffer(bytes, metadata, CompressionType::Zstd), true)
            .unwrap();
    }
    writer.commit().unwrap();

    // Scribble over the zstd frame header of the first payload
    let mut data = std::fs::read(&path).unwrap();
    let payload = first_offset as usize + 5;
    for byte in &mut data[payload..payload + 8] {
        *byte = 0xAA;
    }
    std::fs::write(&path, &data).unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    let first = originals[0].1.timestamp.to_string();
    let second = originals[1].1.timestamp.to_string();

    assert!(matches!(reader.load_frame(&first), Err(ContainerError::Codec(_))));
    let mut loaded = reader.load_frame(&second).unwrap();
    assert_eq!(loaded.copy_valid_data(), originals[1].0);
}

#[test]
fn test_implausible_frame_geometry_fails_only_that_frame() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(1, 8);
    let path = dir.path().join("geometry.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();

    let huge = FrameMetadata {
        timestamp: 7,
        width: 0x4000_0000,
        height: 0x4000_0000,
        pixel_format: PixelFormat::Raw16,
        is_compressed: true,
        compression_type: CompressionType::BitPack,
        ..Default::default()
    };
    let mut buffer = RawImageBuffer::host(16);
    buffer.fill(&[0u8; 16], huge.clone()).unwrap();
    writer.add(&mut buffer, true).unwrap();

    let oversized = FrameMetadata {
        timestamp: 8,
        compression_type: CompressionType::Zstd,
        uncompressed_size: u64::MAX / 2,
        ..huge
    };
    let mut buffer = RawImageBuffer::host(16);
    buffer.fill(&[0u8; 16], oversized).unwrap();
    writer.add(&mut buffer, true).unwrap();

    let (bytes, metadata) = &originals[0];
    writer
        .add(&mut make_buffer(bytes, metadata, CompressionType::DeltaBitPack), true)
        .unwrap();
    writer.commit().unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    assert!(matches!(reader.load_frame("7"), Err(ContainerError::Codec(_))));
    assert!(matches!(reader.load_frame("8"), Err(ContainerError::Codec(_))));
    let mut loaded = reader.load_frame(&metadata.timestamp.to_string()).unwrap();
    assert_eq!(loaded.copy_valid_data(), *bytes);
}

#[test]
fn test_in_memory_burst_committed_later() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(3, 6);
    let path = dir.path().join("burst.mcraw");

    let camera = CameraDescription {
        white_level: 4095.0,
        ..Default::default()
    };
    let mut writer = ContainerWriter::create_in_memory(&camera, 1, json!({ "hdr": true })).unwrap();
    for (bytes, metadata) in originals.iter().rev() {
        writer
            .add(&mut make_buffer(bytes, metadata, CompressionType::BitPlane), false)
            .unwrap();
    }
    writer.commit_to(&path).unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.camera_metadata().white_level, 4095.0);
    assert_eq!(reader.extra_metadata()["hdr"], json!(true));

    let mut names: Vec<String> = originals
        .iter()
        .map(|(_, metadata)| metadata.timestamp.to_string())
        .collect();
    assert_eq!(reader.frames_by_timestamp(), names);
    names.reverse();
    assert_eq!(reader.frames(), names);
}

#[test]
fn test_corrupt_frame_metadata_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let originals = frames(1, 7);
    let path = dir.path().join("json.mcraw");

    let camera = CameraDescription::default();
    let mut writer = ContainerWriter::create(&path, &camera, 1, json!(null)).unwrap();
    let offset = writer.written_bytes() as usize;
    let (bytes, metadata) = &originals[0];
    writer
        .add(&mut make_buffer(bytes, metadata, CompressionType::Uncompressed), true)
        .unwrap();
    writer.commit().unwrap();

    // BUFFER header, payload, METADATA header, then the JSON object
    let json = offset + 5 + bytes.len() + 5;
    let mut data = std::fs::read(&path).unwrap();
    assert_eq!(data[json], b'{');
    data[json] = b'!';
    std::fs::write(&path, &data).unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    let name = metadata.timestamp.to_string();
    assert!(matches!(reader.frame(&name), Err(ContainerError::Metadata(_))));
}
