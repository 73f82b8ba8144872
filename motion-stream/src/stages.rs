//! Worker loops for the process, compress and IO stages

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use motion_buffer::{BufferPool, RawImageBuffer};
use motion_codec::{bin_in_place, compress, crop_in_place, crop_region, CompressionType, TransformResult};
use motion_container::ContainerWriter;

use crate::error::StreamResult;
use crate::priority::set_current_thread_priority;

pub(crate) type Frame = Box<RawImageBuffer>;

/// Counters shared by the pipeline and its workers
#[derive(Default)]
pub(crate) struct Counters {
    pub accepted_frames: AtomicU64,
    pub written_frames: AtomicU64,
    pub written_bytes: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub compressed_frames: AtomicU64,
    pub active_io_workers: AtomicUsize,
}

/// Geometry changes applied by the process stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Transform {
    /// Percent removed per axis (horizontal, vertical)
    pub crop: Option<(u32, u32)>,
    pub bin: bool,
    /// Used when a frame carries no dynamic white level
    pub white_level: f32,
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && !self.bin
    }
}

fn white_level(buffer: &RawImageBuffer, fallback: f32) -> f32 {
    if buffer.metadata.dynamic_white_level > 0.0 {
        buffer.metadata.dynamic_white_level
    } else {
        fallback
    }
}

fn adopt(buffer: &mut RawImageBuffer, result: &TransformResult) -> StreamResult<()> {
    let start = buffer.valid_range().start;
    buffer.set_valid_range(start, start + result.len())?;
    buffer.metadata.apply_transform(&result.layout, result.level_scale);
    Ok(())
}

/// Crop and/or bin a frame in place
pub(crate) fn transform_frame(buffer: &mut RawImageBuffer, transform: &Transform) -> StreamResult<()> {
    if let Some((horizontal, vertical)) = transform.crop {
        let layout = buffer.layout();
        let region = crop_region(layout.width, layout.height, horizontal, vertical)?;
        let white = white_level(buffer, transform.white_level);
        let result = buffer.with_valid_data(|data| crop_in_place(data, &layout, &region, white))?;
        adopt(buffer, &result)?;
    }

    if transform.bin {
        let layout = buffer.layout();
        let white = white_level(buffer, transform.white_level);
        let result = buffer.with_valid_data(|data| bin_in_place(data, &layout, white))?;
        adopt(buffer, &result)?;
        buffer.metadata.is_binned = true;
    }
    Ok(())
}

/// Compress the valid range, keeping the result only if it is smaller.
///
/// Returns whether the frame was replaced by its compressed form.
pub(crate) fn compress_frame(buffer: &mut RawImageBuffer, ty: CompressionType) -> StreamResult<bool> {
    if ty == CompressionType::Uncompressed || buffer.metadata.is_compressed {
        return Ok(false);
    }

    let layout = buffer.layout();
    let original_len = buffer.valid_len();
    let payload = buffer.with_valid_data(|data| compress(ty, data, &layout))?;
    if payload.len() >= original_len {
        return Ok(false);
    }

    let start = buffer.valid_range().start;
    buffer.with_valid_data(|data| data[..payload.len()].copy_from_slice(&payload));
    buffer.set_valid_range(start, start + payload.len())?;
    buffer.metadata.is_compressed = true;
    buffer.metadata.compression_type = ty;
    buffer.metadata.uncompressed_size = original_len as u64;
    Ok(true)
}

pub(crate) fn process_worker(
    index: usize,
    unprocessed: Receiver<Frame>,
    ready: Sender<Frame>,
    pool: Arc<BufferPool>,
    counters: Arc<Counters>,
    transform: Transform,
    timeout: Duration,
) {
    loop {
        let mut buffer = match unprocessed.recv_timeout(timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => continue,
            // Sender dropped by stop() and queue drained
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if !transform.is_identity() {
            if let Err(e) = transform_frame(&mut buffer, &transform) {
                log::error!("Failed to process frame {}: {}", buffer.timestamp(), e);
                counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                pool.discard_buffer(buffer);
                continue;
            }
        }

        if let Err(e) = ready.send(buffer) {
            pool.discard_buffer(e.into_inner());
        }
    }

    log::info!("Process worker {} exiting", index);
}

pub(crate) fn compress_worker(
    index: usize,
    ready: Receiver<Frame>,
    compressed: Sender<Frame>,
    pool: Arc<BufferPool>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    compression: CompressionType,
    timeout: Duration,
) {
    while running.load(Ordering::Acquire) {
        let mut buffer = match ready.recv_timeout(timeout) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match compress_frame(&mut buffer, compression) {
            Ok(true) => {
                counters.compressed_frames.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => log::warn!("Failed to compress frame {}: {}", buffer.timestamp(), e),
        }

        if let Err(e) = compressed.send(buffer) {
            pool.discard_buffer(e.into_inner());
        }
    }

    log::info!("Compress worker {} exiting", index);
}

enum Next {
    Frame(Frame),
    Idle,
    Finished,
}

/// Prefer compressed frames; fall back to uncompressed ones so IO never
/// waits on a slow compressor.
fn next_frame(compressed: &Receiver<Frame>, ready: &Receiver<Frame>, timeout: Duration) -> Next {
    let compressed_done = match compressed.try_recv() {
        Ok(buffer) => return Next::Frame(buffer),
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Disconnected) => true,
    };

    match ready.recv_timeout(timeout) {
        Ok(buffer) => Next::Frame(buffer),
        Err(RecvTimeoutError::Timeout) => Next::Idle,
        Err(RecvTimeoutError::Disconnected) if compressed_done => Next::Finished,
        Err(RecvTimeoutError::Disconnected) => match compressed.recv_timeout(timeout) {
            Ok(buffer) => Next::Frame(buffer),
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Finished,
        },
    }
}

pub(crate) struct IoWorker {
    pub segment: usize,
    pub writer: ContainerWriter,
    pub compressed: Receiver<Frame>,
    pub ready: Receiver<Frame>,
    pub pool: Arc<BufferPool>,
    pub counters: Arc<Counters>,
    pub timeout: Duration,
    pub priority: i32,
}

impl IoWorker {
    pub fn run(mut self) {
        set_current_thread_priority(self.priority);
        let mut reported = 0;

        loop {
            let mut buffer = match next_frame(&self.compressed, &self.ready, self.timeout) {
                Next::Frame(buffer) => buffer,
                Next::Idle => continue,
                Next::Finished => break,
            };

            let result = self.writer.add(&mut buffer, true);
            self.pool.discard_buffer(buffer);

            match result {
                Ok(()) => {
                    self.counters.written_frames.fetch_add(1, Ordering::Relaxed);
                    reported = self.report_bytes(reported);
                }
                Err(e) => {
                    log::error!("Segment {} write failed, stopping its IO worker: {}", self.segment, e);
                    self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    self.counters.active_io_workers.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            }
        }

        match self.writer.commit() {
            Ok(()) => {
                self.report_bytes(reported);
            }
            Err(e) => log::error!("Failed to commit segment {}: {}", self.segment, e),
        }
        self.counters.active_io_workers.fetch_sub(1, Ordering::AcqRel);
        log::info!("IO worker for segment {} exiting", self.segment);
    }

    fn report_bytes(&self, reported: u64) -> u64 {
        let total = self.writer.written_bytes();
        self.counters
            .written_bytes
            .fetch_add(total - reported, Ordering::Relaxed);
        total
    }
}
