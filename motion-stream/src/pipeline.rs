//! Streaming session: worker topology, lifecycle and statistics

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use motion_audio::{downmix_to_mono, write_wav_file, AudioConfig, AudioSource, DEFAULT_SAMPLE_RATE};
use motion_buffer::{BufferPool, CameraDescription};
use motion_codec::MAX_CROP_PERCENT;
use motion_container::ContainerWriter;
use parking_lot::Mutex;
use serde_json::json;

use crate::config::StreamingConfig;
use crate::error::{StreamError, StreamResult};
use crate::stages::{compress_worker, process_worker, Counters, Frame, IoWorker, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
    Stopped,
}

struct AudioTake {
    source: Box<dyn AudioSource>,
    output: File,
}

/// Channel ends the session keeps to return stranded buffers after stop
struct Leftovers {
    ready: Receiver<Frame>,
    compressed: Receiver<Frame>,
}

/// One-shot streaming session writing frames to segmented containers.
///
/// `add()` may be called from the capture thread while the session runs;
/// everything else belongs to the controlling thread.
pub struct StreamingPipeline {
    pool: Arc<BufferPool>,
    config: StreamingConfig,
    transform: Transform,

    state: SessionState,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    started_at: Option<Instant>,

    unprocessed: Mutex<Option<Sender<Frame>>>,
    leftovers: Option<Leftovers>,
    audio: Mutex<Option<AudioTake>>,

    process_threads: Vec<JoinHandle<()>>,
    compress_threads: Vec<JoinHandle<()>>,
    io_threads: Vec<JoinHandle<()>>,
}

impl StreamingPipeline {
    pub fn new(pool: Arc<BufferPool>, config: StreamingConfig) -> Self {
        Self {
            pool,
            config,
            transform: Transform::default(),
            state: SessionState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            started_at: None,
            unprocessed: Mutex::new(None),
            leftovers: None,
            audio: Mutex::new(None),
            process_threads: Vec::new(),
            compress_threads: Vec::new(),
            io_threads: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Percent of width and height to remove. Only honoured before `start()`.
    pub fn set_crop_amount(&mut self, horizontal: u32, vertical: u32) -> bool {
        if self.state != SessionState::Idle {
            log::warn!("Crop amount ignored once streaming has started");
            return false;
        }
        self.transform.crop = if horizontal == 0 && vertical == 0 {
            None
        } else {
            Some((horizontal.min(MAX_CROP_PERCENT), vertical.min(MAX_CROP_PERCENT)))
        };
        true
    }

    /// Enable 2x2 binning to RAW12. Only honoured before `start()`.
    pub fn set_bin(&mut self, bin: bool) -> bool {
        if self.state != SessionState::Idle {
            log::warn!("Binning ignored once streaming has started");
            return false;
        }
        self.transform.bin = bin;
        true
    }

    /// Start streaming into `outputs`, one container segment per file.
    ///
    /// Does nothing when `outputs` is empty. Audio is recorded only when both
    /// a source and an output file are given.
    pub fn start(
        &mut self,
        outputs: Vec<File>,
        audio_output: Option<File>,
        audio_source: Option<Box<dyn AudioSource>>,
        camera: &CameraDescription,
    ) -> StreamResult<()> {
        match self.state {
            SessionState::Running => return Err(StreamError::AlreadyStarted),
            SessionState::Stopped => return Err(StreamError::AlreadyStopped),
            SessionState::Idle => {}
        }
        if outputs.is_empty() {
            log::warn!("No outputs given, streaming not started");
            return Ok(());
        }

        let num_segments = outputs.len();
        let mut writers = Vec::with_capacity(num_segments);
        for (segment, file) in outputs.into_iter().enumerate() {
            writers.push(ContainerWriter::create_from_file(
                file,
                camera,
                num_segments as u32,
                json!({ "segment": segment }),
            )?);
        }

        self.transform.white_level = camera.white_level;
        self.running.store(true, Ordering::Release);
        self.counters
            .active_io_workers
            .store(num_segments, Ordering::Release);
        self.state = SessionState::Running;
        self.started_at = Some(Instant::now());

        if let Err(e) = self.spawn_workers(writers) {
            log::error!("Failed to start streaming: {}", e);
            self.stop();
            return Err(e);
        }

        self.start_audio(audio_output, audio_source);

        log::info!(
            "Streaming started: {} segments, {} process, {} compress threads, {:?}",
            num_segments,
            self.config.process_threads.max(1),
            self.config.compress_threads,
            self.config.compression
        );
        Ok(())
    }

    fn spawn_workers(&mut self, writers: Vec<ContainerWriter>) -> StreamResult<()> {
        let timeout = self.config.queue_timeout();
        let (unprocessed_tx, unprocessed_rx) = channel::unbounded::<Frame>();
        let (ready_tx, ready_rx) = channel::unbounded::<Frame>();
        let (compressed_tx, compressed_rx) = channel::unbounded::<Frame>();

        *self.unprocessed.lock() = Some(unprocessed_tx);
        self.leftovers = Some(Leftovers {
            ready: ready_rx.clone(),
            compressed: compressed_rx.clone(),
        });

        for (segment, writer) in writers.into_iter().enumerate() {
            let worker = IoWorker {
                segment,
                writer,
                compressed: compressed_rx.clone(),
                ready: ready_rx.clone(),
                pool: Arc::clone(&self.pool),
                counters: Arc::clone(&self.counters),
                timeout,
                priority: self.config.io_priority,
            };
            let handle = spawn(format!("motion-io-{segment}"), move || worker.run());
            match handle {
                Ok(handle) => self.io_threads.push(handle),
                Err(e) => {
                    // Writers for this and later segments are dropped here and commit empty
                    let unspawned = num_unspawned(&self.counters, self.io_threads.len());
                    self.counters
                        .active_io_workers
                        .fetch_sub(unspawned, Ordering::AcqRel);
                    return Err(e);
                }
            }
        }

        for index in 0..self.config.process_threads.max(1) {
            let unprocessed = unprocessed_rx.clone();
            let ready = ready_tx.clone();
            let pool = Arc::clone(&self.pool);
            let counters = Arc::clone(&self.counters);
            let transform = self.transform;
            self.process_threads.push(spawn(format!("motion-process-{index}"), move || {
                process_worker(index, unprocessed, ready, pool, counters, transform, timeout)
            })?);
        }

        for index in 0..self.config.compress_threads {
            let ready = ready_rx.clone();
            let compressed = compressed_tx.clone();
            let pool = Arc::clone(&self.pool);
            let counters = Arc::clone(&self.counters);
            let running = Arc::clone(&self.running);
            let compression = self.config.compression;
            self.compress_threads.push(spawn(format!("motion-compress-{index}"), move || {
                compress_worker(index, ready, compressed, pool, counters, running, compression, timeout)
            })?);
        }

        Ok(())
    }

    fn start_audio(&mut self, output: Option<File>, source: Option<Box<dyn AudioSource>>) {
        match (output, source) {
            (Some(output), Some(mut source)) => match source.start(DEFAULT_SAMPLE_RATE, 1) {
                Ok(()) => *self.audio.lock() = Some(AudioTake { source, output }),
                Err(e) => log::error!("Failed to start audio, continuing without it: {}", e),
            },
            (None, Some(_)) => log::warn!("Audio source given without an output file, ignoring"),
            _ => {}
        }
    }

    /// Queue a filled buffer for streaming.
    ///
    /// Never blocks. If the session is not running the buffer goes straight
    /// back to the pool and `false` is returned.
    pub fn add(&self, buffer: Frame) -> bool {
        let unprocessed = self.unprocessed.lock();
        let sender = match unprocessed.as_ref() {
            Some(sender) if self.counters.active_io_workers.load(Ordering::Acquire) > 0 => sender,
            _ => {
                drop(unprocessed);
                self.pool.discard_buffer(buffer);
                return false;
            }
        };

        match sender.send(buffer) {
            Ok(()) => {
                self.counters.accepted_frames.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                drop(unprocessed);
                self.pool.discard_buffer(e.into_inner());
                false
            }
        }
    }

    /// Stop streaming and wait for every accepted frame to be written.
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Stopped;
        self.running.store(false, Ordering::Release);

        // No new frames; process workers exit once the queue is drained
        self.unprocessed.lock().take();

        self.finish_audio();

        join_all("compress", &mut self.compress_threads);
        join_all("process", &mut self.process_threads);
        join_all("IO", &mut self.io_threads);

        if let Some(leftovers) = self.leftovers.take() {
            let stranded: Vec<Frame> = leftovers
                .compressed
                .try_iter()
                .chain(leftovers.ready.try_iter())
                .collect();
            if !stranded.is_empty() {
                log::warn!("Returning {} unwritten frames to the pool", stranded.len());
                self.counters
                    .dropped_frames
                    .fetch_add(stranded.len() as u64, Ordering::Relaxed);
                self.pool.discard_buffers(stranded);
            }
        }

        let stats = self.stats();
        log::info!(
            "Streaming stopped: {} accepted, {} written, {} dropped, {} bytes, {:.1} fps",
            stats.accepted_frames,
            stats.written_frames,
            stats.dropped_frames,
            stats.written_output_bytes,
            stats.estimate_fps
        );
    }

    fn finish_audio(&mut self) {
        let Some(AudioTake { mut source, output }) = self.audio.lock().take() else {
            return;
        };
        source.stop();
        let channels = source.channels();
        let mut samples = source.audio_data();
        if channels > 1 {
            samples = downmix_to_mono(&samples, channels);
        }
        log::info!(
            "Writing {} audio samples alongside {} frames",
            samples.len(),
            self.accepted_frames()
        );
        let config = AudioConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
        };
        if let Err(e) = write_wav_file(output, &samples, config) {
            log::error!("Failed to write audio: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn accepted_frames(&self) -> u64 {
        self.counters.accepted_frames.load(Ordering::Relaxed)
    }

    pub fn written_frames(&self) -> u64 {
        self.counters.written_frames.load(Ordering::Relaxed)
    }

    pub fn written_output_bytes(&self) -> u64 {
        self.counters.written_bytes.load(Ordering::Relaxed)
    }

    /// Accepted frames per second since `start()`
    pub fn estimate_fps(&self) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let elapsed = started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.accepted_frames() as f64 / elapsed
    }

    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            accepted_frames: self.accepted_frames(),
            written_frames: self.written_frames(),
            compressed_frames: self.counters.compressed_frames.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            written_output_bytes: self.written_output_bytes(),
            active_io_workers: self.counters.active_io_workers.load(Ordering::Relaxed),
            estimate_fps: self.estimate_fps(),
        }
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(name: String, f: impl FnOnce() + Send + 'static) -> StreamResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| StreamError::Spawn { name, source })
}

fn num_unspawned(counters: &Counters, spawned: usize) -> usize {
    counters
        .active_io_workers
        .load(Ordering::Acquire)
        .saturating_sub(spawned)
}

fn join_all(stage: &str, handles: &mut Vec<JoinHandle<()>>) {
    for handle in handles.drain(..) {
        if handle.join().is_err() {
            log::error!("{} worker panicked", stage);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamingStats {
    pub accepted_frames: u64,
    pub written_frames: u64,
    pub compressed_frames: u64,
    pub dropped_frames: u64,
    pub written_output_bytes: u64,
    pub active_io_workers: usize,
    pub estimate_fps: f64,
}
