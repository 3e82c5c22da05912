//! Sampling decoder: region decoder + block grid + decode worker.
//!
//! - Serializes every region decode through one mutex
//! - Applies the display rotation at the decode boundary
//! - Runs a single background worker that drains the block queue
//! - Keeps a coarse background bitmap and an optional thumbnail
//! - Reports progress through callbacks and a flume channel

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, trace, warn};

use super::block::{BlockGrid, RenderBlock};
use super::queue::{BlockingDeque, DecodeJob};
use super::region::{Bitmap, ImageRegionDecoder, RegionDecoder, Rotation};
use crate::config::DEFAULT_THUMBNAIL_WIDTH;
use crate::error::Result;
use crate::viewport::{calculate_in_sample_size, IntOffset, IntSize, PixelRect, Size};

/// Maximum number of undelivered updates kept for `poll_updates`.
const MAX_PENDING_UPDATES: usize = 256;

/// Poll interval used by [`SamplingDecoder::wait_idle`].
const IDLE_POLL_MS: u64 = 2;

/// Progress event emitted by the decode worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderUpdate {
    /// A tile finished decoding and holds a fresh bitmap.
    BlockDecoded {
        row: usize,
        column: usize,
        generation: u64,
    },
    /// The background bitmap was replaced.
    BackgroundDecoded { in_sample_size: u32 },
    /// The decoder was released; no further updates follow.
    Released,
}

/// Callback type for redraw notifications. Invoked on the worker thread.
pub type UpdateCallback = Box<dyn Fn(DecoderUpdate) + Send + Sync>;

/// Hook run once when the decoder is released.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A decoded tile and where to draw it, in real (zoomed) pixel space.
#[derive(Debug, Clone)]
pub struct TileDraw {
    pub row: usize,
    pub column: usize,
    pub offset: IntOffset,
    pub size: IntSize,
    pub bitmap: Arc<Bitmap>,
}

/// State shared with the worker thread.
struct Shared {
    decoder: Mutex<Box<dyn RegionDecoder>>,
    recycled: AtomicBool,
    rotation: Rotation,
    /// Display-orientation dimensions.
    width: u32,
    height: u32,
    grid: RwLock<BlockGrid>,
    generation: AtomicU64,
    queue: BlockingDeque<DecodeJob>,
    /// Jobs taken from the queue and not yet finished.
    active: AtomicUsize,
    background: RwLock<Option<(u32, Arc<Bitmap>)>>,
    requested_background: Mutex<Option<u32>>,
    thumbnail: RwLock<Option<Arc<Bitmap>>>,
    update_tx: Sender<DecoderUpdate>,
    callbacks: Mutex<Vec<UpdateCallback>>,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl Shared {
    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::Acquire)
    }

    fn decode_region(&self, in_sample_size: u32, rect: PixelRect) -> Option<Bitmap> {
        let native_rect = self.rotation.to_native_rect(rect, self.width, self.height);

        let decoded = {
            let mut decoder = self.decoder.lock();
            if decoder.is_recycled() {
                return None;
            }
            decoder.decode_region(in_sample_size, native_rect)
        };

        match decoded {
            Ok(bitmap) => Some(self.rotation.rotate_bitmap(bitmap)),
            Err(e) => {
                warn!(?rect, in_sample_size, error = %e, "Region decode failed");
                None
            }
        }
    }

    fn notify(&self, update: DecoderUpdate) {
        {
            let callbacks = self.callbacks.lock();
            for cb in callbacks.iter() {
                cb(update.clone());
            }
        }

        if let Err(flume::TrySendError::Full(update)) = self.update_tx.try_send(update) {
            trace!(?update, "Update channel full, dropping update");
        }
    }

    fn process(&self, job: DecodeJob) {
        match job {
            DecodeJob::Wake => {}
            DecodeJob::Block(block) => self.decode_block(&block),
            DecodeJob::Background { in_sample_size } => self.decode_background(in_sample_size),
        }
    }

    fn decode_block(&self, block: &Arc<RenderBlock>) {
        let in_sample_size = block.in_sample_size();
        let started = Instant::now();
        let Some(bitmap) = self.decode_region(in_sample_size, block.slice_rect()) else {
            return;
        };

        // The grid may have been rebuilt, or the block scrolled away, while
        // the decode was running.
        let generation = self.generation.load(Ordering::Acquire);
        if !block.store_if_current(generation, bitmap) {
            trace!(
                row = block.row(),
                column = block.column(),
                "Discarding stale block decode"
            );
            return;
        }

        trace!(
            row = block.row(),
            column = block.column(),
            in_sample_size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Decoded block"
        );
        self.notify(DecoderUpdate::BlockDecoded {
            row: block.row(),
            column: block.column(),
            generation: block.generation(),
        });
    }

    fn decode_background(&self, in_sample_size: u32) {
        let rect = PixelRect::from_size(self.width, self.height);
        let Some(bitmap) = self.decode_region(in_sample_size, rect) else {
            return;
        };

        debug!(
            in_sample_size,
            width = bitmap.width(),
            height = bitmap.height(),
            "Decoded background"
        );
        *self.background.write() = Some((in_sample_size, Arc::new(bitmap)));
        self.notify(DecoderUpdate::BackgroundDecoded { in_sample_size });
    }
}

/// Progressive tiled decoder for one image.
///
/// Owns the region decoder exclusively. Dropping it releases the decoder
/// and joins the worker thread.
pub struct SamplingDecoder {
    shared: Arc<Shared>,
    update_rx: Receiver<DecoderUpdate>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SamplingDecoder {
    /// Wrap a region decoder. The grid starts with a single block.
    pub fn new(decoder: Box<dyn RegionDecoder>, rotation: Rotation) -> Self {
        let (width, height) = rotation.display_size(decoder.width(), decoder.height());
        let recycled = decoder.is_recycled();
        let (update_tx, update_rx) = flume::bounded(MAX_PENDING_UPDATES);

        let shared = Arc::new(Shared {
            decoder: Mutex::new(decoder),
            recycled: AtomicBool::new(recycled),
            rotation,
            width,
            height,
            grid: RwLock::new(BlockGrid::default()),
            generation: AtomicU64::new(0),
            queue: BlockingDeque::new(),
            active: AtomicUsize::new(0),
            background: RwLock::new(None),
            requested_background: Mutex::new(None),
            thumbnail: RwLock::new(None),
            update_tx,
            callbacks: Mutex::new(Vec::new()),
            on_release: Mutex::new(None),
        });

        let sampling = Self {
            shared,
            update_rx,
            worker: Mutex::new(None),
        };
        sampling.set_max_block_count(1);
        sampling
    }

    /// Decode from encoded bytes with an explicit rotation.
    pub fn from_bytes(bytes: &[u8], rotation: Rotation) -> Result<Self> {
        let decoder = ImageRegionDecoder::from_bytes(bytes)?;
        Ok(Self::new(Box::new(decoder), rotation))
    }

    /// Open a file, taking the rotation from its EXIF orientation.
    pub fn with_exif_rotation(path: &Path) -> Result<Self> {
        let decoder = ImageRegionDecoder::from_path(path)?;
        let rotation = decoder.exif_rotation();
        Ok(Self::new(Box::new(decoder), rotation))
    }

    pub fn from_path(path: &Path, rotation: Rotation) -> Result<Self> {
        let decoder = ImageRegionDecoder::from_path(path)?;
        Ok(Self::new(Box::new(decoder), rotation))
    }

    pub fn rotation(&self) -> Rotation {
        self.shared.rotation
    }

    /// Display-orientation width.
    pub fn decoder_width(&self) -> u32 {
        self.shared.width
    }

    /// Display-orientation height.
    pub fn decoder_height(&self) -> u32 {
        self.shared.height
    }

    pub fn intrinsic_size(&self) -> Size {
        Size::new(self.shared.width as f64, self.shared.height as f64)
    }

    /// Size of the native image seen through `rotation`.
    pub fn rotation_size(&self, rotation: Rotation) -> (u32, u32) {
        let decoder = self.shared.decoder.lock();
        rotation.display_size(decoder.width(), decoder.height())
    }

    pub fn is_recycled(&self) -> bool {
        self.shared.is_recycled()
    }

    /// Decode a display-space region; `None` when the decoder is gone or the
    /// decode failed (failures are logged).
    pub fn decode_region(&self, in_sample_size: u32, rect: PixelRect) -> Option<Bitmap> {
        self.shared.decode_region(in_sample_size, rect)
    }

    /// Rebuild the block grid for a new divisor.
    ///
    /// Returns false when the divisor is unchanged or the decoder is
    /// recycled. Bitmaps of the previous grid are released.
    pub fn set_max_block_count(&self, count: u32) -> bool {
        if self.shared.grid.read().max_block_count() == count {
            return false;
        }
        if self.is_recycled() {
            return false;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let grid = BlockGrid::build(self.shared.width, self.shared.height, count, generation);
        let previous = std::mem::replace(&mut *self.shared.grid.write(), grid);
        previous.clear_all_bitmaps();
        true
    }

    /// Read access to the current block grid.
    pub fn grid(&self) -> RwLockReadGuard<'_, BlockGrid> {
        self.shared.grid.read()
    }

    pub fn blocks(&self) -> Vec<Arc<RenderBlock>> {
        self.shared.grid.read().blocks().cloned().collect()
    }

    pub fn clear_all_bitmaps(&self) {
        self.shared.grid.read().clear_all_bitmaps();
    }

    pub(crate) fn queue(&self) -> &BlockingDeque<DecodeJob> {
        &self.shared.queue
    }

    /// Drop every pending tile job. A queued background decode stays, so
    /// the placeholder survives grid rebuilds and tiling turning off.
    pub fn clear_tile_jobs(&self) -> usize {
        self.shared.queue.remove_where(DecodeJob::is_tile)
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// True while jobs are queued or being decoded.
    pub fn is_busy(&self) -> bool {
        !self.shared.queue.is_empty() || self.shared.active.load(Ordering::SeqCst) > 0
    }

    /// Block until the queue is drained, or `timeout` elapses.
    ///
    /// Returns true when the worker went idle. Intended for headless
    /// drivers and tests; interactive code should use callbacks instead.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_busy() {
                return true;
            }
            thread::sleep(Duration::from_millis(IDLE_POLL_MS));
        }
        !self.is_busy()
    }

    /// Decode a whole-image placeholder about `target_width` pixels wide.
    pub fn create_thumbnail(&self, target_width: u32) -> Option<Bitmap> {
        let in_sample_size = calculate_in_sample_size(self.shared.width, target_width);
        self.decode_region(
            in_sample_size,
            PixelRect::from_size(self.shared.width, self.shared.height),
        )
    }

    /// Decode and keep the placeholder. Returns whether one was produced.
    pub fn load_thumbnail(&self, target_width: u32) -> bool {
        let thumbnail = self.create_thumbnail(target_width);
        let loaded = thumbnail.is_some();
        self.set_thumbnail(thumbnail);
        loaded
    }

    pub fn set_thumbnail(&self, thumbnail: Option<Bitmap>) {
        *self.shared.thumbnail.write() = thumbnail.map(Arc::new);
    }

    pub fn thumbnail(&self) -> Option<Arc<Bitmap>> {
        self.shared.thumbnail.read().clone()
    }

    /// Current coarse bitmap of the whole image.
    pub fn background(&self) -> Option<Arc<Bitmap>> {
        self.shared
            .background
            .read()
            .as_ref()
            .map(|(_, bitmap)| Arc::clone(bitmap))
    }

    pub fn background_sample(&self) -> Option<u32> {
        self.shared.background.read().as_ref().map(|(s, _)| *s)
    }

    /// Schedule a background decode at `in_sample_size` ahead of any tile.
    ///
    /// Returns false when that sample size is already current or pending.
    pub fn request_background(&self, in_sample_size: u32) -> bool {
        if self.is_recycled() {
            return false;
        }

        let mut requested = self.shared.requested_background.lock();
        if *requested == Some(in_sample_size) {
            return false;
        }
        *requested = Some(in_sample_size);

        self.shared.queue.with_items(|items| {
            items.retain(|job| !job.is_background());
            items.push_front(DecodeJob::Background { in_sample_size });
        });
        debug!(in_sample_size, "Requested background decode");
        true
    }

    /// In-bound blocks that currently hold a bitmap, with their placement.
    pub fn visible_tiles(&self) -> Vec<TileDraw> {
        self.shared
            .grid
            .read()
            .blocks()
            .filter(|block| block.in_bound())
            .filter_map(|block| {
                block.bitmap().map(|bitmap| TileDraw {
                    row: block.row(),
                    column: block.column(),
                    offset: block.render_offset(),
                    size: block.render_size(),
                    bitmap,
                })
            })
            .collect()
    }

    /// Register a redraw callback. It runs on the worker thread.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(DecoderUpdate) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push(Box::new(callback));
    }

    /// Register a hook run once on release.
    pub fn on_release<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.shared.on_release.lock() = Some(Box::new(hook));
    }

    /// Drain pending updates (non-blocking).
    pub fn poll_updates(&self) -> Vec<DecoderUpdate> {
        self.update_rx.try_iter().collect()
    }

    /// Start the decode worker. Calling it again while running is a no-op.
    pub fn start_render_queue(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.is_recycled() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("decode-worker".into())
            .spawn(move || worker_loop(shared))?;
        *worker = Some(handle);
        Ok(())
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Release every resource. Safe to call more than once.
    pub fn release(&self) {
        let shared = &self.shared;
        *shared.thumbnail.write() = None;
        *shared.background.write() = None;
        *shared.requested_background.lock() = None;

        let released_now = {
            let mut decoder = shared.decoder.lock();
            if decoder.is_recycled() && shared.is_recycled() {
                false
            } else {
                shared.queue.clear();
                decoder.recycle();
                shared.recycled.store(true, Ordering::Release);
                // Wake a worker blocked in take() so it observes the recycle
                shared.queue.put_first(DecodeJob::Wake);
                true
            }
        };

        if released_now {
            shared.grid.read().clear_all_bitmaps();
            if let Some(hook) = shared.on_release.lock().take() {
                hook();
            }
            shared.notify(DecoderUpdate::Released);
            info!("Sampling decoder released");
        }
    }

    /// Release and wait for the worker thread to exit.
    pub fn shutdown(&self) {
        self.release();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Decode worker panicked");
            }
        }
    }
}

impl Drop for SamplingDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread loop.
fn worker_loop(shared: Arc<Shared>) {
    debug!("Decode worker started");

    while !shared.is_recycled() {
        let job = shared.queue.take_then(|_| {
            shared.active.fetch_add(1, Ordering::SeqCst);
        });
        if !shared.is_recycled() {
            shared.process(job);
        }
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }

    debug!("Decode worker stopped");
}

/// Builder for [`SamplingDecoder`] with construction options.
pub struct SamplingDecoderBuilder {
    rotation: Option<Rotation>,
    thumbnail_width: Option<u32>,
    on_release: Option<ReleaseHook>,
}

impl SamplingDecoderBuilder {
    pub fn new() -> Self {
        Self {
            rotation: None,
            thumbnail_width: Some(DEFAULT_THUMBNAIL_WIDTH),
            on_release: None,
        }
    }

    /// Force a rotation. Without it, byte/path sources use EXIF orientation.
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn thumbnail_width(mut self, width: u32) -> Self {
        self.thumbnail_width = Some(width);
        self
    }

    pub fn without_thumbnail(mut self) -> Self {
        self.thumbnail_width = None;
        self
    }

    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn build(self, decoder: Box<dyn RegionDecoder>) -> SamplingDecoder {
        let rotation = self.rotation.unwrap_or_default();
        self.finish(decoder, rotation)
    }

    pub fn build_from_bytes(self, bytes: &[u8]) -> Result<SamplingDecoder> {
        let decoder = ImageRegionDecoder::from_bytes(bytes)?;
        let rotation = self.rotation.unwrap_or_else(|| decoder.exif_rotation());
        Ok(self.finish(Box::new(decoder), rotation))
    }

    pub fn build_from_path(self, path: &Path) -> Result<SamplingDecoder> {
        let decoder = ImageRegionDecoder::from_path(path)?;
        let rotation = self.rotation.unwrap_or_else(|| decoder.exif_rotation());
        Ok(self.finish(Box::new(decoder), rotation))
    }

    fn finish(self, decoder: Box<dyn RegionDecoder>, rotation: Rotation) -> SamplingDecoder {
        let sampling = SamplingDecoder::new(decoder, rotation);
        if let Some(hook) = self.on_release {
            *sampling.shared.on_release.lock() = Some(hook);
        }
        if let Some(width) = self.thumbnail_width {
            sampling.load_thumbnail(width);
        }
        sampling
    }
}

impl Default for SamplingDecoderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
