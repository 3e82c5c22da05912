//! Per-frame tile planner.
//!
//! Given the viewport and the canvas size, decide:
//! - whether tiled rendering is engaged at all
//! - the sample size for tiles and for the background bitmap
//! - how many blocks the grid should have along its longest side
//! - which blocks are in view, and where each one is drawn
//!
//! Only blocks whose visibility or sample size changed touch the work queue.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{calculate_in_sample_size, IntOffset, IntSize, Rect, Size, Viewport};
use crate::decoder::{DecodeJob, RenderBlock, SamplingDecoder};

/// Finest grid the planner will ask for.
pub const MAX_DIVISOR: u32 = 8;

/// Above this visible ratio a single block covers the image.
const WHOLE_IMAGE_RATIO: f64 = 0.6;

/// Above this visible ratio a 4-block grid is used, below it the finest.
const COARSE_GRID_RATIO: f64 = 0.025;

/// Pick the grid divisor for a visible-area ratio.
///
/// The ratio is rounded to two decimals (half-to-even) first.
pub fn select_divisor(visible_area_ratio: f64) -> u32 {
    let ratio = (visible_area_ratio * 100.0).round_ties_even() / 100.0;
    if ratio > WHOLE_IMAGE_RATIO {
        1
    } else if ratio > COARSE_GRID_RATIO {
        4
    } else {
        MAX_DIVISOR
    }
}

/// Summary of one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
    /// Nothing changed since the previous pass.
    pub skipped: bool,
    /// Tiled rendering is active for this frame.
    pub tiling: bool,
    pub divisor: u32,
    pub divisor_changed: bool,
    pub in_sample_size: u32,
    pub background_sample: u32,
    pub background_requested: bool,
    /// Blocks intersecting the visible rect.
    pub in_bound: usize,
    /// Blocks pushed to the front of the work queue.
    pub inserted: usize,
    /// Blocks dropped from the queue and released.
    pub removed: usize,
}

/// Diffing planner; one per viewer.
#[derive(Debug)]
pub struct ViewportPlanner {
    canvas_size: Size,
    previous_rect: Option<Rect>,
    previous_scale: Option<f64>,
    divisor: u32,
    tiling: bool,
    background_sample: Option<u32>,
}

impl ViewportPlanner {
    /// `canvas_size` is the 1x display size of the content.
    pub fn new(canvas_size: Size) -> Self {
        Self {
            canvas_size,
            previous_rect: None,
            previous_scale: None,
            divisor: 1,
            tiling: false,
            background_sample: None,
        }
    }

    pub fn canvas_size(&self) -> Size {
        self.canvas_size
    }

    /// Change the canvas; the next pass recomputes everything.
    pub fn set_canvas_size(&mut self, size: Size) {
        if self.canvas_size == size {
            return;
        }
        self.canvas_size = size;
        self.previous_rect = None;
        self.previous_scale = None;
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn is_tiling(&self) -> bool {
        self.tiling
    }

    /// Visible area divided by real area, both in real pixel space.
    pub fn visible_area_ratio(&self, viewport: &Viewport) -> f64 {
        let real = self.canvas_size.scaled(viewport.scale);
        let real_area = real.area();
        if real_area <= 0.0 {
            return 0.0;
        }
        let visible_area = self.canvas_size.width
            * viewport.visible_rect.width()
            * self.canvas_size.height
            * viewport.visible_rect.height();
        visible_area / real_area
    }

    /// Run one planning pass against `decoder`.
    pub fn plan(&mut self, decoder: &SamplingDecoder, viewport: &Viewport) -> PlanOutcome {
        let mut outcome = PlanOutcome {
            divisor: self.divisor,
            ..PlanOutcome::default()
        };
        if self.canvas_size.is_empty() || decoder.is_recycled() {
            outcome.skipped = true;
            return outcome;
        }

        let decoder_width = decoder.decoder_width();
        let decoder_height = decoder.decoder_height();
        let canvas = self.canvas_size;
        let real = canvas.scaled(viewport.scale);

        // The background is already sharper than the canvas for small images
        let needs_high_res =
            decoder_width as f64 * decoder_height as f64 > canvas.width * canvas.height;
        let tiling = needs_high_res && viewport.scale > 1.0;
        let engaged = tiling && !self.tiling;
        if self.tiling && !tiling {
            debug!(scale = viewport.scale, "Tiling disengaged");
            decoder.clear_tile_jobs();
            decoder.clear_all_bitmaps();
        }
        self.tiling = tiling;
        outcome.tiling = tiling;

        let in_sample_size = calculate_in_sample_size(decoder_width, real.width as u32);
        outcome.in_sample_size = in_sample_size;
        let background_sample = if needs_high_res {
            calculate_in_sample_size(decoder_width, canvas.width as u32)
        } else {
            in_sample_size
        };
        outcome.background_sample = background_sample;

        if real.area() > 0.0 {
            let divisor = select_divisor(self.visible_area_ratio(viewport));
            if divisor != self.divisor {
                decoder.clear_tile_jobs();
                decoder.set_max_block_count(divisor);
                debug!(from = self.divisor, to = divisor, "Grid divisor changed");
                self.divisor = divisor;
                outcome.divisor_changed = true;
            }
        }
        outcome.divisor = self.divisor;

        let unchanged = self.previous_rect == Some(viewport.visible_rect)
            && self.previous_scale == Some(viewport.scale)
            && !outcome.divisor_changed
            && !engaged;
        if unchanged {
            outcome.skipped = true;
        } else {
            self.previous_rect = Some(viewport.visible_rect);
            self.previous_scale = Some(viewport.scale);
            self.place_blocks(decoder, viewport, real, in_sample_size, engaged, &mut outcome);
        }

        if self.background_sample != Some(background_sample) {
            self.background_sample = Some(background_sample);
            outcome.background_requested = decoder.request_background(background_sample);
        }

        trace!(?outcome, "Planned viewport");
        outcome
    }

    fn place_blocks(
        &self,
        decoder: &SamplingDecoder,
        viewport: &Viewport,
        real: Size,
        in_sample_size: u32,
        engaged: bool,
        outcome: &mut PlanOutcome,
    ) {
        let visible = Rect::new(
            real.width * viewport.visible_rect.left,
            real.height * viewport.visible_rect.top,
            real.width * viewport.visible_rect.right,
            real.height * viewport.visible_rect.bottom,
        );

        let mut insert: Vec<Arc<RenderBlock>> = Vec::new();
        let mut remove: Vec<Arc<RenderBlock>> = Vec::new();

        {
            let grid = decoder.grid();
            let render_block_size =
                grid.block_size() as f64 * (real.width / decoder.decoder_width() as f64);

            let mut last_y: Option<i32> = None;
            for (row, blocks) in grid.rows().iter().enumerate() {
                let start_y = row as f64 * render_block_size;
                let end_y = (row + 1) as f64 * render_block_size;
                let mut top = start_y as i32;
                let mut height = if end_y > real.height {
                    (real.height - start_y) as i32
                } else {
                    render_block_size as i32
                };
                // Truncation can open a one pixel seam between rows
                if let Some(prev) = last_y.filter(|&prev| prev < top) {
                    height += top - prev;
                    top = prev;
                }
                last_y = Some(top + height);

                let mut last_x: Option<i32> = None;
                for (column, block) in blocks.iter().enumerate() {
                    let start_x = column as f64 * render_block_size;
                    let end_x = (column + 1) as f64 * render_block_size;
                    let mut left = start_x as i32;
                    let mut width = if end_x > real.width {
                        (real.width - start_x) as i32
                    } else {
                        render_block_size as i32
                    };
                    if let Some(prev) = last_x.filter(|&prev| prev < left) {
                        width += left - prev;
                        left = prev;
                    }
                    last_x = Some(left + width);

                    let in_bound = Rect::new(start_x, start_y, end_x, end_y).touches(&visible);
                    let changed = block.update_placement(
                        in_bound,
                        in_sample_size,
                        IntOffset::new(left, top),
                        IntSize::new(width, height),
                    );
                    if in_bound {
                        outcome.in_bound += 1;
                    }

                    if !self.tiling {
                        continue;
                    }
                    if in_bound {
                        if changed || (engaged && !block.has_bitmap()) {
                            insert.push(Arc::clone(block));
                        }
                    } else if changed {
                        block.release();
                        remove.push(Arc::clone(block));
                    }
                }
            }
        }

        if insert.is_empty() && remove.is_empty() {
            return;
        }

        let (inserted, removed) = decoder.queue().with_items(|items| {
            let mut inserted = 0;
            for block in insert {
                if !items.iter().any(|job| job.is_block(&block)) {
                    items.push_front(DecodeJob::Block(block));
                    inserted += 1;
                }
            }
            let before = items.len();
            items.retain(|job| !remove.iter().any(|block| job.is_block(block)));
            (inserted, before - items.len())
        });
        outcome.inserted = inserted;
        outcome.removed = removed;

        debug!(
            inserted,
            removed,
            in_bound = outcome.in_bound,
            in_sample_size,
            "Updated work queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ImageRegionDecoder, Rotation};
    use image::RgbaImage;
    use std::time::Duration;

    /// Planner scenario images only need dimensions, not content.
    fn decoder(width: u32, height: u32) -> SamplingDecoder {
        let image = ImageRegionDecoder::from_image(RgbaImage::new(width, height));
        SamplingDecoder::new(Box::new(image), Rotation::Rotation0)
    }

    /// Normalized visible rect for a `container` looking at content scaled
    /// about the container centre and shifted by `offset`.
    fn viewport_for(display: Size, container: Size, scale: f64, dx: f64, dy: f64) -> Viewport {
        let real = display.scaled(scale);
        let left = container.width / 2.0 - real.width / 2.0 + dx;
        let top = container.height / 2.0 - real.height / 2.0 + dy;
        let real_rect = Rect::new(left, top, left + real.width, top + real.height);
        let hit = real_rect.intersect(&Rect::new(0.0, 0.0, container.width, container.height));
        Viewport::new(
            scale,
            Rect::new(
                (hit.left - left) / real.width,
                (hit.top - top) / real.height,
                (hit.right - left) / real.width,
                (hit.bottom - top) / real.height,
            ),
        )
    }

    #[test]
    fn test_select_divisor_thresholds() {
        assert_eq!(select_divisor(1.0), 1);
        assert_eq!(select_divisor(0.61), 1);
        assert_eq!(select_divisor(0.6), 4);
        assert_eq!(select_divisor(0.03), 4);
        assert_eq!(select_divisor(0.02), MAX_DIVISOR);
        // 0.024 rounds down to 0.02
        assert_eq!(select_divisor(0.024), MAX_DIVISOR);
        assert_eq!(select_divisor(0.0), MAX_DIVISOR);
    }

    #[test]
    fn test_large_image_at_fit_scale() {
        // 4000x3000 in a 1000x800 container fits as 1000x750
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);

        let outcome = planner.plan(&decoder, &viewport_for(display, container, 1.0, 0.0, 0.0));
        assert_eq!(outcome.divisor, 1);
        assert!(!outcome.tiling);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(decoder.pending_jobs(), 1); // background only
        assert!(decoder.queue().contains_where(DecodeJob::is_background));
        // Background sampled for the canvas width: 4000 / 8 < 1000
        assert_eq!(outcome.background_sample, 8);
    }

    #[test]
    fn test_large_image_zoomed_into_corner() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);
        planner.plan(&decoder, &viewport_for(display, container, 1.0, 0.0, 0.0));

        // Real size 6000x4500; pan to the top-left corner
        let viewport = viewport_for(display, container, 6.0, 2500.0, 1850.0);
        assert!(planner.visible_area_ratio(&viewport) < COARSE_GRID_RATIO);

        let outcome = planner.plan(&decoder, &viewport);
        assert_eq!(outcome.divisor, MAX_DIVISOR);
        assert!(outcome.divisor_changed);
        assert!(outcome.tiling);
        assert_eq!(decoder.grid().max_block_count(), MAX_DIVISOR);
        // 6000 / 4000 = 1.5x decoder pixels, sample 1
        assert_eq!(outcome.in_sample_size, 1);

        // Visible real rect is [0,1000]x[0,800]; blocks are 750 real px
        let in_bound: Vec<(usize, usize)> = decoder
            .blocks()
            .iter()
            .filter(|b| b.in_bound())
            .map(|b| (b.row(), b.column()))
            .collect();
        assert_eq!(in_bound, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(outcome.inserted, 4);
    }

    #[test]
    fn test_unchanged_viewport_is_skipped() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);
        let viewport = viewport_for(display, container, 3.0, 0.0, 0.0);

        let first = planner.plan(&decoder, &viewport);
        assert!(!first.skipped);
        let pending = decoder.pending_jobs();

        let second = planner.plan(&decoder, &viewport);
        assert!(second.skipped);
        assert_eq!(second.inserted, 0);
        assert_eq!(decoder.pending_jobs(), pending);
    }

    #[test]
    fn test_pan_schedules_only_changed_blocks() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);

        planner.plan(&decoder, &viewport_for(display, container, 6.0, 2500.0, 1850.0));
        decoder.clear_tile_jobs();

        // Move right by one block width: column 2 enters, column 0 leaves
        let outcome = planner.plan(
            &decoder,
            &viewport_for(display, container, 6.0, 2500.0 - 750.0, 1850.0),
        );
        assert!(!outcome.divisor_changed);
        assert_eq!(outcome.inserted, 2);
        let queued: Vec<(usize, usize)> = decoder
            .blocks()
            .iter()
            .filter(|b| decoder.queue().contains_where(|job| job.is_block(b)))
            .map(|b| (b.row(), b.column()))
            .collect();
        assert_eq!(queued, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn test_disengaging_releases_bitmaps() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);

        planner.plan(&decoder, &viewport_for(display, container, 6.0, 2500.0, 1850.0));
        for block in decoder.blocks().iter().filter(|b| b.in_bound()) {
            block.set_bitmap(RgbaImage::new(1, 1));
        }

        let outcome = planner.plan(&decoder, &viewport_for(display, container, 1.0, 0.0, 0.0));
        assert!(!outcome.tiling);
        assert!(decoder.blocks().iter().all(|b| !b.has_bitmap()));
        assert!(!decoder
            .queue()
            .contains_where(|job| matches!(job, DecodeJob::Block(_))));
        // The pending placeholder decode is not a tile job
        assert!(decoder.queue().contains_where(DecodeJob::is_background));
    }

    #[test]
    fn test_background_survives_divisor_change_before_worker_starts() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4000, 3000);
        let mut planner = ViewportPlanner::new(display);

        let fit = planner.plan(&decoder, &viewport_for(display, container, 1.0, 0.0, 0.0));
        assert!(fit.background_requested);

        let zoomed = planner.plan(&decoder, &viewport_for(display, container, 3.0, 0.0, 0.0));
        assert!(zoomed.divisor_changed);
        assert!(!zoomed.background_requested);
        assert!(decoder.queue().contains_where(DecodeJob::is_background));

        decoder.start_render_queue().unwrap();
        assert!(decoder.wait_idle(Duration::from_secs(10)));
        assert_eq!(decoder.background_sample(), Some(8));
        assert_eq!(decoder.background().unwrap().dimensions(), (500, 375));
    }

    #[test]
    fn test_small_image_never_tiles() {
        let display = Size::new(400.0, 300.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(400, 300);
        let mut planner = ViewportPlanner::new(display);

        let outcome = planner.plan(&decoder, &viewport_for(display, container, 3.0, 0.0, 0.0));
        assert!(!outcome.tiling);
        assert_eq!(outcome.inserted, 0);
        // Background follows the current sample size
        assert_eq!(outcome.background_sample, outcome.in_sample_size);
    }

    #[test]
    fn test_render_placement_has_no_seams() {
        let display = Size::new(1000.0, 750.0);
        let container = Size::new(1000.0, 800.0);
        let decoder = decoder(4001, 2999);
        let mut planner = ViewportPlanner::new(display);
        planner.plan(&decoder, &viewport_for(display, container, 5.3, 0.0, 0.0));

        let grid = decoder.grid();
        for row in grid.rows() {
            for pair in row.windows(2) {
                let (a, b) = (pair[0].render_offset(), pair[1].render_offset());
                assert_eq!(a.x + pair[0].render_size().width, b.x);
                assert_eq!(a.y, b.y);
            }
        }
        for pair in grid.rows().windows(2) {
            let (a, b) = (&pair[0][0], &pair[1][0]);
            assert_eq!(a.render_offset().y + a.render_size().height, b.render_offset().y);
        }
    }

    #[test]
    fn test_recycled_decoder_is_skipped() {
        let decoder = decoder(4000, 3000);
        decoder.release();
        let mut planner = ViewportPlanner::new(Size::new(1000.0, 750.0));
        let outcome = planner.plan(&decoder, &Viewport::full());
        assert!(outcome.skipped);
        assert!(!decoder.queue().contains_where(|job| !matches!(job, DecodeJob::Wake)));
    }
}
