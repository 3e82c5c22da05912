//! Level-of-detail block grid.
//!
//! The decoder's display-space area is cut into square blocks of
//! `max(width, height) / divisor` pixels. Blocks on the last row and column
//! are clipped so the grid tiles the image exactly.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::region::Bitmap;
use crate::viewport::{IntOffset, IntSize, PixelRect};

/// Mutable part of a block, written by the planner and the decode worker.
#[derive(Debug, Clone)]
struct BlockState {
    in_bound: bool,
    in_sample_size: u32,
    render_offset: IntOffset,
    render_size: IntSize,
    bitmap: Option<Arc<Bitmap>>,
}

impl Default for BlockState {
    fn default() -> Self {
        Self {
            in_bound: false,
            in_sample_size: 1,
            render_offset: IntOffset::default(),
            render_size: IntSize::default(),
            bitmap: None,
        }
    }
}

/// One independently decodable tile of the source image.
#[derive(Debug)]
pub struct RenderBlock {
    slice_rect: PixelRect,
    row: usize,
    column: usize,
    generation: u64,
    state: Mutex<BlockState>,
}

impl RenderBlock {
    pub fn new(slice_rect: PixelRect, row: usize, column: usize, generation: u64) -> Self {
        Self {
            slice_rect,
            row,
            column,
            generation,
            state: Mutex::new(BlockState::default()),
        }
    }

    /// Source rectangle in decoder display space.
    pub fn slice_rect(&self) -> PixelRect {
        self.slice_rect
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// Grid generation this block was built for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_bound(&self) -> bool {
        self.state.lock().in_bound
    }

    pub fn in_sample_size(&self) -> u32 {
        self.state.lock().in_sample_size
    }

    pub fn render_offset(&self) -> IntOffset {
        self.state.lock().render_offset
    }

    pub fn render_size(&self) -> IntSize {
        self.state.lock().render_size
    }

    /// Store the planner's view of this block.
    ///
    /// Returns true when visibility or sample size changed, i.e. when the
    /// block's decode state has to be revisited.
    pub fn update_placement(
        &self,
        in_bound: bool,
        in_sample_size: u32,
        render_offset: IntOffset,
        render_size: IntSize,
    ) -> bool {
        let mut state = self.state.lock();
        let changed = state.in_bound != in_bound || state.in_sample_size != in_sample_size;
        state.in_bound = in_bound;
        state.in_sample_size = in_sample_size;
        state.render_offset = render_offset;
        state.render_size = render_size;
        changed
    }

    pub fn bitmap(&self) -> Option<Arc<Bitmap>> {
        self.state.lock().bitmap.clone()
    }

    pub fn has_bitmap(&self) -> bool {
        self.state.lock().bitmap.is_some()
    }

    pub fn set_bitmap(&self, bitmap: Bitmap) {
        self.state.lock().bitmap = Some(Arc::new(bitmap));
    }

    /// Store a decoded bitmap if the block still belongs to grid
    /// `generation` and is in bound. Check and store happen under one lock.
    pub fn store_if_current(&self, generation: u64, bitmap: Bitmap) -> bool {
        let mut state = self.state.lock();
        if self.generation != generation || !state.in_bound {
            return false;
        }
        state.bitmap = Some(Arc::new(bitmap));
        true
    }

    /// Drop the decoded bitmap, if any.
    pub fn release(&self) {
        self.state.lock().bitmap = None;
    }
}

/// 2-D grid of [`RenderBlock`]s for one divisor.
#[derive(Debug, Default)]
pub struct BlockGrid {
    width: u32,
    height: u32,
    block_size: u32,
    count_w: usize,
    count_h: usize,
    max_block_count: u32,
    generation: u64,
    rows: Vec<Vec<Arc<RenderBlock>>>,
}

impl BlockGrid {
    /// Build the grid for a display-space `width x height` image with
    /// `divisor` blocks along the longest side.
    pub fn build(width: u32, height: u32, divisor: u32, generation: u64) -> Self {
        let divisor = divisor.max(1);
        let block_size = (width.max(height) / divisor).max(1);
        let count_w = width.div_ceil(block_size) as usize;
        let count_h = height.div_ceil(block_size) as usize;

        let rows = (0..count_h)
            .map(|row| {
                let top = row as u32 * block_size;
                let bottom = (top + block_size).min(height);
                (0..count_w)
                    .map(|column| {
                        let left = column as u32 * block_size;
                        let right = (left + block_size).min(width);
                        Arc::new(RenderBlock::new(
                            PixelRect::new(left, top, right, bottom),
                            row,
                            column,
                            generation,
                        ))
                    })
                    .collect()
            })
            .collect();

        debug!(
            width,
            height, divisor, block_size, count_w, count_h, generation, "Built block grid"
        );

        Self {
            width,
            height,
            block_size,
            count_w,
            count_h,
            max_block_count: divisor,
            generation,
            rows,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Blocks per row.
    pub fn count_w(&self) -> usize {
        self.count_w
    }

    /// Number of rows.
    pub fn count_h(&self) -> usize {
        self.count_h
    }

    /// Divisor the grid was built with; 0 for an empty grid.
    pub fn max_block_count(&self) -> u32 {
        self.max_block_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rows(&self) -> &[Vec<Arc<RenderBlock>>] {
        &self.rows
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<RenderBlock>> {
        self.rows.iter().flatten()
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&Arc<RenderBlock>> {
        self.rows.get(row)?.get(column)
    }

    pub fn len(&self) -> usize {
        self.count_w * self.count_h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every block's bitmap.
    pub fn clear_all_bitmaps(&self) {
        for block in self.blocks() {
            block.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Count how many blocks cover each pixel.
    fn coverage(grid: &BlockGrid) -> Vec<u32> {
        let (w, h) = (grid.width() as usize, grid.height() as usize);
        let mut hits = vec![0u32; w * h];
        for block in grid.blocks() {
            let r = block.slice_rect();
            assert!(!r.is_empty(), "empty block at {:?}", r);
            assert!(r.right as usize <= w && r.bottom as usize <= h);
            for y in r.top..r.bottom {
                for x in r.left..r.right {
                    hits[y as usize * w + x as usize] += 1;
                }
            }
        }
        hits
    }

    #[test]
    fn test_grid_tiles_exactly() {
        let sizes = [(64, 48), (101, 37), (37, 101), (250, 250), (33, 8), (7, 5)];
        for (w, h) in sizes {
            for divisor in [1, 4, 8] {
                let grid = BlockGrid::build(w, h, divisor, 1);
                let hits = coverage(&grid);
                assert!(
                    hits.iter().all(|&n| n == 1),
                    "gap or overlap for {}x{} divisor {}",
                    w,
                    h,
                    divisor
                );
            }
        }
    }

    #[test]
    fn test_grid_dimensions() {
        let grid = BlockGrid::build(4000, 3000, 8, 1);
        assert_eq!(grid.block_size(), 500);
        assert_eq!(grid.count_w(), 8);
        assert_eq!(grid.count_h(), 6);
        assert_eq!(grid.len(), 48);

        let grid = BlockGrid::build(4000, 3000, 1, 1);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.block_size(), 4000);
        assert_eq!(grid.get(0, 0).unwrap().slice_rect(), PixelRect::new(0, 0, 4000, 3000));
    }

    #[test]
    fn test_last_column_is_clipped() {
        let grid = BlockGrid::build(4001, 3000, 8, 1);
        assert_eq!(grid.block_size(), 500);
        assert_eq!(grid.count_w(), 9);
        let last = grid.get(0, 8).unwrap();
        assert_eq!(last.slice_rect(), PixelRect::new(4000, 0, 4001, 500));
    }

    #[test]
    fn test_empty_grid() {
        let grid = BlockGrid::build(0, 0, 4, 1);
        assert!(grid.is_empty());
        assert_eq!(grid.blocks().count(), 0);
    }

    #[test]
    fn test_block_placement_change_detection() {
        let block = RenderBlock::new(PixelRect::new(0, 0, 10, 10), 0, 0, 1);
        assert!(block.update_placement(true, 1, IntOffset::new(0, 0), IntSize::new(10, 10)));
        // Same flags, new placement only
        assert!(!block.update_placement(true, 1, IntOffset::new(5, 5), IntSize::new(12, 12)));
        assert_eq!(block.render_offset(), IntOffset::new(5, 5));
        assert!(block.update_placement(true, 2, IntOffset::new(5, 5), IntSize::new(12, 12)));
    }

    #[test]
    fn test_block_bitmap_release() {
        let block = RenderBlock::new(PixelRect::new(0, 0, 2, 2), 0, 0, 1);
        block.set_bitmap(Bitmap::new(2, 2));
        assert!(block.has_bitmap());
        block.release();
        assert!(block.bitmap().is_none());
    }

    #[test]
    fn test_store_if_current_checks_bound_and_generation() {
        let block = RenderBlock::new(PixelRect::new(0, 0, 2, 2), 0, 0, 3);
        // Not placed yet, so not in bound
        assert!(!block.store_if_current(3, Bitmap::new(2, 2)));

        block.update_placement(true, 1, IntOffset::new(0, 0), IntSize::new(2, 2));
        assert!(!block.store_if_current(4, Bitmap::new(2, 2)));
        assert!(!block.has_bitmap());
        assert!(block.store_if_current(3, Bitmap::new(2, 2)));
        assert!(block.has_bitmap());

        block.update_placement(false, 1, IntOffset::new(0, 0), IntSize::new(2, 2));
        block.release();
        assert!(!block.store_if_current(3, Bitmap::new(2, 2)));
        assert!(!block.has_bitmap());
    }

    #[test]
    fn test_store_racing_scroll_out_leaves_no_bitmap() {
        let block = Arc::new(RenderBlock::new(PixelRect::new(0, 0, 2, 2), 0, 0, 1));
        block.update_placement(true, 1, IntOffset::new(0, 0), IntSize::new(2, 2));

        let worker = {
            let block = Arc::clone(&block);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    block.store_if_current(1, Bitmap::new(1, 1));
                }
            })
        };
        std::thread::yield_now();
        block.update_placement(false, 1, IntOffset::new(0, 0), IntSize::new(2, 2));
        block.release();
        worker.join().unwrap();

        assert!(!block.has_bitmap());
    }
}
