//! Viewport geometry and tile planning.

mod geometry;
mod planner;

pub use geometry::{calculate_in_sample_size, IntOffset, IntSize, Offset, PixelRect, Rect, Size};
pub use planner::{select_divisor, PlanOutcome, ViewportPlanner, MAX_DIVISOR};

/// What the user currently sees, relative to the whole content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Zoom relative to the 1x (fit) display size.
    pub scale: f64,
    /// Visible part of the content, normalized to `[0, 1]`.
    pub visible_rect: Rect,
}

impl Viewport {
    pub fn new(scale: f64, visible_rect: Rect) -> Self {
        Self {
            scale,
            visible_rect,
        }
    }

    /// Whole content visible at 1x.
    pub fn full() -> Self {
        Self::new(1.0, Rect::new(0.0, 0.0, 1.0, 1.0))
    }

    pub fn is_empty(&self) -> bool {
        self.visible_rect.width() <= 0.0 || self.visible_rect.height() <= 0.0
    }
}
