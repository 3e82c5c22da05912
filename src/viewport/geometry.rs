//! Small geometry types shared by the gesture controller, the planner and
//! the decoder.
//!
//! Floating point types (`Offset`, `Size`, `Rect`) live in container or
//! "real" (fully zoomed) pixel space. Integer types (`PixelRect`,
//! `IntOffset`, `IntSize`) address decoder pixels or rounded placement.

use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

impl Offset {
    pub const ZERO: Offset = Offset { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, rhs: Offset) -> Offset {
        Offset::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, rhs: Offset) -> Offset {
        Offset::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn scaled(&self, factor: f64) -> Size {
        Size::new(self.width * factor, self.height * factor)
    }
}

/// Edge-based rectangle (`left <= right`, `top <= bottom`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_origin_size(origin: Offset, size: Size) -> Self {
        Self::new(
            origin.x,
            origin.y,
            origin.x + size.width,
            origin.y + size.height,
        )
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Overlapping part of two rectangles, or `Rect::ZERO` when they only
    /// touch or do not meet at all.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);

        if left < right && top < bottom {
            Rect::new(left, top, right, bottom)
        } else {
            Rect::ZERO
        }
    }

    /// Inclusive overlap test: rectangles sharing only an edge count as
    /// touching.
    pub fn touches(&self, other: &Rect) -> bool {
        !(self.bottom < other.top
            || self.top > other.bottom
            || self.right < other.left
            || self.left > other.right)
    }
}

/// Pixel rectangle in decoder space, `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntOffset {
    pub x: i32,
    pub y: i32,
}

impl IntOffset {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Pick the downsample factor for decoding `src_width` pixels into a
/// destination `req_width` pixels wide.
///
/// Returns the smallest power of two `f` with `src_width / f < req_width`,
/// so a decoded bitmap is never wider than the space it is drawn into.
pub fn calculate_in_sample_size(src_width: u32, req_width: u32) -> u32 {
    if req_width == 0 {
        return 1;
    }

    let src = src_width as f64;
    let req = req_width as f64;
    let mut in_sample_size: u32 = 1;
    while src / in_sample_size as f64 >= req {
        match in_sample_size.checked_mul(2) {
            Some(next) => in_sample_size = next,
            None => break,
        }
    }
    in_sample_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_overlapping() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 25.0, 150.0, 75.0);
        assert_eq!(a.intersect(&b), Rect::new(50.0, 25.0, 100.0, 75.0));
    }

    #[test]
    fn test_intersect_disjoint_is_zero() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.intersect(&b), Rect::ZERO);
        // Sharing an edge still counts for in-bound checks
        assert!(a.touches(&b));
    }

    #[test]
    fn test_touches_separated() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.5, 0.0, 20.0, 10.0);
        assert!(!a.touches(&b));
    }

    #[test]
    fn test_sample_size_is_minimal_power_of_two() {
        for src in [1u32, 7, 100, 999, 1000, 1001, 4000, 4096, 12345, 60000] {
            for req in [1u32, 3, 100, 500, 720, 1000, 2048, 5000] {
                let f = calculate_in_sample_size(src, req);
                assert!(f.is_power_of_two(), "src={src} req={req} f={f}");
                assert!((src as f64 / f as f64) < req as f64, "src={src} req={req} f={f}");
                if f > 1 {
                    let half = (f / 2) as f64;
                    assert!((src as f64 / half) >= req as f64, "src={src} req={req} f={f}");
                }
            }
        }
    }

    #[test]
    fn test_sample_size_examples() {
        assert_eq!(calculate_in_sample_size(4000, 1000), 8);
        assert_eq!(calculate_in_sample_size(4000, 1001), 4);
        assert_eq!(calculate_in_sample_size(500, 1000), 1);
        assert_eq!(calculate_in_sample_size(4000, 0), 1);
    }

    #[test]
    fn test_pixel_rect_dimensions() {
        let r = PixelRect::new(10, 20, 30, 25);
        assert_eq!(r.width(), 20);
        assert_eq!(r.height(), 5);
        assert!(!r.is_empty());
        assert!(PixelRect::new(5, 5, 5, 9).is_empty());
    }
}
