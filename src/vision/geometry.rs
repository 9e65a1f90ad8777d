//! Axis-aligned box geometry
//!
//! Integer pixel rectangles and the overlap arithmetic used by the
//! duplicate filter, the word splitter and the reading-order sorter.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in page pixel coordinates.
///
/// Corners are `(x1, y1)` top-left and `(x2, y2)` bottom-right, exclusive.
/// Stages that adjust coordinates return a new box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    /// Area in square pixels (0 for degenerate boxes)
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) as f32 / 2.0
    }

    /// True when the box has positive width and height
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Divide vertical coordinates by `factor` (undo a vertical stretch)
    pub fn unscale_y(&self, factor: u32) -> Self {
        let f = factor.max(1) as i32;
        Self::new(self.x1, self.y1.div_euclid(f), self.x2, self.y2.div_euclid(f))
    }

    /// Move a crop-relative box into page coordinates
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Grow the box multiplicatively: the top-left corner is scaled by
    /// `1 - margin`, the bottom-right corner by `1 + margin`.
    pub fn expand_pct(&self, margin: f64) -> Self {
        let lo = 1.0 - margin;
        let hi = 1.0 + margin;
        Self::new(
            (self.x1 as f64 * lo) as i32,
            (self.y1 as f64 * lo) as i32,
            (self.x2 as f64 * hi) as i32,
            (self.y2 as f64 * hi) as i32,
        )
    }

    /// Clamp to `[0, width] x [0, height]`. Returns `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let clamped = Self::new(
            self.x1.max(0),
            self.y1.max(0),
            self.x2.min(width as i32),
            self.y2.min(height as i32),
        );
        clamped.is_valid().then_some(clamped)
    }

    /// Convert to an `imageproc` rectangle for drawing
    pub fn to_rect(&self) -> Option<imageproc::rect::Rect> {
        self.is_valid().then(|| {
            imageproc::rect::Rect::at(self.x1, self.y1)
                .of_size(self.width() as u32, self.height() as u32)
        })
    }
}

/// Overlap area of two boxes. Never negative.
pub fn intersection_area(a: &BoundingBox, b: &BoundingBox) -> i64 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0) as i64;
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0) as i64;
    w * h
}

/// Intersection divided by the smaller of the two areas
pub fn overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let smaller = a.area().min(b.area());
    if smaller == 0 {
        return 0.0;
    }
    intersection_area(a, b) as f32 / smaller as f32
}

/// Intersection over union (0 when both boxes are degenerate)
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = intersection_area(a, b);
    let union = a.area() + b.area() - inter;
    if union <= 0 {
        return 0.0;
    }
    inter as f32 / union as f32
}

/// True if `inner` lies entirely inside `outer`
pub fn contains(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    inner.x1 >= outer.x1 && inner.y1 >= outer.y1 && inner.x2 <= outer.x2 && inner.y2 <= outer.y2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_overlapping() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 15, 15);
        assert_eq!(intersection_area(&a, &b), 25);
        assert_eq!(intersection_area(&b, &a), 25);
    }

    #[test]
    fn test_intersection_disjoint_is_zero() {
        // Disjoint on both axes: both raw dimensions negative, product would be positive
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(intersection_area(&a, &b), 0);

        // Touching edges
        let c = BoundingBox::new(10, 0, 20, 10);
        assert_eq!(intersection_area(&a, &c), 0);
    }

    #[test]
    fn test_area_and_ratio() {
        let small = BoundingBox::new(0, 0, 10, 10);
        let big = BoundingBox::new(0, 0, 100, 100);
        assert_eq!(small.area(), 100);
        assert_eq!(big.area(), 10_000);
        assert!((overlap_ratio(&small, &big) - 1.0).abs() < f32::EPSILON);
        assert!(contains(&big, &small));
        assert!(!contains(&small, &big));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 15, 10);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&BoundingBox::new(0, 0, 0, 0), &BoundingBox::new(0, 0, 0, 0)), 0.0);
    }

    #[test]
    fn test_clamp_and_expand() {
        let b = BoundingBox::new(-5, -5, 50, 50);
        assert_eq!(b.clamp_to(40, 30), Some(BoundingBox::new(0, 0, 40, 30)));
        assert_eq!(BoundingBox::new(50, 50, 60, 60).clamp_to(40, 40), None);

        let e = BoundingBox::new(100, 100, 200, 200).expand_pct(0.01);
        assert_eq!(e, BoundingBox::new(99, 99, 202, 202));
    }

    #[test]
    fn test_unscale_y() {
        let b = BoundingBox::new(3, 40, 30, 81);
        assert_eq!(b.unscale_y(2), BoundingBox::new(3, 20, 30, 40));
        assert_eq!(b.unscale_y(0), b);
    }
}
