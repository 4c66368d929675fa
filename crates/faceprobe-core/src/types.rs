use serde::{Deserialize, Serialize};

/// A 2-D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Midpoint between `self` and `other`.
    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    /// Arithmetic mean of a non-empty point slice. Returns the origin for an empty slice.
    pub fn mean(points: &[Point]) -> Point {
        if points.is_empty() {
            return Point::default();
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }
}

/// Axis-aligned face box in image pixel coordinates.
///
/// Boxes emitted by the detector are square (`width() == height()`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub const fn new(left: f32, right: f32, top: f32, bottom: f32) -> Self {
        Self { left, right, top, bottom }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) * 0.5,
            (self.top + self.bottom) * 0.5,
        )
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.left * factor,
            self.right * factor,
            self.top * factor,
            self.bottom * factor,
        )
    }

    /// Square box of side `trunc(max(width, height))` centered on this box's center.
    ///
    /// Edges are truncated to whole pixels, so the result is square by construction.
    pub fn to_square(&self) -> Self {
        let center = self.center();
        let size = self.width().max(self.height()).trunc();
        let left = (center.x - size * 0.5).trunc();
        let top = (center.y - size * 0.5).trunc();
        Self::new(left, left + size, top, top + size)
    }

    /// Intersection-over-Union with `other`.
    ///
    /// Both extents get a small additive epsilon so that zero-area boxes never
    /// divide by zero.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let area_a = (self.width() + IOU_EPSILON) * (self.height() + IOU_EPSILON);
        let area_b = (other.width() + IOU_EPSILON) * (other.height() + IOU_EPSILON);

        let x1 = self.left.max(other.left);
        let y1 = self.top.max(other.top);
        let x2 = self.right.min(other.right);
        let y2 = self.bottom.min(other.bottom);

        let inter_w = (x2 - x1 + IOU_EPSILON).max(0.0);
        let inter_h = (y2 - y1 + IOU_EPSILON).max(0.0);
        let inter_area = inter_w * inter_h;

        let union_area = area_a + area_b - inter_area;
        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

const IOU_EPSILON: f32 = 0.001;

/// Eye positions derived from the refined landmark set.
///
/// Every downstream crop is sized from `inter_eye_distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeGeometry {
    pub left_eye: Point,
    pub right_eye: Point,
    pub inter_eye_distance: f32,
    /// In-plane rotation in radians, from the left-to-right eye vector.
    pub roll_angle: f32,
    /// Eye midpoint, truncated to whole pixels.
    pub center: Point,
}

impl EyeGeometry {
    pub fn from_eyes(left_eye: Point, right_eye: Point) -> Self {
        let mid = left_eye.midpoint(&right_eye);
        Self {
            left_eye,
            right_eye,
            inter_eye_distance: left_eye.distance(&right_eye),
            roll_angle: (right_eye.y - left_eye.y).atan2(right_eye.x - left_eye.x),
            center: Point::new(mid.x.trunc(), mid.y.trunc()),
        }
    }

    pub fn roll_degrees(&self) -> f32 {
        self.roll_angle.to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 100.0, 0.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 10.0, 0.0, 10.0);
        let b = BoundingBox::new(20.0, 30.0, 20.0, 30.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 10.0, 0.0, 10.0);
        let b = BoundingBox::new(5.0, 15.0, 0.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-3);
    }

    #[test]
    fn test_iou_zero_area_boxes() {
        let a = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        let iou = a.iou(&a);
        assert!(iou.is_finite());
        assert!((iou - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_to_square_wide_and_tall() {
        for b in [
            BoundingBox::new(10.0, 90.0, 20.0, 50.0),
            BoundingBox::new(10.3, 31.9, 5.5, 77.25),
            BoundingBox::new(-40.0, 3.0, -2.0, 1.0),
        ] {
            let sq = b.to_square();
            assert_eq!(sq.width(), sq.height(), "{b:?} -> {sq:?}");
            assert_eq!(sq.width(), b.width().max(b.height()).trunc());
        }
    }

    #[test]
    fn test_to_square_keeps_center() {
        let b = BoundingBox::new(50.0, 130.0, 60.0, 100.0);
        let sq = b.to_square();
        assert_eq!(sq, BoundingBox::new(50.0, 130.0, 40.0, 120.0));
    }

    #[test]
    fn test_eye_geometry_horizontal() {
        let g = EyeGeometry::from_eyes(Point::new(10.0, 20.0), Point::new(30.0, 20.0));
        assert!((g.inter_eye_distance - 20.0).abs() < 1e-6);
        assert!(g.roll_angle.abs() < 1e-6);
        assert_eq!(g.center, Point::new(20.0, 20.0));
    }

    #[test]
    fn test_point_mean() {
        let pts = [Point::new(0.0, 0.0), Point::new(2.0, 4.0)];
        assert_eq!(Point::mean(&pts), Point::new(1.0, 2.0));
        assert_eq!(Point::mean(&[]), Point::default());
    }
}
