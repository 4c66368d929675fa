//! 113-point facial landmark set and the shape model the landmark networks regress against.

use crate::types::Point;
use std::ops::Range;

pub const LANDMARK_COUNT: usize = 113;

const LEFT_EYE: Range<usize> = 57..69;
const RIGHT_EYE: Range<usize> = 69..81;

/// Upper/lower inner-lip point pairs, outer corners first.
const INNER_LIP_PAIRS: [(usize, usize); 3] = [(106, 112), (107, 111), (108, 110)];

/// Squared distance under which an inner-lip pair counts as collapsed.
const INNER_LIP_MIN_DIST_SQ: f32 = 0.1;

/// Mean face shape in units of half the network input size, as interleaved (x, y).
#[rustfmt::skip]
pub const SHAPE_MODEL: [f32; LANDMARK_COUNT * 2] = [
    0.237826, 0.483403, 0.23452599, 0.583606, 0.233119,
    0.68341398, 0.234304, 0.78207201, 0.24113999, 0.88146299,
    0.25445601, 0.98053998, 0.274923, 1.07964, 0.30010599,
    1.17435, 0.33293301, 1.26717, 0.37198099, 1.35163, 0.42019001,
    1.4320101, 0.47444299, 1.50337, 0.53546101, 1.57005,
    0.60001898, 1.62968, 0.669393, 1.68459, 0.743249, 1.73281,
    0.824705, 1.77175, 0.91355598, 1.79583, 1.00761, 1.80226,
    1.10069, 1.79591, 1.19055, 1.77174, 1.27108, 1.7331899,
    1.34586, 1.68451, 1.4143699, 1.6302, 1.47979, 1.56998,
    1.53985, 1.50394, 1.59488, 1.4319299, 1.64231, 1.35224,
    1.68211, 1.2671, 1.71429, 1.17494, 1.73997, 1.07954,
    1.75981, 0.98109603, 1.77353, 0.88134402, 1.77997, 0.78266799,
    1.7815, 0.68330598, 1.7797101, 0.58351398, 1.77736,
    0.48331499, 0.42815101, 0.331536, 0.49587101, 0.252868,
    0.58939898, 0.22267701, 0.69432801, 0.224355, 0.793724,
    0.248253, 0.86448902, 0.320492, 0.77540201, 0.324074,
    0.68621403, 0.31353301, 0.59634799, 0.310624, 0.51176602,
    0.32030201, 1.15092, 0.320481, 1.22167, 0.24822401,
    1.32107, 0.22433101, 1.42601, 0.222638, 1.51961, 0.25281,
    1.58725, 0.331478, 1.5037, 0.320252, 1.4190201, 0.31059,
    1.32916, 0.31349, 1.23999, 0.32404, 0.53237897, 0.51341498,
    0.57020998, 0.48187599, 0.61657101, 0.462832, 0.671148,
    0.455275, 0.72714299, 0.46329501, 0.77389199, 0.486534,
    0.80923003, 0.525123, 0.76439798, 0.53624398, 0.71833497,
    0.54415202, 0.668935, 0.54775602, 0.61870098, 0.543966,
    0.57374799, 0.53281403, 1.20622, 0.52510399, 1.24149,
    0.486514, 1.28828, 0.46329001, 1.34429, 0.45524499,
    1.39888, 0.46279699, 1.44521, 0.48181501, 1.48307, 0.51337999,
    1.44169, 0.53272998, 1.39685, 0.543935, 1.3465199, 0.547732,
    1.29711, 0.54411399, 1.25105, 0.53621697, 0.91036898,
    0.494387, 0.90331, 0.64266998, 0.876818, 0.79386699,
    0.79013002, 0.88744998, 0.82932401, 0.99425799, 0.96432298,
    1.00447, 1.05118, 1.00447, 1.1862, 0.99426401, 1.2254,
    0.88742501, 1.13869, 0.79384798, 1.11215, 0.64265603,
    1.1051199, 0.49437299, 0.74025601, 1.27909, 0.82153898,
    1.21007, 0.92972302, 1.16291, 1.0077699, 1.17785, 1.08587,
    1.16295, 1.194, 1.21008, 1.2753, 1.27907, 1.20895, 1.35777,
    1.12245, 1.413, 1.00782, 1.43376, 0.89314598, 1.41302,
    0.80662, 1.35773, 0.76710898, 1.28056, 0.881082, 1.25333,
    1.0077699, 1.25087, 1.13446, 1.2532901, 1.2483701, 1.28056,
    1.1353, 1.30952, 1.00776, 1.32513, 0.88025498, 1.30953,
];

/// An ordered set of 113 facial landmarks in a fixed anatomical order.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: [Point; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(points: [Point; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Decode a landmark network's offset field against the shape model.
    ///
    /// `offsets` holds interleaved (x, y) offsets; each point is
    /// `(shape + offset) * scale` in network-input pixels. Returns `None` if
    /// fewer than 226 values are supplied.
    pub fn from_offsets(offsets: &[f32], scale: f32) -> Option<Self> {
        if offsets.len() < LANDMARK_COUNT * 2 {
            return None;
        }
        let points = std::array::from_fn(|i| {
            Point::new(
                (SHAPE_MODEL[2 * i] + offsets[2 * i]) * scale,
                (SHAPE_MODEL[2 * i + 1] + offsets[2 * i + 1]) * scale,
            )
        });
        Some(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn left_eye_cluster(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    pub fn right_eye_cluster(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    pub fn left_eye_center(&self) -> Point {
        Point::mean(self.left_eye_cluster())
    }

    pub fn right_eye_center(&self) -> Point {
        Point::mean(self.right_eye_cluster())
    }

    /// Roll angle in radians of the vector from the left to the right eye center.
    pub fn roll_angle(&self) -> f32 {
        let l = self.left_eye_center();
        let r = self.right_eye_center();
        (r.y - l.y).atan2(r.x - l.x)
    }

    /// Square covering every point, scaled by `margin` and centered on the
    /// point-cloud bounds: `(left, top, side)`.
    pub fn min_rect(&self, margin: f32) -> (f32, f32, f32) {
        let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
        let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
        for p in &self.points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        let side = (max_x - min_x).max(max_y - min_y) * margin;
        let cx = (min_x + max_x) * 0.5;
        let cy = (min_y + max_y) * 0.5;
        (cx - side * 0.5, cy - side * 0.5, side)
    }

    /// Merge inner-lip pairs the refined network gets wrong.
    ///
    /// When an upper inner-lip point sits below its lower partner, or the two
    /// nearly coincide, both collapse onto their midpoint (closed mouth).
    pub fn correct_inner_lips(&self) -> Self {
        let mut points = self.points;
        for (upper, lower) in INNER_LIP_PAIRS {
            let (u, l) = (points[upper], points[lower]);
            let dist_sq = (u.x - l.x).powi(2) + (u.y - l.y).powi(2);
            if u.y > l.y || dist_sq < INNER_LIP_MIN_DIST_SQ {
                let mid = u.midpoint(&l);
                points[upper] = mid;
                points[lower] = mid;
            }
        }
        Self { points }
    }

    /// Apply `f` to every point.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self {
            points: self.points.map(f),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Landmarks at the shape model, with both eye clusters replaced by small
    /// rings around the given centers.
    pub(crate) fn synthetic_landmarks(left: Point, right: Point) -> LandmarkSet {
        let base = LandmarkSet::from_offsets(&[0.0; LANDMARK_COUNT * 2], 32.0).unwrap();
        let mut points = base.points;
        for (k, idx) in LEFT_EYE.enumerate() {
            let a = k as f32 * std::f32::consts::TAU / 12.0;
            points[idx] = Point::new(left.x + 2.0 * a.cos(), left.y + 2.0 * a.sin());
        }
        for (k, idx) in RIGHT_EYE.enumerate() {
            let a = k as f32 * std::f32::consts::TAU / 12.0;
            points[idx] = Point::new(right.x + 2.0 * a.cos(), right.y + 2.0 * a.sin());
        }
        LandmarkSet::new(points)
    }

    #[test]
    fn test_from_offsets_zero_is_shape_model() {
        let set = LandmarkSet::from_offsets(&[0.0; 226], 64.0).unwrap();
        assert!((set.points()[0].x - 0.237826 * 64.0).abs() < 1e-4);
        assert!((set.points()[112].y - 1.30953 * 64.0).abs() < 1e-4);
    }

    #[test]
    fn test_from_offsets_too_short() {
        assert!(LandmarkSet::from_offsets(&[0.0; 225], 32.0).is_none());
    }

    #[test]
    fn test_eye_clusters_have_twelve_points() {
        let set = LandmarkSet::from_offsets(&[0.0; 226], 32.0).unwrap();
        assert_eq!(set.left_eye_cluster().len(), 12);
        assert_eq!(set.right_eye_cluster().len(), 12);
        assert!(set.left_eye_center().x < set.right_eye_center().x);
    }

    #[test]
    fn test_roll_angle_horizontal() {
        let set = synthetic_landmarks(Point::new(40.0, 50.0), Point::new(80.0, 50.0));
        assert!(set.roll_angle().abs() < 1e-3);
    }

    #[test]
    fn test_roll_angle_recovers_rotation() {
        for theta in [-2.5f32, -0.6, 0.3, 1.2, 3.0] {
            let left = Point::new(100.0, 100.0);
            let right = Point::new(100.0 + 40.0 * theta.cos(), 100.0 + 40.0 * theta.sin());
            let set = synthetic_landmarks(left, right);
            let got = set.roll_angle();
            let diff = (got - theta).rem_euclid(std::f32::consts::TAU);
            let diff = diff.min(std::f32::consts::TAU - diff);
            assert!(diff < 1e-3, "theta {theta}: got {got}");
        }
    }

    #[test]
    fn test_min_rect_is_centered_square() {
        let set = LandmarkSet::from_offsets(&[0.0; 226], 32.0).unwrap();
        let (left, top, side) = set.min_rect(1.25);
        let xs: Vec<f32> = set.points().iter().map(|p| p.x).collect();
        let ys: Vec<f32> = set.points().iter().map(|p| p.y).collect();
        let min_x = xs.iter().cloned().fold(f32::MAX, f32::min);
        let max_x = xs.iter().cloned().fold(f32::MIN, f32::max);
        let min_y = ys.iter().cloned().fold(f32::MAX, f32::min);
        let max_y = ys.iter().cloned().fold(f32::MIN, f32::max);
        let expected = (max_x - min_x).max(max_y - min_y) * 1.25;
        assert!((side - expected).abs() < 1e-4);
        assert!((left + side * 0.5 - (min_x + max_x) * 0.5).abs() < 1e-4);
        assert!((top + side * 0.5 - (min_y + max_y) * 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_inner_lips_crossed_pair_is_merged() {
        let base = LandmarkSet::from_offsets(&[0.0; 226], 64.0).unwrap();
        let mut points = base.points;
        // Push the upper inner-lip point below its lower partner.
        points[107].y = points[111].y + 5.0;
        let corrected = LandmarkSet::new(points).correct_inner_lips();
        let (u, l) = (corrected.points()[107], corrected.points()[111]);
        assert!(u.y <= l.y);
        assert_eq!(u, l);
        let expected_y = (points[107].y + points[111].y) * 0.5;
        assert!((u.y - expected_y).abs() < 1e-4);
    }

    #[test]
    fn test_inner_lips_open_mouth_untouched() {
        let base = LandmarkSet::from_offsets(&[0.0; 226], 64.0).unwrap();
        let corrected = base.correct_inner_lips();
        assert_eq!(corrected, base);
    }

    #[test]
    fn test_inner_lips_coincident_pair_is_merged() {
        let base = LandmarkSet::from_offsets(&[0.0; 226], 64.0).unwrap();
        let mut points = base.points;
        points[110] = Point::new(points[108].x + 0.1, points[108].y - 0.1);
        let corrected = LandmarkSet::new(points).correct_inner_lips();
        assert_eq!(corrected.points()[108], corrected.points()[110]);
    }
}
