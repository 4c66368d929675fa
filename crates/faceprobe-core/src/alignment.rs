//! Two-stage landmark alignment.
//!
//! A coarse 64×64 landmark pass estimates the roll angle and a tight square
//! around the face; the image is rotated upright about that square and a
//! 128×128 pass refines the landmarks, which are mapped back into source image
//! coordinates. The refined eye clusters give the final [`EyeGeometry`].

use crate::geometry::{self, AffineTransform, CropRect};
use crate::landmarks::{LandmarkSet, LANDMARK_COUNT};
use crate::network::{self, Network};
use crate::pipeline::{FaceFailure, PipelineError};
use crate::types::{BoundingBox, EyeGeometry, Point};
use image::RgbImage;
use std::sync::Arc;

const COARSE_INPUT_SIZE: u32 = 64;
const COARSE_SHAPE_SCALE: f32 = 32.0;
const REFINED_INPUT_SIZE: u32 = 128;
const REFINED_SHAPE_SCALE: f32 = 64.0;
/// Growth applied on each side of the detected box for the coarse crop.
const EXTEND_RATIO: f32 = 0.1;
const MIN_RECT_MARGIN: f32 = 1.25;
/// Inter-eye distances below this (pixels) cannot size the downstream crops.
pub const MIN_INTER_EYE_DISTANCE: f32 = 1e-3;
/// Landmarks may stray at most this many image diagonals from the origin.
const MAX_LANDMARK_EXTENT: f32 = 2.0;
/// Largest accepted min-rect side, in image diagonals.
const MAX_MIN_RECT_SIDE: f32 = 2.0;
/// Largest accepted inter-eye distance, in image diagonals.
const MAX_INTER_EYE_DISTANCE: f32 = 0.5;

/// The detected box grown by 10% on each side, as an inclusive crop rectangle.
pub fn extended_rect(bbox: &BoundingBox) -> CropRect {
    let x = bbox.left.trunc();
    let y = bbox.top.trunc();
    let w = bbox.width().trunc() + 1.0;
    let h = bbox.height().trunc() + 1.0;
    CropRect {
        x: (x - w * EXTEND_RATIO) as i32,
        y: (y - h * EXTEND_RATIO) as i32,
        w: (w * (1.0 + 2.0 * EXTEND_RATIO)) as i32,
        h: (h * (1.0 + 2.0 * EXTEND_RATIO)) as i32,
    }
}

/// Square refinement region derived from the coarse landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinRect {
    pub left: f32,
    pub top: f32,
    pub side: f32,
}

impl MinRect {
    pub fn crop_rect(&self) -> CropRect {
        CropRect {
            x: self.left as i32,
            y: self.top as i32,
            w: self.side as i32,
            h: self.side as i32,
        }
    }

    /// Reject non-finite or oversized rects before anything is allocated for them.
    fn check(&self, diagonal: f32) -> Result<(), FaceFailure> {
        let finite = self.left.is_finite() && self.top.is_finite() && self.side.is_finite();
        if !finite || self.side > diagonal * MAX_MIN_RECT_SIDE {
            return Err(FaceFailure::MalformedLandmarks(format!(
                "min-rect ({}, {}) side {} out of range",
                self.left, self.top, self.side
            )));
        }
        Ok(())
    }

    /// Rotation pivot, truncated to whole pixels.
    pub fn pivot(&self) -> Point {
        Point::new(
            (self.left + self.side * 0.5).trunc(),
            (self.top + self.side * 0.5).trunc(),
        )
    }
}

/// Everything the aligner learned about one face.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFace {
    pub coarse: LandmarkSet,
    pub coarse_angle: f32,
    pub min_rect: MinRect,
    /// Refined landmarks in source image coordinates.
    pub refined: LandmarkSet,
    pub eyes: EyeGeometry,
}

pub struct LandmarkAligner {
    coarse: Arc<dyn Network>,
    refined: Arc<dyn Network>,
}

impl LandmarkAligner {
    pub fn new(coarse: Arc<dyn Network>, refined: Arc<dyn Network>) -> Self {
        Self { coarse, refined }
    }

    pub fn align(
        &self,
        image: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<AlignedFace, PipelineError> {
        let diagonal = (image.width() as f32).hypot(image.height() as f32);

        // Coarse pass on the extended box.
        let ext = extended_rect(bbox);
        let crop = ext.crop(image);
        let input = landmark_input(&crop, COARSE_INPUT_SIZE);
        let outputs = self.coarse.run(input)?;
        let offsets =
            network::first_output(self.coarse.as_ref(), &outputs, LANDMARK_COUNT * 2)?;
        let coarse = decode_coarse(&offsets, &ext).ok_or_else(|| {
            FaceFailure::MalformedLandmarks(format!(
                "coarse pass returned {} values",
                offsets.len()
            ))
        })?;
        check_extent(&coarse, diagonal, "coarse")?;

        let coarse_angle = coarse.roll_angle();
        let (left, top, side) = coarse.min_rect(MIN_RECT_MARGIN);
        let min_rect = MinRect { left, top, side };
        min_rect.check(diagonal)?;

        // Refined pass on the upright min-rect.
        let upright =
            AffineTransform::rotation(min_rect.pivot(), coarse_angle).apply_to_image(image);
        let crop = min_rect.crop_rect().crop(&upright);
        let input = landmark_input(&crop, REFINED_INPUT_SIZE);
        let outputs = self.refined.run(input)?;
        let offsets =
            network::first_output(self.refined.as_ref(), &outputs, LANDMARK_COUNT * 2)?;
        let refined = decode_refined(&offsets, coarse_angle, &min_rect).ok_or_else(|| {
            FaceFailure::MalformedLandmarks(format!(
                "refined pass returned {} values",
                offsets.len()
            ))
        })?;
        check_extent(&refined, diagonal, "refined")?;

        let eyes = EyeGeometry::from_eyes(refined.left_eye_center(), refined.right_eye_center());
        check_eyes(&eyes, diagonal)?;

        tracing::debug!(
            coarse_angle = coarse_angle.to_degrees(),
            roll = eyes.roll_degrees(),
            inter_eye = eyes.inter_eye_distance,
            "face aligned"
        );

        Ok(AlignedFace {
            coarse,
            coarse_angle,
            min_rect,
            refined,
            eyes,
        })
    }
}

/// Every point finite and within [`MAX_LANDMARK_EXTENT`] diagonals of the origin.
fn check_extent(set: &LandmarkSet, diagonal: f32, pass: &str) -> Result<(), FaceFailure> {
    let limit = diagonal * MAX_LANDMARK_EXTENT;
    let stray = set.points().iter().find(|p| {
        !(p.x.is_finite() && p.y.is_finite()) || p.x.abs() > limit || p.y.abs() > limit
    });
    match stray {
        Some(p) => Err(FaceFailure::MalformedLandmarks(format!(
            "{pass} landmark at ({}, {}) outside ±{limit}",
            p.x, p.y
        ))),
        None => Ok(()),
    }
}

/// Eyes must be apart enough to size the crops and close enough to fit the image.
fn check_eyes(eyes: &EyeGeometry, diagonal: f32) -> Result<(), FaceFailure> {
    let distance = eyes.inter_eye_distance;
    if !distance.is_finite() || distance < MIN_INTER_EYE_DISTANCE {
        return Err(FaceFailure::DegenerateEyes { distance });
    }
    if distance > diagonal * MAX_INTER_EYE_DISTANCE {
        return Err(FaceFailure::MalformedLandmarks(format!(
            "inter-eye distance {distance} exceeds half the image diagonal"
        )));
    }
    Ok(())
}

fn landmark_input(crop: &RgbImage, size: u32) -> ndarray::Array4<f32> {
    let resized = geometry::resize(crop, size, size);
    network::landmark_tensor(&geometry::to_gray(&resized))
}

/// Map coarse-network offsets into source image coordinates through the extended rect.
pub fn decode_coarse(offsets: &[f32], ext: &CropRect) -> Option<LandmarkSet> {
    let sx = ext.w as f32 / COARSE_INPUT_SIZE as f32;
    let sy = ext.h as f32 / COARSE_INPUT_SIZE as f32;
    let (ox, oy) = (ext.x as f32, ext.y as f32);
    let set = LandmarkSet::from_offsets(offsets, COARSE_SHAPE_SCALE)?;
    Some(set.map(|p| Point::new(p.x * sx + ox, p.y * sy + oy)))
}

/// Map refined-network offsets back into source image coordinates.
///
/// The network saw the upright min-rect crop, so points are corrected for
/// inner-lip crossings, rotated back by `angle` about the crop center and then
/// scaled and offset by the min-rect.
pub fn decode_refined(offsets: &[f32], angle: f32, min_rect: &MinRect) -> Option<LandmarkSet> {
    let half = REFINED_INPUT_SIZE as f32 * 0.5;
    let unrotate = AffineTransform::rotation(Point::new(half, half), -angle);
    let scale = min_rect.side / REFINED_INPUT_SIZE as f32;
    let set = LandmarkSet::from_offsets(offsets, REFINED_SHAPE_SCALE)?.correct_inner_lips();
    Some(set.map(|p| {
        let q = unrotate.apply(p);
        Point::new(q.x * scale + min_rect.left, q.y * scale + min_rect.top)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_rect() {
        let bbox = BoundingBox::new(50.0, 130.0, 40.0, 120.0);
        let ext = extended_rect(&bbox);
        // 81px face (inclusive), grown 8.1px each side.
        assert_eq!(ext, CropRect { x: 41, y: 31, w: 97, h: 97 });
    }

    #[test]
    fn test_decode_coarse_maps_through_rect() {
        let ext = CropRect { x: 10, y: 20, w: 128, h: 64 };
        let set = decode_coarse(&[0.0; 226], &ext).unwrap();
        let p = set.points()[0];
        assert!((p.x - (0.237826 * 32.0 * 2.0 + 10.0)).abs() < 1e-3);
        assert!((p.y - (0.483403 * 32.0 + 20.0)).abs() < 1e-3);
    }

    #[test]
    fn test_decode_refined_zero_angle_is_scale_and_offset() {
        let rect = MinRect { left: 100.0, top: 50.0, side: 256.0 };
        let set = decode_refined(&[0.0; 226], 0.0, &rect).unwrap();
        let p = set.points()[0];
        assert!((p.x - (0.237826 * 64.0 * 2.0 + 100.0)).abs() < 1e-3);
        assert!((p.y - (0.483403 * 64.0 * 2.0 + 50.0)).abs() < 1e-3);
    }

    #[test]
    fn test_decode_refined_undoes_image_rotation() {
        // A point seen in the upright crop must land where the upright rotation took it from.
        let rect = MinRect { left: 0.0, top: 0.0, side: 128.0 };
        let angle = 0.35f32;
        let upright = decode_refined(&[0.0; 226], 0.0, &rect).unwrap();
        let restored = decode_refined(&[0.0; 226], angle, &rect).unwrap();
        let forward = AffineTransform::rotation(Point::new(64.0, 64.0), angle);
        for (u, r) in upright.points().iter().zip(restored.points()) {
            let back = forward.apply(*r);
            assert!((back.x - u.x).abs() < 1e-3 && (back.y - u.y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_refined_keeps_roll() {
        let rect = MinRect { left: 0.0, top: 0.0, side: 128.0 };
        let angle = -0.2f32;
        let set = decode_refined(&[0.0; 226], angle, &rect).unwrap();
        let upright = decode_refined(&[0.0; 226], 0.0, &rect).unwrap();
        assert!((set.roll_angle() - (upright.roll_angle() + angle)).abs() < 1e-3);
    }

    #[test]
    fn test_min_rect_check_bounds_side() {
        let diagonal = 500.0;
        assert!(MinRect { left: -20.0, top: 10.0, side: 900.0 }.check(diagonal).is_ok());
        for bad in [
            MinRect { left: 0.0, top: 0.0, side: 1e6 },
            MinRect { left: f32::NAN, top: 0.0, side: 10.0 },
            MinRect { left: 0.0, top: f32::NEG_INFINITY, side: 10.0 },
            MinRect { left: 0.0, top: 0.0, side: f32::INFINITY },
        ] {
            assert!(
                matches!(bad.check(diagonal), Err(FaceFailure::MalformedLandmarks(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_check_extent_rejects_far_and_non_finite_points() {
        let ext = CropRect { x: 10, y: 20, w: 128, h: 128 };
        let set = decode_coarse(&[0.0; 226], &ext).unwrap();
        assert!(check_extent(&set, 200.0, "coarse").is_ok());

        let mut offsets = [0.0f32; 226];
        offsets[40] = 1e3;
        let far = decode_coarse(&offsets, &ext).unwrap();
        assert!(matches!(
            check_extent(&far, 200.0, "coarse"),
            Err(FaceFailure::MalformedLandmarks(_))
        ));

        offsets[40] = f32::NAN;
        let nan = decode_coarse(&offsets, &ext).unwrap();
        assert!(check_extent(&nan, 200.0, "coarse").is_err());
    }

    #[test]
    fn test_check_eyes() {
        let eyes = |d: f32| EyeGeometry::from_eyes(Point::new(0.0, 0.0), Point::new(d, 0.0));
        assert!(check_eyes(&eyes(30.0), 200.0).is_ok());
        assert!(matches!(
            check_eyes(&eyes(0.0), 200.0),
            Err(FaceFailure::DegenerateEyes { .. })
        ));
        assert!(matches!(
            check_eyes(&eyes(f32::INFINITY), 200.0),
            Err(FaceFailure::DegenerateEyes { .. })
        ));
        assert!(matches!(
            check_eyes(&eyes(150.0), 200.0),
            Err(FaceFailure::MalformedLandmarks(_))
        ));
    }

    #[test]
    fn test_min_rect_pivot_truncates() {
        let r = MinRect { left: 10.6, top: -3.2, side: 20.0 };
        assert_eq!(r.pivot(), Point::new(20.0, 6.0));
    }
}
