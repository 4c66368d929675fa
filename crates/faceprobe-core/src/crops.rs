//! Purpose-specific face crops derived from the aligned eye geometry.
//!
//! All rectangles are anchored at the eye midpoint and sized from the
//! inter-eye distance, so the crops are invariant to face size.

use crate::geometry::{self, AffineTransform, CropRect};
use crate::landmarks::LandmarkSet;
use crate::types::{BoundingBox, EyeGeometry};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

pub const ATTRIBUTE_SIZE: u32 = 60;
pub const LIVENESS_SIZE: u32 = 320;
pub const VISUALIZATION_WIDTH: u32 = 128;
pub const VISUALIZATION_HEIGHT: u32 = 144;

/// Attribute crop side in units of inter-eye distance.
const ATTRIBUTE_SCALE: f32 = 3.52;
const OVERLAY_DOT_RADIUS: i32 = 2;
const OVERLAY_DOT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Crop rectangles in the eye-leveled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropLayout {
    pub attribute: CropRect,
    pub liveness: CropRect,
    pub visualization: CropRect,
}

impl CropLayout {
    pub fn from_eyes(eyes: &EyeGeometry) -> Self {
        let d = eyes.inter_eye_distance;
        let (cx, cy) = (eyes.center.x, eyes.center.y);

        let size = (d * ATTRIBUTE_SCALE).trunc();
        let attribute = CropRect {
            x: (cx - 0.5 * size) as i32,
            y: (cy - size * 0.5) as i32,
            w: size as i32,
            h: size as i32,
        };

        // Liveness: eyes centered horizontally, 40% down from the top.
        let ratio = liveness_ratio(d);
        let liveness = CropRect {
            x: cx as i32 - (ratio * 160.0) as i32,
            y: (cy - 128.0 * ratio) as i32,
            w: (320.0 * ratio) as i32,
            h: (320.0 * ratio) as i32,
        };

        let ratio2 = d / 64.0;
        let visualization = CropRect {
            x: cx as i32 - (ratio2 * 64.0) as i32,
            y: (cy - 44.0 * ratio2) as i32,
            w: (128.0 * ratio) as i32,
            h: (144.0 * ratio) as i32,
        };

        Self {
            attribute,
            liveness,
            visualization,
        }
    }
}

/// Liveness crop scale: `2 · (1 + 0.75·d) · 3.5 / 320`.
pub fn liveness_ratio(inter_eye_distance: f32) -> f32 {
    (2.0 * (1.0 + inter_eye_distance * 0.75)) * 3.5 / 320.0
}

/// The fixed-resolution crops fed to downstream networks and debug views.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedCrops {
    /// 60×60 color, input to the age/gender network.
    pub attribute: RgbImage,
    /// 320×320 color, input to the liveness network.
    pub liveness: RgbImage,
    /// 128×144 grayscale, for display only.
    pub visualization: GrayImage,
}

/// Level the eye line by rotating the whole image about the eye midpoint,
/// then cut and resize every crop in [`CropLayout`].
pub fn synthesize(image: &RgbImage, eyes: &EyeGeometry) -> AlignedCrops {
    let leveled = AffineTransform::rotation(eyes.center, eyes.roll_angle).apply_to_image(image);
    let layout = CropLayout::from_eyes(eyes);

    let attribute = geometry::resize(
        &layout.attribute.crop(&leveled),
        ATTRIBUTE_SIZE,
        ATTRIBUTE_SIZE,
    );
    let liveness = geometry::resize(
        &layout.liveness.crop(&leveled),
        LIVENESS_SIZE,
        LIVENESS_SIZE,
    );
    let visualization = geometry::to_gray(&geometry::resize(
        &layout.visualization.crop(&leveled),
        VISUALIZATION_WIDTH,
        VISUALIZATION_HEIGHT,
    ));

    AlignedCrops {
        attribute,
        liveness,
        visualization,
    }
}

/// Draw `landmarks` onto a copy of the unrotated source image and cut out the
/// detected box.
///
/// The cut is requested one pixel wider and taller than the box and
/// [`padded_crop`](geometry::padded_crop) adds its own inclusive pixel, so the
/// overlay is `(width + 2) × (height + 2)`.
pub fn landmark_overlay(image: &RgbImage, bbox: &BoundingBox, landmarks: &LandmarkSet) -> RgbImage {
    let mut canvas = image.clone();
    for p in landmarks.points() {
        draw_filled_circle_mut(
            &mut canvas,
            (p.x as i32, p.y as i32),
            OVERLAY_DOT_RADIUS,
            OVERLAY_DOT_COLOR,
        );
    }
    let rect = CropRect {
        x: bbox.left as i32,
        y: bbox.top as i32,
        w: bbox.width() as i32 + 1,
        h: bbox.height() as i32 + 1,
    };
    rect.crop(&canvas)
}
