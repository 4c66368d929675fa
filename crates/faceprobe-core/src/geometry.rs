//! Bounds-safe cropping and 2×3 affine transforms on images and points.

use crate::types::Point;
use image::{GrayImage, ImageBuffer, Luma, Pixel, RgbImage};

/// Crop a `(h + 1) × (w + 1)` region whose top-left corner is `(x, y)`.
///
/// Any part of the requested rectangle that falls outside the source is
/// zero-filled, so the output always has the exact requested size. Negative
/// `w`/`h` are treated as zero.
pub fn padded_crop<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let out_w = w.max(0) as u32 + 1;
    let out_h = h.max(0) as u32 + 1;
    let mut out = ImageBuffer::new(out_w, out_h);

    let (src_w, src_h) = (image.width() as i64, image.height() as i64);
    let (x, y) = (x as i64, y as i64);

    // Overlap of the requested rectangle with the source, in source coordinates.
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + out_w as i64).min(src_w);
    let y1 = (y + out_h as i64).min(src_h);

    for sy in y0..y1 {
        for sx in x0..x1 {
            let px = *image.get_pixel(sx as u32, sy as u32);
            out.put_pixel((sx - x) as u32, (sy - y) as u32, px);
        }
    }

    out
}

/// Integer crop rectangle; the crop covers `(w + 1) × (h + 1)` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl CropRect {
    pub fn crop<P: Pixel>(
        &self,
        image: &ImageBuffer<P, Vec<P::Subpixel>>,
    ) -> ImageBuffer<P, Vec<P::Subpixel>> {
        padded_crop(image, self.x, self.y, self.w, self.h)
    }
}

/// Convert an RGB image to 8-bit luma with BT.601 weights.
///
/// The landmark and face-check networks were trained on this conversion, which
/// differs from the Rec. 709 weights `image::imageops::grayscale` uses.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Bilinear resize to an exact size.
pub fn resize<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    image::imageops::resize(image, width, height, image::imageops::FilterType::Triangle)
}

/// A 2×3 affine matrix:
/// ```text
/// | m[0]  m[1]  m[2] |
/// | m[3]  m[4]  m[5] |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m: [f32; 6],
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    };

    /// Rotation by `angle` radians about `center`, unit scale.
    ///
    /// Uses the image-space convention where a positive angle turns content
    /// counter-clockwise on screen (y axis pointing down). Rotating an image
    /// by a face's roll angle therefore levels the eye line.
    pub fn rotation(center: Point, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            m: [
                cos,
                sin,
                (1.0 - cos) * center.x - sin * center.y,
                -sin,
                cos,
                sin * center.x + (1.0 - cos) * center.y,
            ],
        }
    }

    /// Map a point through the transform.
    pub fn apply(&self, p: Point) -> Point {
        let m = &self.m;
        Point::new(
            m[0] * p.x + m[1] * p.y + m[2],
            m[3] * p.x + m[4] * p.y + m[5],
        )
    }

    /// Inverse transform, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.m;
        let det = m[0] * m[4] - m[1] * m[3];
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = m[4] * inv_det;
        let b = -m[1] * inv_det;
        let d = -m[3] * inv_det;
        let e = m[0] * inv_det;
        Some(Self {
            m: [
                a,
                b,
                -(a * m[2] + b * m[5]),
                d,
                e,
                -(d * m[2] + e * m[5]),
            ],
        })
    }

    /// Warp an image through the transform onto a canvas of the same size.
    ///
    /// Uses bilinear interpolation. Pixels that map outside the source are
    /// filled with 0 (black).
    pub fn apply_to_image<P>(&self, image: &ImageBuffer<P, Vec<u8>>) -> ImageBuffer<P, Vec<u8>>
    where
        P: Pixel<Subpixel = u8>,
    {
        let (width, height) = image.dimensions();
        let mut output = ImageBuffer::new(width, height);
        let Some(inv) = self.inverse() else {
            return output;
        };
        let channels = P::CHANNEL_COUNT as usize;

        for oy in 0..height {
            for ox in 0..width {
                // Map output pixel back to source.
                let src = inv.apply(Point::new(ox as f32, oy as f32));

                let x0 = src.x.floor() as i64;
                let y0 = src.y.floor() as i64;
                let fx = src.x - x0 as f32;
                let fy = src.y - y0 as f32;

                let sample = |x: i64, y: i64, c: usize| -> f32 {
                    if x >= 0 && x < width as i64 && y >= 0 && y < height as i64 {
                        image.get_pixel(x as u32, y as u32).channels()[c] as f32
                    } else {
                        0.0
                    }
                };

                let out_px = output.get_pixel_mut(ox, oy).channels_mut();
                for c in 0..channels {
                    let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                        + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                        + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                        + sample(x0 + 1, y0 + 1, c) * fx * fy;
                    out_px[c] = val.round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        output
    }
}
