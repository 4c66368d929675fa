//! JSON-ready per-image report built from an [`ImageAnalysis`].

use crate::pipeline::{FaceAnalysis, FaceOutcome, ImageAnalysis};
use crate::types::{BoundingBox, Point};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, PixelWithColorType};
use serde::Serialize;

pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    /// Liveness scores above this are labeled real.
    pub liveness_threshold: f32,
    /// Embed every crop as a base64 JPEG.
    pub embed_crops: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            embed_crops: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    pub image_info: ImageInfo,
    pub face_count: usize,
    pub faces: Vec<FaceReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FaceReport {
    Analyzed(AnalyzedFace),
    Failed(FailedFace),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedFace {
    pub face_index: usize,
    pub age: String,
    pub age_estimate: f32,
    pub gender: &'static str,
    pub gender_score: f32,
    pub liveness: LivenessReport,
    /// Final roll angle in degrees.
    pub angle: f32,
    pub bounding_box: BoxReport,
    pub landmarks: Vec<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crops: Option<EmbeddedCrops>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFace {
    pub face_index: usize,
    pub bounding_box: BoxReport,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessReport {
    pub label: &'static str,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxReport {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl From<&BoundingBox> for BoxReport {
    fn from(b: &BoundingBox) -> Self {
        Self {
            left: b.left,
            top: b.top,
            width: b.width(),
            height: b.height(),
        }
    }
}

/// Base64-encoded JPEG crops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedCrops {
    pub attribute: String,
    pub liveness: String,
    pub visualization: String,
    pub overlay: String,
}

impl ImageReport {
    pub fn new(
        analysis: &ImageAnalysis,
        options: &ReportOptions,
    ) -> Result<Self, image::ImageError> {
        let faces = analysis
            .faces
            .iter()
            .enumerate()
            .map(|(i, outcome)| face_report(i + 1, outcome, options))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            image_info: ImageInfo {
                width: analysis.width,
                height: analysis.height,
            },
            face_count: faces.len(),
            faces,
        })
    }
}

fn face_report(
    face_index: usize,
    outcome: &FaceOutcome,
    options: &ReportOptions,
) -> Result<FaceReport, image::ImageError> {
    let face = match outcome {
        FaceOutcome::Analyzed(face) => face,
        FaceOutcome::Failed { bbox, reason } => {
            return Ok(FaceReport::Failed(FailedFace {
                face_index,
                bounding_box: bbox.into(),
                reason: reason.to_string(),
            }));
        }
    };

    let crops = if options.embed_crops {
        Some(embed_crops(face)?)
    } else {
        None
    };

    Ok(FaceReport::Analyzed(AnalyzedFace {
        face_index,
        age: age_range(face.age_gender.age),
        age_estimate: face.age_gender.age,
        gender: gender_label(face.age_gender.gender),
        gender_score: face.age_gender.gender,
        liveness: LivenessReport {
            label: liveness_label(face.liveness, options.liveness_threshold),
            score: face.liveness,
        },
        angle: face.eyes.roll_degrees(),
        bounding_box: (&face.bbox).into(),
        landmarks: face.landmarks.points().to_vec(),
        crops,
    }))
}

fn embed_crops(face: &FaceAnalysis) -> Result<EmbeddedCrops, image::ImageError> {
    Ok(EmbeddedCrops {
        attribute: encode_jpeg_base64(&face.crops.attribute)?,
        liveness: encode_jpeg_base64(&face.crops.liveness)?,
        visualization: encode_jpeg_base64(&face.crops.visualization)?,
        overlay: encode_jpeg_base64(&face.overlay)?,
    })
}

/// `"{r - 2} ~ {r + 2}"` around the age estimate rounded half to even.
pub fn age_range(age: f32) -> String {
    let r = age.round_ties_even() as i32;
    format!("{} ~ {}", r - 2, r + 2)
}

/// The attribute network emits exactly 0 for male.
pub fn gender_label(score: f32) -> &'static str {
    if score == 0.0 {
        "Male"
    } else {
        "Female"
    }
}

pub fn liveness_label(score: f32, threshold: f32) -> &'static str {
    if score > threshold {
        "Real"
    } else {
        "Fake"
    }
}

pub fn encode_jpeg_base64<I>(image: &I) -> Result<String, image::ImageError>
where
    I: GenericImageView,
    I::Pixel: PixelWithColorType,
{
    let mut buf = Vec::new();
    JpegEncoder::new(&mut buf).encode_image(image)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf))
}
