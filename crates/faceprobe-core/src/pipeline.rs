//! Per-request orchestration: detect, then align, crop and score each face.

use crate::age::{self, AgeGender, AgeGenderRaw};
use crate::alignment::{AlignedFace, LandmarkAligner};
use crate::crops::{self, AlignedCrops};
use crate::detector::{DetectorConfig, FaceDetector};
use crate::landmarks::LandmarkSet;
use crate::network::{self, Network, NetworkError, Networks};
use crate::types::{BoundingBox, EyeGeometry};
use image::RgbImage;
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

/// A problem confined to one face. The rest of the image is still reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceFailure {
    #[error("eye clusters too close to size crops (distance {distance})")]
    DegenerateEyes { distance: f32 },
    #[error("age level {0} outside the 0..=6 table range")]
    AgeLevelOutOfRange(f32),
    #[error("malformed landmarks: {0}")]
    MalformedLandmarks(String),
    #[error("malformed attribute output: {0}")]
    MalformedAttributes(String),
}

/// Errors that abort the whole request.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    /// Per-face failure on its way to a [`FaceOutcome::Failed`] entry.
    #[error("face failure: {0}")]
    Face(#[from] FaceFailure),
    #[error("{boxes} faces detected but {results} results produced")]
    Inconsistent { boxes: usize, results: usize },
    #[error("image has no pixels")]
    EmptyImage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    /// Process detected faces on the rayon pool.
    pub parallel_faces: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            parallel_faces: true,
        }
    }
}

/// Everything computed for one successfully processed face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    pub bbox: BoundingBox,
    /// Refined landmarks in source image coordinates.
    pub landmarks: LandmarkSet,
    pub eyes: EyeGeometry,
    pub age_gender: AgeGender,
    pub liveness: f32,
    pub crops: AlignedCrops,
    /// Detected box cut from the source with the landmarks drawn in.
    pub overlay: RgbImage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Analyzed(FaceAnalysis),
    Failed { bbox: BoundingBox, reason: FaceFailure },
}

impl FaceOutcome {
    pub fn bbox(&self) -> &BoundingBox {
        match self {
            FaceOutcome::Analyzed(a) => &a.bbox,
            FaceOutcome::Failed { bbox, .. } => bbox,
        }
    }
}

/// Result of one request, faces in detection order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceOutcome>,
}

pub struct FacePipeline {
    detector: FaceDetector,
    aligner: LandmarkAligner,
    attribute: Arc<dyn Network>,
    liveness: Arc<dyn Network>,
    config: PipelineConfig,
}

impl FacePipeline {
    pub fn new(networks: Networks, config: PipelineConfig) -> Self {
        Self {
            detector: FaceDetector::new(networks.detector, networks.face_check, config.detector),
            aligner: LandmarkAligner::new(networks.coarse_landmark, networks.refined_landmark),
            attribute: networks.attribute,
            liveness: networks.liveness,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Verified square face boxes only.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::EmptyImage);
        }
        Ok(self.detector.detect(image)?)
    }

    /// Run the full pipeline on one image.
    pub fn analyze(&self, image: &RgbImage) -> Result<ImageAnalysis, PipelineError> {
        let boxes = self.detect(image)?;

        let faces: Vec<FaceOutcome> = if self.config.parallel_faces && boxes.len() > 1 {
            boxes
                .par_iter()
                .map(|bbox| self.analyze_face(image, bbox))
                .collect::<Result<_, _>>()?
        } else {
            boxes
                .iter()
                .map(|bbox| self.analyze_face(image, bbox))
                .collect::<Result<_, _>>()?
        };

        if faces.len() != boxes.len() {
            return Err(PipelineError::Inconsistent {
                boxes: boxes.len(),
                results: faces.len(),
            });
        }

        let failed = faces
            .iter()
            .filter(|f| matches!(f, FaceOutcome::Failed { .. }))
            .count();
        tracing::info!(faces = faces.len(), failed, "image analyzed");

        Ok(ImageAnalysis {
            width: image.width(),
            height: image.height(),
            faces,
        })
    }

    /// Per-face failures become [`FaceOutcome::Failed`]; everything else propagates.
    fn analyze_face(
        &self,
        image: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<FaceOutcome, PipelineError> {
        match self.process_face(image, bbox) {
            Ok(analysis) => Ok(FaceOutcome::Analyzed(analysis)),
            Err(PipelineError::Face(reason)) => {
                tracing::warn!(?bbox, %reason, "face skipped");
                Ok(FaceOutcome::Failed {
                    bbox: *bbox,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn process_face(
        &self,
        image: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<FaceAnalysis, PipelineError> {
        let AlignedFace { refined, eyes, .. } = self.aligner.align(image, bbox)?;
        let crops = crops::synthesize(image, &eyes);

        let outputs = self.attribute.run(network::bgr_tensor(&crops.attribute))?;
        let raw = AgeGenderRaw::from_outputs(self.attribute.as_ref(), &outputs)?;
        let age_gender = age::decode(&raw)?;

        let outputs = self.liveness.run(network::bgr_tensor(&crops.liveness))?;
        let liveness = network::first_output(self.liveness.as_ref(), &outputs, 1)?[0];

        let overlay = crops::landmark_overlay(image, bbox, &refined);

        Ok(FaceAnalysis {
            bbox: *bbox,
            landmarks: refined,
            eyes,
            age_gender,
            liveness,
            crops,
            overlay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_failure_converts() {
        let err: PipelineError = FaceFailure::AgeLevelOutOfRange(9.0).into();
        assert!(matches!(err, PipelineError::Face(FaceFailure::AgeLevelOutOfRange(_))));
    }

    #[test]
    fn test_outcome_bbox() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let failed = FaceOutcome::Failed {
            bbox,
            reason: FaceFailure::DegenerateEyes { distance: 0.0 },
        };
        assert_eq!(failed.bbox(), &bbox);
    }

    #[test]
    fn test_default_config() {
        let c = PipelineConfig::default();
        assert_eq!(c.detector.confidence_threshold, 0.5);
        assert_eq!(c.detector.nms_threshold, 0.5);
        assert_eq!(c.detector.verify_threshold, 0.5);
    }
}
