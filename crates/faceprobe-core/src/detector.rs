//! Face detector: full-image candidate pass, confidence filter, NMS, square
//! normalization and a per-box face/non-face verification pass.

use crate::geometry::{self, CropRect};
use crate::network::{self, Network, NetworkError};
use crate::nms::{self, Candidate};
use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::{ArrayD, Axis, Ix2};
use std::sync::Arc;

// --- Named constants ---
const DETECTOR_INPUT_SIZE: u32 = 320;
/// Columns per candidate row: score, left, right, top, bottom.
const CANDIDATE_COLUMNS: usize = 5;
const FACE_CHECK_INPUT_SIZE: u32 = 64;
/// Index of the face class in the face-check output.
const FACE_CLASS: usize = 1;

/// Detector thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Minimum candidate score kept before suppression.
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Minimum face-class score from the verification pass.
    pub verify_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: nms::DEFAULT_IOU_THRESHOLD,
            verify_threshold: 0.5,
        }
    }
}

pub struct FaceDetector {
    detector: Arc<dyn Network>,
    face_check: Arc<dyn Network>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(
        detector: Arc<dyn Network>,
        face_check: Arc<dyn Network>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            detector,
            face_check,
            config,
        }
    }

    /// Detect faces, returning verified square boxes in image pixel coordinates.
    ///
    /// An image without faces yields an empty vector, not an error.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, NetworkError> {
        // Top-left anchored square covering the whole image, zero-padded.
        let side = image.width().max(image.height()) as i32;
        let square = geometry::padded_crop(image, 0, 0, side, side);
        let resized = geometry::resize(&square, DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE);

        let outputs = self.detector.run(network::bgr_tensor(&resized))?;
        let raw = outputs.first().ok_or_else(|| NetworkError::ShapeMismatch {
            network: self.detector.name().to_string(),
            expected: format!("N×{CANDIDATE_COLUMNS} candidates"),
            actual: "no outputs".into(),
        })?;
        let all = parse_candidates(self.detector.as_ref(), raw)?;

        let candidates: Vec<Candidate> = all
            .into_iter()
            .filter(|c| c.score > self.config.confidence_threshold)
            .collect();
        let kept = nms::suppress(&candidates, self.config.nms_threshold);

        tracing::debug!(
            candidates = candidates.len(),
            after_nms = kept.len(),
            "detector candidates"
        );

        let mut faces = Vec::with_capacity(kept.len());
        for idx in kept {
            let bbox = candidates[idx].bbox.scaled(side as f32);
            let square = bbox.to_square();
            let score = self.verify(image, &square)?;
            if score > self.config.verify_threshold {
                faces.push(square);
            } else {
                tracing::debug!(?square, score, "candidate rejected by face check");
            }
        }

        tracing::debug!(faces = faces.len(), "faces verified");
        Ok(faces)
    }

    /// Face-class score of the face-check network on a 64×64 gray crop of `square`.
    fn verify(&self, image: &RgbImage, square: &BoundingBox) -> Result<f32, NetworkError> {
        let crop = verification_rect(square).crop(image);
        let gray = geometry::to_gray(&geometry::resize(
            &crop,
            FACE_CHECK_INPUT_SIZE,
            FACE_CHECK_INPUT_SIZE,
        ));
        let outputs = self.face_check.run(network::gray_tensor(&gray))?;
        let scores = network::first_output(self.face_check.as_ref(), &outputs, FACE_CLASS + 1)?;
        Ok(scores[FACE_CLASS])
    }
}

fn verification_rect(square: &BoundingBox) -> CropRect {
    let size = square.width() as i32;
    CropRect {
        x: square.left as i32,
        y: square.top as i32,
        w: size,
        h: size,
    }
}

/// Read `N × 5` rows of `(score, left, right, top, bottom)` in normalized coordinates.
fn parse_candidates(
    network: &dyn Network,
    raw: &ArrayD<f32>,
) -> Result<Vec<Candidate>, NetworkError> {
    let shape_err = || NetworkError::ShapeMismatch {
        network: network.name().to_string(),
        expected: format!("N×{CANDIDATE_COLUMNS} candidates"),
        actual: format!("{:?}", raw.shape()),
    };

    let rows = match raw.ndim() {
        2 if raw.shape()[1] == CANDIDATE_COLUMNS => raw.view(),
        // Some exports keep a leading batch axis.
        3 if raw.shape()[0] == 1 && raw.shape()[2] == CANDIDATE_COLUMNS => {
            raw.index_axis(Axis(0), 0)
        }
        _ => return Err(shape_err()),
    };
    let rows = rows.into_dimensionality::<Ix2>().map_err(|_| shape_err())?;

    Ok(rows
        .axis_iter(Axis(0))
        .map(|row| Candidate {
            score: row[0],
            bbox: BoundingBox::new(row[1], row[2], row[3], row[4]),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::{Array4, IxDyn};
    use std::sync::Mutex;

    struct FixedNetwork {
        name: &'static str,
        outputs: Vec<ArrayD<f32>>,
        seen_shapes: Mutex<Vec<Vec<usize>>>,
    }

    impl FixedNetwork {
        fn new(name: &'static str, shape: &[usize], values: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                name,
                outputs: vec![ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()],
                seen_shapes: Mutex::new(Vec::new()),
            })
        }
    }

    impl Network for FixedNetwork {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, NetworkError> {
            self.seen_shapes.lock().unwrap().push(input.shape().to_vec());
            Ok(self.outputs.clone())
        }
    }

    fn test_image() -> RgbImage {
        ImageBuffer::from_pixel(200, 160, Rgb([120, 110, 100]))
    }

    #[test]
    fn test_detect_filters_suppresses_and_squares() {
        let detector = FixedNetwork::new(
            "detector",
            &[4, 5],
            vec![
                0.95, 0.25, 0.75, 0.125, 0.5, // 100×75 face
                0.90, 0.26, 0.76, 0.135, 0.51, // duplicate
                0.30, 0.7, 0.9, 0.1, 0.3, // below confidence
                0.80, 0.70, 0.85, 0.5, 0.65, // second face
            ],
        );
        let face_check = FixedNetwork::new("face_check", &[1, 2], vec![0.1, 0.9]);
        let det = FaceDetector::new(
            detector.clone(),
            face_check.clone(),
            DetectorConfig::default(),
        );

        let faces = det.detect(&test_image()).unwrap();
        assert_eq!(faces.len(), 2);
        for f in &faces {
            assert_eq!(f.width(), f.height());
        }
        // 50..150 × 25..100 -> 100px square around (100, 62.5)
        assert_eq!(faces[0], BoundingBox::new(50.0, 150.0, 12.0, 112.0));

        assert_eq!(detector.seen_shapes.lock().unwrap()[0], vec![1, 3, 320, 320]);
        let checks = face_check.seen_shapes.lock().unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0], vec![1, 1, 64, 64]);
    }

    #[test]
    fn test_detect_rejected_by_face_check() {
        let detector = FixedNetwork::new("detector", &[1, 5], vec![0.9, 0.1, 0.5, 0.1, 0.5]);
        let face_check = FixedNetwork::new("face_check", &[1, 2], vec![0.8, 0.2]);
        let det = FaceDetector::new(detector, face_check, DetectorConfig::default());
        assert!(det.detect(&test_image()).unwrap().is_empty());
    }

    #[test]
    fn test_detect_no_candidates() {
        let detector = FixedNetwork::new("detector", &[0, 5], vec![]);
        let face_check = FixedNetwork::new("face_check", &[1, 2], vec![0.0, 1.0]);
        let det = FaceDetector::new(detector, face_check.clone(), DetectorConfig::default());
        assert!(det.detect(&test_image()).unwrap().is_empty());
        assert!(face_check.seen_shapes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_detect_bad_shape() {
        let detector = FixedNetwork::new("detector", &[2, 4], vec![0.0; 8]);
        let face_check = FixedNetwork::new("face_check", &[1, 2], vec![0.0, 1.0]);
        let det = FaceDetector::new(detector, face_check, DetectorConfig::default());
        assert!(matches!(
            det.detect(&test_image()),
            Err(NetworkError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_candidates_batched() {
        let net = FixedNetwork::new("detector", &[1, 1, 5], vec![0.7, 0.1, 0.2, 0.3, 0.4]);
        let raw = ArrayD::from_shape_vec(IxDyn(&[1, 1, 5]), vec![0.7, 0.1, 0.2, 0.3, 0.4]).unwrap();
        let c = parse_candidates(net.as_ref(), &raw).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].score, 0.7);
        assert_eq!(c[0].bbox, BoundingBox::new(0.1, 0.2, 0.3, 0.4));
    }
}
