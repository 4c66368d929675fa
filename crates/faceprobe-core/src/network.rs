//! Inference boundary: fixed-shape tensors in, tensors out.
//!
//! Every model the pipeline calls sits behind [`Network`], so tests can swap in
//! deterministic fixtures. [`OrtNetwork`] is the ONNX Runtime implementation.

use image::{GrayImage, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const DETECTOR_MODEL: &str = "detect_model.onnx";
pub const FACE_CHECK_MODEL: &str = "face_cls_model.onnx";
pub const COARSE_LANDMARK_MODEL: &str = "landmark64_model.onnx";
pub const REFINED_LANDMARK_MODEL: &str = "landmark128_model.onnx";
pub const ATTRIBUTE_MODEL: &str = "age_gender_model.onnx";
pub const LIVENESS_MODEL: &str = "liveness_model.onnx";

const LANDMARK_PIXEL_OFFSET: f32 = 128.0;
const LANDMARK_PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{network}: expected {expected}, got {actual}")]
    ShapeMismatch {
        network: String,
        expected: String,
        actual: String,
    },
    #[error("{0}: session lock poisoned")]
    Poisoned(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A loaded model invoked with one NCHW float tensor.
///
/// Implementations must be safe to call from several threads at once.
pub trait Network: Send + Sync {
    fn name(&self) -> &str;

    /// Run inference, returning every model output in declaration order.
    fn run(&self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, NetworkError>;
}

/// ONNX Runtime session behind a per-model mutex.
pub struct OrtNetwork {
    name: String,
    session: Mutex<Session>,
}

impl OrtNetwork {
    /// Load an ONNX model from the given path.
    pub fn load(name: &str, model_path: &Path, intra_threads: usize) -> Result<Self, NetworkError> {
        if !model_path.exists() {
            return Err(NetworkError::ModelNotFound(
                model_path.to_string_lossy().into_owned(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            network = name,
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded model"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
        })
    }
}

impl Network for OrtNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, NetworkError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| NetworkError::Poisoned(self.name.clone()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for idx in 0..outputs.len() {
            let (shape, data) = outputs[idx].try_extract_tensor::<f32>().map_err(|e| {
                NetworkError::InferenceFailed(format!("{} output {idx}: {e}", self.name))
            })?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let tensor = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|e| {
                NetworkError::InferenceFailed(format!("{} output {idx}: {e}", self.name))
            })?;
            tensors.push(tensor);
        }

        Ok(tensors)
    }
}

/// The six models the pipeline needs, loaded once and shared read-only.
#[derive(Clone)]
pub struct Networks {
    pub detector: Arc<dyn Network>,
    pub face_check: Arc<dyn Network>,
    pub coarse_landmark: Arc<dyn Network>,
    pub refined_landmark: Arc<dyn Network>,
    pub attribute: Arc<dyn Network>,
    pub liveness: Arc<dyn Network>,
}

impl Networks {
    /// Load every model from `model_dir`. Fails fast on the first missing file.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, NetworkError> {
        let load = |name: &str, file: &str| -> Result<Arc<dyn Network>, NetworkError> {
            Ok(Arc::new(OrtNetwork::load(
                name,
                &model_dir.join(file),
                intra_threads,
            )?))
        };

        Ok(Self {
            detector: load("detector", DETECTOR_MODEL)?,
            face_check: load("face_check", FACE_CHECK_MODEL)?,
            coarse_landmark: load("coarse_landmark", COARSE_LANDMARK_MODEL)?,
            refined_landmark: load("refined_landmark", REFINED_LANDMARK_MODEL)?,
            attribute: load("attribute", ATTRIBUTE_MODEL)?,
            liveness: load("liveness", LIVENESS_MODEL)?,
        })
    }
}

/// Flatten the first output of a run and check its element count.
pub(crate) fn first_output(
    network: &dyn Network,
    outputs: &[ArrayD<f32>],
    min_len: usize,
) -> Result<Vec<f32>, NetworkError> {
    let tensor = outputs.first().ok_or_else(|| NetworkError::ShapeMismatch {
        network: network.name().to_string(),
        expected: "at least one output".into(),
        actual: "none".into(),
    })?;
    if tensor.len() < min_len {
        return Err(NetworkError::ShapeMismatch {
            network: network.name().to_string(),
            expected: format!("at least {min_len} values"),
            actual: format!("{:?}", tensor.shape()),
        });
    }
    Ok(tensor.iter().copied().collect())
}

/// Raw 0–255 color tensor `[1, 3, H, W]` in B, G, R channel order.
pub fn bgr_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, px) in image.enumerate_pixels() {
        let [r, g, b] = px.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = b as f32;
        tensor[[0, 1, y, x]] = g as f32;
        tensor[[0, 2, y, x]] = r as f32;
    }
    tensor
}

/// Raw 0–255 single-channel tensor `[1, 1, H, W]`.
pub fn gray_tensor(image: &GrayImage) -> Array4<f32> {
    gray_tensor_with(image, |p| p)
}

/// Single-channel tensor normalized to `(p - 128) / 255`, as the landmark networks expect.
pub fn landmark_tensor(image: &GrayImage) -> Array4<f32> {
    gray_tensor_with(image, |p| (p - LANDMARK_PIXEL_OFFSET) / LANDMARK_PIXEL_SCALE)
}

fn gray_tensor_with(image: &GrayImage, normalize: impl Fn(f32) -> f32) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 1, h, w));
    for (x, y, px) in image.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = normalize(px.0[0] as f32);
    }
    tensor
}
