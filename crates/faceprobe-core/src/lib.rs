//! faceprobe-core: face geometry pipeline.
//!
//! Detects faces, aligns 113 landmarks in two passes, synthesizes the
//! attribute/liveness/visualization crops from the eye geometry and decodes
//! age and gender. Every model runs through the [`network::Network`] trait,
//! backed by ONNX Runtime in production.

pub mod age;
pub mod alignment;
pub mod crops;
pub mod detector;
pub mod geometry;
pub mod landmarks;
pub mod network;
pub mod nms;
pub mod pipeline;
pub mod report;
pub mod types;

use std::path::PathBuf;

pub use network::{Network, NetworkError, Networks, OrtNetwork};
pub use pipeline::{
    FaceFailure, FaceOutcome, FacePipeline, ImageAnalysis, PipelineConfig, PipelineError,
};
pub use report::{ImageReport, ReportOptions};
pub use types::{BoundingBox, EyeGeometry, Point};

/// Where the ONNX models live when no directory is configured:
/// `$XDG_DATA_HOME/faceprobe/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceprobe")
        .join("models")
}
