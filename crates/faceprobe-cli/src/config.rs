use faceprobe_core::detector::DetectorConfig;
use faceprobe_core::report::DEFAULT_LIVENESS_THRESHOLD;
use faceprobe_core::{PipelineConfig, ReportOptions};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the six ONNX model files.
    pub model_dir: PathBuf,
    /// Minimum detector candidate score.
    pub confidence_threshold: f32,
    /// IoU above which overlapping candidates are suppressed.
    pub nms_threshold: f32,
    /// Minimum face-class score from the verification pass.
    pub verify_threshold: f32,
    /// Liveness scores above this are reported as real.
    pub liveness_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Whether detected faces are processed in parallel.
    pub parallel_faces: bool,
}

impl Config {
    /// Load configuration from `FACEPROBE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEPROBE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceprobe_core::default_model_dir());

        let defaults = DetectorConfig::default();
        Self {
            model_dir,
            confidence_threshold: env_f32(
                "FACEPROBE_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            nms_threshold: env_f32("FACEPROBE_NMS_THRESHOLD", defaults.nms_threshold),
            verify_threshold: env_f32("FACEPROBE_VERIFY_THRESHOLD", defaults.verify_threshold),
            liveness_threshold: env_f32("FACEPROBE_LIVENESS_THRESHOLD", DEFAULT_LIVENESS_THRESHOLD),
            intra_threads: env_usize("FACEPROBE_INTRA_THREADS", 2),
            parallel_faces: std::env::var("FACEPROBE_PARALLEL_FACES")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            detector: DetectorConfig {
                confidence_threshold: self.confidence_threshold,
                nms_threshold: self.nms_threshold,
                verify_threshold: self.verify_threshold,
            },
            parallel_faces: self.parallel_faces,
        }
    }

    pub fn report_options(&self, embed_crops: bool) -> ReportOptions {
        ReportOptions {
            liveness_threshold: self.liveness_threshold,
            embed_crops,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
