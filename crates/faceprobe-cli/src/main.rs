use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faceprobe_core::report::BoxReport;
use faceprobe_core::{FaceOutcome, FacePipeline, ImageAnalysis, ImageReport, Networks};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceprobe", about = "Face detection, landmark alignment and age/gender analysis")]
struct Cli {
    /// Directory containing the ONNX models (overrides FACEPROBE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// ONNX Runtime intra-op threads per model
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print verified face boxes
    Detect {
        image: PathBuf,
        #[command(flatten)]
        thresholds: Thresholds,
    },
    /// Run the full pipeline and print a JSON report
    Analyze {
        image: PathBuf,
        #[command(flatten)]
        thresholds: Thresholds,
        /// Liveness score above which a face is reported as real
        #[arg(long)]
        liveness_threshold: Option<f32>,
        /// Embed crops in the report as base64 JPEG
        #[arg(long)]
        embed_crops: bool,
        /// Write every crop as PNG into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Process faces one at a time
        #[arg(long)]
        sequential: bool,
    },
}

#[derive(Args)]
struct Thresholds {
    /// Minimum detector candidate score
    #[arg(long)]
    confidence: Option<f32>,
    /// IoU threshold for overlap suppression
    #[arg(long)]
    nms: Option<f32>,
    /// Minimum face-check score
    #[arg(long)]
    verify: Option<f32>,
}

impl Thresholds {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.confidence {
            config.confidence_threshold = v;
        }
        if let Some(v) = self.nms {
            config.nms_threshold = v;
        }
        if let Some(v) = self.verify {
            config.verify_threshold = v;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(threads) = cli.threads {
        config.intra_threads = threads;
    }

    match cli.command {
        Commands::Detect { image, thresholds } => {
            thresholds.apply(&mut config);
            let pipeline = load_pipeline(&config)?;
            let rgb = load_image(&image)?;

            let boxes = pipeline.detect(&rgb)?;
            let faces: Vec<BoxReport> = boxes.iter().map(BoxReport::from).collect();
            let out = serde_json::json!({
                "imageInfo": { "width": rgb.width(), "height": rgb.height() },
                "faceCount": faces.len(),
                "faces": faces,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Analyze {
            image,
            thresholds,
            liveness_threshold,
            embed_crops,
            out_dir,
            sequential,
        } => {
            thresholds.apply(&mut config);
            if let Some(v) = liveness_threshold {
                config.liveness_threshold = v;
            }
            if sequential {
                config.parallel_faces = false;
            }
            let pipeline = load_pipeline(&config)?;
            let rgb = load_image(&image)?;

            let analysis = pipeline.analyze(&rgb)?;
            if let Some(dir) = out_dir {
                write_crops(&dir, &analysis)?;
            }
            let report = ImageReport::new(&analysis, &config.report_options(embed_crops))
                .context("failed to encode crops")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_pipeline(config: &Config) -> Result<FacePipeline> {
    tracing::info!(model_dir = %config.model_dir.display(), "loading models");
    let networks = Networks::load(&config.model_dir, config.intra_threads)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    Ok(FacePipeline::new(networks, config.pipeline_config()))
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// `face_<n>_<kind>.png` for every analyzed face, 1-based like the report.
fn write_crops(dir: &Path, analysis: &ImageAnalysis) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (i, outcome) in analysis.faces.iter().enumerate() {
        let FaceOutcome::Analyzed(face) = outcome else {
            continue;
        };
        let n = i + 1;
        let save = |kind: &str, result: image::ImageResult<()>| -> Result<()> {
            result.with_context(|| format!("failed to write face {n} {kind} crop"))
        };
        save("attribute", face.crops.attribute.save(dir.join(format!("face_{n}_attribute.png"))))?;
        save("liveness", face.crops.liveness.save(dir.join(format!("face_{n}_liveness.png"))))?;
        save(
            "visualization",
            face.crops.visualization.save(dir.join(format!("face_{n}_visualization.png"))),
        )?;
        save("overlay", face.overlay.save(dir.join(format!("face_{n}_overlay.png"))))?;
    }
    tracing::info!(dir = %dir.display(), "crops written");
    Ok(())
}
