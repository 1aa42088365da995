// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use image::ImageFormat;

use crate::codec::{FormatPolicy, parse_format};
use crate::config::{DEFAULT_BODY_LIMIT, DEFAULT_HOST, DEFAULT_PORT, ServiceConfig};
use crate::download::DEFAULT_SEGMENT_MODEL;
use crate::inference::InferenceConfig;

/// CLI arguments parser.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = r#"Examples:
    segment-serve serve --model yolo11n-seg.onnx --port 5000
    segment-serve serve -m balloon-seg.onnx --class-names balloon.txt --no-mask
    segment-serve extract -m yolo11n-seg.onnx -s bus.jpg --out crops/"#)]
pub struct Cli {
    #[command(subcommand)]
    /// Subcommand to execute.
    pub command: Commands,
}

/// Commands for the CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Extract instance crops from one image into a directory
    Extract(ExtractArgs),
}

/// Detection thresholds shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ThresholdArgs {
    /// Confidence threshold
    #[arg(long, env = "CONF", default_value_t = 0.25)]
    pub conf: f32,

    /// `IoU` threshold for NMS
    #[arg(long, env = "IOU", default_value_t = 0.45)]
    pub iou: f32,

    /// Maximum number of instances per image
    #[arg(long, env = "MAX_DET", default_value_t = 300)]
    pub max_det: usize,

    /// Inference image size (defaults to the size stored in the model)
    #[arg(long, env = "IMGSZ")]
    pub imgsz: Option<usize>,

    /// ONNX Runtime intra-op threads (0 lets the runtime decide)
    #[arg(long, env = "THREADS", default_value_t = 0)]
    pub threads: usize,
}

impl ThresholdArgs {
    /// Detection configuration from these arguments.
    #[must_use]
    pub fn inference_config(&self) -> InferenceConfig {
        let config = InferenceConfig::new()
            .with_confidence(self.conf)
            .with_iou(self.iou)
            .with_max_detections(self.max_det)
            .with_threads(self.threads);
        match self.imgsz {
            Some(sz) => config.with_imgsz(sz, sz),
            None => config,
        }
    }
}

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the startup ONNX segmentation model
    #[arg(short, long, env = "MODEL_PATH", default_value = DEFAULT_SEGMENT_MODEL)]
    pub model: PathBuf,

    /// Newline-separated class names for the startup model, background first
    #[arg(long, env = "CLASS_NAMES")]
    pub class_names: Option<PathBuf>,

    /// Bind host
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Bind port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Root directory for per-request crop folders
    #[arg(long, env = "OUTPUT_DIR", default_value = "results")]
    pub output_dir: PathBuf,

    /// Directory models fetched by URL are stored in
    #[arg(long, env = "MODEL_CACHE_DIR", default_value = "models")]
    pub model_cache_dir: PathBuf,

    /// Keep background pixels inside each crop's box
    #[arg(long, env = "NO_MASK", default_value_t = false)]
    pub no_mask: bool,

    /// Format for crops written to disk (jpeg, png, ...)
    #[arg(long, env = "PERSIST_FORMAT", default_value = "jpeg", value_parser = parse_format)]
    pub persist_format: ImageFormat,

    /// Format for base64 crops: "original" or a format name
    #[arg(long, env = "TRANSPORT_FORMAT", default_value = "original")]
    pub transport_format: FormatPolicy,

    /// TrueType font for overlay labels
    #[arg(long, env = "FONT_PATH")]
    pub font: Option<PathBuf>,

    /// Maximum request body size in bytes
    #[arg(long, env = "BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,
}

impl ServeArgs {
    /// Service configuration from these arguments.
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_model_path(&self.model)
            .with_class_names_file(self.class_names.clone())
            .with_model_cache_dir(&self.model_cache_dir)
            .with_output_dir(&self.output_dir)
            .with_apply_mask(!self.no_mask)
            .with_persist_format(self.persist_format)
            .with_transport_format(self.transport_format)
            .with_font_path(self.font.clone())
            .with_body_limit(self.body_limit)
            .with_inference(self.thresholds.inference_config())
    }
}

/// Arguments for the extract command.
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Path to ONNX segmentation model
    #[arg(short, long, default_value = DEFAULT_SEGMENT_MODEL)]
    pub model: PathBuf,

    /// Input image
    #[arg(short, long)]
    pub source: PathBuf,

    /// Output directory for the crops
    #[arg(short, long, default_value = "results")]
    pub out: PathBuf,

    /// Newline-separated class names, background first
    #[arg(long)]
    pub class_names: Option<PathBuf>,

    /// Keep background pixels inside each crop's box
    #[arg(long, default_value_t = false)]
    pub no_mask: bool,

    /// Format for the written crops
    #[arg(long, default_value = "jpeg", value_parser = parse_format)]
    pub format: ImageFormat,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,
}
