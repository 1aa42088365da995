// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

#![allow(clippy::multiple_crate_versions)]

//! # Segment Serve
//!
//! HTTP service that runs a YOLO instance-segmentation model on uploaded images and
//! returns the detected instances as individual crops: cut to their bounding box,
//! optionally white-filled outside their mask, and delivered as files or base64 text.
//! The active model can be swapped at runtime without restarting the service.
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use segment_serve::pipeline::PipelineSettings;
//! use segment_serve::{
//!     ClassNames, ModelRegistry, OnnxLoader, OnnxSegmenter, RequestPipeline, Segmenter,
//!     ServiceConfig, codec,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::new().with_model_path("yolo11n-seg.onnx");
//!     let model = OnnxSegmenter::load(&config.model_path)?;
//!     let names = model.class_names().unwrap_or_else(ClassNames::coco);
//!     let registry = ModelRegistry::new(&config.model_name(), Arc::new(model), names)?;
//!
//!     let pipeline = RequestPipeline::new(
//!         Arc::new(registry),
//!         Arc::new(OnnxLoader::new("models", config.inference.clone())),
//!         PipelineSettings::from(&config),
//!     );
//!
//!     let image = codec::decode(&std::fs::read("bus.jpg")?, None)?;
//!     let saved = pipeline.extract_and_save(&image)?;
//!     println!("Saved {} crops to {}", saved.batch.len(), saved.batch.dir.display());
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Serve on 0.0.0.0:5000 with the default model (downloaded on first run)
//! segment-serve serve
//!
//! # Custom model with its class names, crops keep their background
//! segment-serve serve -m balloon-seg.onnx --class-names balloon.txt --no-mask
//!
//! # One-shot extraction into a directory
//! segment-serve extract -m yolo11n-seg.onnx -s bus.jpg --out crops/
//! ```
//!
//! Every `serve` option can also be set through the environment (`MODEL_PATH`, `PORT`,
//! `HOST`, `OUTPUT_DIR`, ...). Logging follows `RUST_LOG`.
//!
//! ## HTTP API
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `POST /visualize` | multipart image | JPEG overlay |
//! | `POST /extract` | multipart image | first crop, or `No objects detected` |
//! | `POST /base64` | `{"base64Image"}` | `{"croppedImageList", "detections"}` |
//! | `POST /changemodel` | `{"modelName", "modelUrl", "classNames"}` | confirmation text |
//! | `GET /info` | | active model name, generation and class names |
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`image_buffer`] | [`ImageBuffer`]: decoded pixels plus their container format |
//! | [`results`] | [`DetectionResult`] and [`Roi`] |
//! | [`extract`] | Per-instance cropping and masking |
//! | [`codec`] | Image decode/encode, base64 and file persistence |
//! | [`model`] | [`Segmenter`] trait and the ONNX Runtime backend |
//! | [`registry`] | [`ModelRegistry`]: atomically swappable model and class names |
//! | [`pipeline`] | [`RequestPipeline`]: per-request orchestration |
//! | [`server`] | axum routes and OpenAPI docs |
//! | [`error`] | [`ServeError`] and [`Result`] |

pub mod annotate;
pub mod cli;
pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod image_buffer;
pub mod inference;
pub mod metadata;
pub mod model;
pub mod names;
pub mod pipeline;
pub mod postprocessing;
pub mod preprocessing;
pub mod registry;
pub mod results;
pub mod server;
pub mod utils;

pub use codec::{FormatPolicy, SavedBatch};
pub use config::ServiceConfig;
pub use error::{Result, ServeError};
pub use extract::Extraction;
pub use image_buffer::ImageBuffer;
pub use inference::InferenceConfig;
pub use metadata::ModelMetadata;
pub use model::{ModelLoader, OnnxLoader, OnnxSegmenter, Segmenter};
pub use names::ClassNames;
pub use pipeline::RequestPipeline;
pub use registry::{ModelRegistry, ModelSnapshot};
pub use results::{DetectionResult, Roi, Speed};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
