// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Segmentation model abstraction and the ONNX Runtime implementation.
//!
//! The rest of the crate only sees the [`Segmenter`] trait, so the service can run
//! with any backend that turns images into [`DetectionResult`]s. [`OnnxSegmenter`]
//! runs exported YOLO segmentation models; [`OnnxLoader`] builds one from a local path
//! or URL when the active model is swapped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use tracing::{debug, info};

use crate::download::ModelSource;
use crate::error::{Result, ServeError};
use crate::image_buffer::{CHANNELS, ImageBuffer};
use crate::inference::InferenceConfig;
use crate::metadata::{METADATA_KEYS, ModelMetadata};
use crate::names::ClassNames;
use crate::postprocessing::{RawOutput, decode_segmentation};
use crate::preprocessing::letterbox;
use crate::results::{DetectionResult, Speed};

/// Something that finds object instances in images.
pub trait Segmenter: Send + Sync {
    /// Detect instances in each image. The output has one result per input, in order,
    /// and every result's masks match its image's dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Inference`] if the model can't be run.
    fn detect(&self, images: &[ImageBuffer]) -> Result<Vec<DetectionResult>>;

    /// Number of foreground classes, if the model declares it.
    fn num_classes(&self) -> Option<usize>;

    /// Class names embedded in the model, background entry first.
    fn class_names(&self) -> Option<ClassNames> {
        None
    }
}

/// Builds a [`Segmenter`] from a model source string.
pub trait ModelLoader: Send + Sync {
    /// Load the model registered as `name` from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ModelLoad`] if the source can't be fetched or loaded.
    fn load(&self, name: &str, source: &str) -> Result<Arc<dyn Segmenter>>;
}

/// YOLO segmentation model running on ONNX Runtime.
///
/// # Example
///
/// ```no_run
/// use segment_serve::{OnnxSegmenter, Segmenter, codec};
///
/// let model = OnnxSegmenter::load("yolo11n-seg.onnx")?;
/// let image = codec::decode(&std::fs::read("bus.jpg")?, None)?;
/// let results = model.detect(&[image])?;
/// println!("Found {} instances", results[0].len());
/// # Ok::<(), segment_serve::ServeError>(())
/// ```
pub struct OnnxSegmenter {
    /// Runs take `&mut Session`, so concurrent requests queue here.
    session: Mutex<Session>,
    metadata: ModelMetadata,
    input_name: String,
    output_names: Vec<String>,
    config: InferenceConfig,
}

impl OnnxSegmenter {
    /// Load a model with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the model file doesn't exist or isn't a segmentation model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_config(path, InferenceConfig::default())
    }

    /// Load a model with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ModelLoad`] if the file can't be loaded, doesn't declare a
    /// segmentation task, or lacks the mask prototype output.
    pub fn load_with_config<P: AsRef<Path>>(path: P, config: InferenceConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ServeError::ModelLoad(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| ServeError::ModelLoad(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ServeError::ModelLoad(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| ServeError::ModelLoad(format!("Failed to set intra-thread count: {e}")))?
            .commit_from_file(path)
            .map_err(|e| ServeError::ModelLoad(format!("Failed to load model: {e}")))?;

        let metadata = read_metadata(&session)?;
        if !metadata.is_segmentation() {
            return Err(ServeError::ModelLoad(format!(
                "{} is a '{}' model, a segmentation model is required",
                path.display(),
                metadata.task.as_deref().unwrap_or_default()
            )));
        }

        let input_name = session
            .inputs
            .first()
            .map_or_else(|| "images".to_string(), |i| i.name.clone());
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.len() < 2 {
            return Err(ServeError::ModelLoad(format!(
                "{} has {} output(s), a segmentation model needs predictions and mask prototypes",
                path.display(),
                output_names.len()
            )));
        }

        let config = InferenceConfig {
            imgsz: config.imgsz.or(Some(metadata.imgsz)),
            ..config
        };

        let model = Self {
            session: Mutex::new(session),
            metadata,
            input_name,
            output_names,
            config,
        };
        model.warmup()?;

        info!(
            "Loaded {} ({} classes, imgsz {:?})",
            path.display(),
            model.metadata.num_classes(),
            model.imgsz()
        );
        Ok(model)
    }

    /// Model input size `(height, width)`.
    #[must_use]
    pub fn imgsz(&self) -> (usize, usize) {
        self.config.imgsz.unwrap_or(self.metadata.imgsz)
    }

    /// Metadata read from the model file.
    #[must_use]
    pub const fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Run once on a blank input so graph setup doesn't land on the first request.
    fn warmup(&self) -> Result<()> {
        let (h, w) = self.imgsz();
        self.run(&Array4::zeros((1, CHANNELS, h, w))).map(|_| ())
    }

    fn run(&self, input: &Array4<f32>) -> Result<Vec<RawOutput>> {
        let input = input.as_standard_layout();
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| ServeError::Inference(format!("Failed to create input tensor: {e}")))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![&self.input_name => tensor])
            .map_err(|e| ServeError::Inference(format!("Inference failed: {e}")))?;

        self.output_names
            .iter()
            .map(|name| {
                let output = outputs
                    .get(name.as_str())
                    .ok_or_else(|| ServeError::Inference(format!("Output '{name}' not found")))?;
                let (shape, data) = output.try_extract_tensor::<f32>().map_err(|e| {
                    ServeError::Inference(format!("Failed to extract output '{name}': {e}"))
                })?;
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let shape = shape.iter().map(|&d| d as usize).collect();
                Ok((data.to_vec(), shape))
            })
            .collect()
    }

    fn detect_one(&self, image: &ImageBuffer) -> Result<DetectionResult> {
        let start = Instant::now();
        let lb = letterbox(image, self.imgsz())?;
        let preprocess = elapsed_ms(start);

        let start = Instant::now();
        let outputs = self.run(&lb.tensor)?;
        let inference = elapsed_ms(start);

        let start = Instant::now();
        let num_classes = Some(self.metadata.num_classes()).filter(|&n| n > 0);
        let result = decode_segmentation(&outputs, &lb, &self.config, num_classes)?;
        let speed = Speed::new(preprocess, inference, elapsed_ms(start));

        debug!(
            "{} instances in {:.1}ms (pre {:.1}ms, infer {:.1}ms, post {:.1}ms)",
            result.len(),
            speed.total(),
            speed.preprocess.unwrap_or_default(),
            speed.inference.unwrap_or_default(),
            speed.postprocess.unwrap_or_default()
        );
        Ok(result)
    }
}

impl Segmenter for OnnxSegmenter {
    fn detect(&self, images: &[ImageBuffer]) -> Result<Vec<DetectionResult>> {
        images.iter().map(|image| self.detect_one(image)).collect()
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.metadata.num_classes()).filter(|&n| n > 0)
    }

    fn class_names(&self) -> Option<ClassNames> {
        (!self.metadata.names.is_empty()).then(|| ClassNames::from_foreground(&self.metadata.names))
    }
}

impl std::fmt::Debug for OnnxSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSegmenter")
            .field("num_classes", &self.metadata.num_classes())
            .field("imgsz", &self.imgsz())
            .field("stride", &self.metadata.stride)
            .field("outputs", &self.output_names)
            .finish()
    }
}

/// Loads [`OnnxSegmenter`]s, downloading remote sources into a cache directory.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    cache_dir: PathBuf,
    config: InferenceConfig,
}

impl OnnxLoader {
    /// Create a loader caching downloads under `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, config: InferenceConfig) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            config,
        }
    }

    /// Directory remote models are downloaded into.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, name: &str, source: &str) -> Result<Arc<dyn Segmenter>> {
        let path = ModelSource::parse(source).fetch(name, &self.cache_dir)?;
        let model = OnnxSegmenter::load_with_config(&path, self.config.clone())?;
        Ok(Arc::new(model))
    }
}

fn read_metadata(session: &Session) -> Result<ModelMetadata> {
    let custom = session
        .metadata()
        .map_err(|e| ServeError::ModelLoad(format!("Failed to get model metadata: {e}")))?;

    let properties: HashMap<String, String> = METADATA_KEYS
        .iter()
        .filter_map(|&key| match custom.custom(key) {
            Ok(Some(value)) => Some((key.to_string(), value)),
            _ => None,
        })
        .collect();

    ModelMetadata::from_properties(&properties)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
