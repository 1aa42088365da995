// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Request orchestration: detect with the current model, then extract, encode or draw.
//!
//! Every operation takes one registry snapshot at the start and uses it for detection
//! and class-name lookup, so a concurrent model swap never mixes two models' outputs
//! within a request. All methods block; async callers run them on the blocking pool.

use std::path::PathBuf;
use std::slice;
use std::sync::Arc;

use ab_glyph::FontVec;
use image::ImageFormat;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::annotate;
use crate::codec::{self, FormatPolicy, SavedBatch};
use crate::config::ServiceConfig;
use crate::error::{Result, ServeError};
use crate::extract::{Extraction, extract};
use crate::image_buffer::ImageBuffer;
use crate::model::ModelLoader;
use crate::names::ClassNames;
use crate::registry::{ModelRegistry, ModelSnapshot};
use crate::results::DetectionResult;

/// Format of rendered overlays.
pub const OVERLAY_FORMAT: ImageFormat = ImageFormat::Jpeg;

/// Per-request behavior switches.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// White-fill crops outside their mask.
    pub apply_mask: bool,
    /// Format for crops written to disk.
    pub persist_format: ImageFormat,
    /// Format policy for base64 crops.
    pub transport_format: FormatPolicy,
    /// Root of the per-request output directories.
    pub output_dir: PathBuf,
}

impl From<&ServiceConfig> for PipelineSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            apply_mask: config.apply_mask,
            persist_format: config.persist_format,
            transport_format: config.transport_format,
            output_dir: config.output_dir.clone(),
        }
    }
}

/// An instance that couldn't be turned into a crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInstance {
    /// Instance index in emission order.
    pub index: usize,
    /// What went wrong.
    pub reason: String,
}

/// One base64-encoded crop and the detection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCrop {
    /// Instance index in emission order.
    pub index: usize,
    /// Class id into the snapshot's class-name table.
    pub class_id: usize,
    /// Resolved class name.
    pub class_name: String,
    /// Detection confidence.
    pub score: f32,
    /// Base64 text of the encoded crop.
    pub data: String,
}

/// Base64 crops for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCrops {
    /// Successful crops in emission order.
    pub crops: Vec<EncodedCrop>,
    /// Instances that were skipped.
    pub failed: Vec<FailedInstance>,
}

/// Crops persisted for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCrops {
    /// Files written.
    pub batch: SavedBatch,
    /// Instances that were skipped.
    pub failed: Vec<FailedInstance>,
}

/// Ties the registry, extractor and codec together.
pub struct RequestPipeline {
    registry: Arc<ModelRegistry>,
    loader: Arc<dyn ModelLoader>,
    settings: PipelineSettings,
    font: Option<FontVec>,
}

impl RequestPipeline {
    /// Create a pipeline over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        loader: Arc<dyn ModelLoader>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            loader,
            settings,
            font: None,
        }
    }

    /// Use `font` for overlay labels.
    #[must_use]
    pub fn with_font(mut self, font: Option<FontVec>) -> Self {
        self.font = font;
        self
    }

    /// The model registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the current model on one image.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Inference`] if detection fails or returns no result.
    pub fn detect(&self, image: &ImageBuffer) -> Result<(Arc<ModelSnapshot>, DetectionResult)> {
        let snapshot = self.registry.current();
        let result = snapshot
            .model()
            .detect(slice::from_ref(image))?
            .into_iter()
            .next()
            .ok_or_else(|| ServeError::Inference("model returned no result".to_string()))?;
        debug!(
            "Model '{}' (generation {}) found {} instances",
            snapshot.name(),
            snapshot.generation(),
            result.len()
        );
        Ok((snapshot, result))
    }

    /// Crop every detected instance of `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails. Per-instance failures are inside the
    /// returned [`Extraction`].
    pub fn extract(
        &self,
        image: &ImageBuffer,
    ) -> Result<(Arc<ModelSnapshot>, DetectionResult, Extraction)> {
        let (snapshot, result) = self.detect(image)?;
        let extraction = extract(image, &result, self.settings.apply_mask);
        Ok((snapshot, result, extraction))
    }

    /// Render the detection overlay and encode it as JPEG.
    ///
    /// # Errors
    ///
    /// Returns an error if detection, drawing or encoding fails.
    pub fn visualize(&self, image: &ImageBuffer) -> Result<Vec<u8>> {
        let (snapshot, result) = self.detect(image)?;
        let overlay =
            annotate::visualize(image, &result, snapshot.class_names(), self.font.as_ref())?;
        codec::encode(&overlay, OVERLAY_FORMAT)
    }

    /// Crop every instance and write the crops to a fresh request directory.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails or a file can't be written.
    pub fn extract_and_save(&self, image: &ImageBuffer) -> Result<SavedCrops> {
        let (_, _, extraction) = self.extract(image)?;
        let request_id = Uuid::new_v4().simple().to_string();

        let batch = codec::save_batch(
            extraction.crops(),
            &self.settings.output_dir,
            &request_id,
            self.settings.persist_format,
        )?;
        info!("Saved {} crops to {}", batch.len(), batch.dir.display());

        Ok(SavedCrops {
            batch,
            failed: failures(&extraction),
        })
    }

    /// Crop every instance, save the crops and read back the first one.
    ///
    /// The request directory is removed once the first crop is in memory, so serving
    /// crops this way leaves nothing behind under the output root.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails or a crop can't be written or read back.
    pub fn first_crop(&self, image: &ImageBuffer) -> Result<Option<Vec<u8>>> {
        let saved = self.extract_and_save(image)?;
        if !saved.failed.is_empty() {
            warn!("{} instance(s) skipped", saved.failed.len());
        }

        let first = saved.batch.first().map(std::fs::read).transpose();
        match std::fs::remove_dir_all(&saved.batch.dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!("Failed to remove {}: {e}", saved.batch.dir.display());
            }
            _ => {}
        }

        first.map_err(|e| ServeError::Persistence(format!("Failed to read back saved crop: {e}")))
    }

    /// Crop every instance and base64-encode the crops.
    ///
    /// A crop that can't be encoded is reported as failed like any other instance.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails.
    pub fn crops_base64(&self, image: &ImageBuffer) -> Result<EncodedCrops> {
        let (snapshot, result, extraction) = self.extract(image)?;
        let mut failed = failures(&extraction);
        let mut crops = Vec::with_capacity(extraction.len());

        for (index, crop) in extraction.crops() {
            let format = self.settings.transport_format.resolve(crop);
            match codec::to_base64_as(crop, format) {
                Ok(data) => {
                    let class_id = result.class_ids()[index];
                    crops.push(EncodedCrop {
                        index,
                        class_id,
                        class_name: snapshot.class_names().label(class_id),
                        score: result.scores()[index],
                        data,
                    });
                }
                Err(e) => failed.push(FailedInstance {
                    index,
                    reason: e.to_string(),
                }),
            }
        }
        failed.sort_by_key(|f| f.index);

        Ok(EncodedCrops { crops, failed })
    }

    /// Load a new model and make it current together with `class_names`.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ClassNames`] for an empty or mismatched table and the
    /// loader's error for a bad source; the current model stays in place either way.
    pub fn change_model(
        &self,
        name: &str,
        source: &str,
        class_names: Vec<String>,
    ) -> Result<Arc<ModelSnapshot>> {
        let class_names = ClassNames::new(class_names)?;
        self.registry
            .replace(name, source, class_names, self.loader.as_ref())
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("font", &self.font.is_some())
            .finish_non_exhaustive()
    }
}

fn failures(extraction: &Extraction) -> Vec<FailedInstance> {
    extraction
        .failures()
        .map(|(index, e)| FailedInstance {
            index,
            reason: e.to_string(),
        })
        .collect()
}
