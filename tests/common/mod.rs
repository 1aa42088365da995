// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Deterministic stand-ins for the ONNX backend.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;
use ndarray::{Array3, s};
use segment_serve::pipeline::PipelineSettings;
use segment_serve::{
    ClassNames, DetectionResult, FormatPolicy, ImageBuffer, ModelLoader, ModelRegistry,
    RequestPipeline, Result, Roi, Segmenter, ServeError, codec,
};

/// Class names matching [`FakeSegmenter::new(2)`].
pub const NAMES: [&str; 3] = ["BG", "circle", "square"];

/// Emits two instances per image at fixed fractions of its size, plus an optional
/// instance whose box leaves the image.
pub struct FakeSegmenter {
    classes: usize,
    instances: bool,
    bad_instance: bool,
}

impl FakeSegmenter {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            instances: true,
            bad_instance: false,
        }
    }

    /// A model that never finds anything.
    pub fn empty(classes: usize) -> Self {
        Self {
            instances: false,
            ..Self::new(classes)
        }
    }

    pub fn with_bad_instance(mut self) -> Self {
        self.bad_instance = true;
        self
    }
}

/// Boxes emitted for an image of `(height, width)`.
pub fn fake_rois(height: usize, width: usize) -> [Roi; 2] {
    [
        Roi::new(height / 8, width / 8, height / 2, width / 2),
        Roi::new(height / 2, width / 2, height * 7 / 8, width * 7 / 8),
    ]
}

impl Segmenter for FakeSegmenter {
    fn detect(&self, images: &[ImageBuffer]) -> Result<Vec<DetectionResult>> {
        Ok(images
            .iter()
            .map(|image| {
                let (h, w) = image.dims();
                if !self.instances {
                    return Ok(DetectionResult::empty(h, w));
                }

                let mut rois = fake_rois(h, w).to_vec();
                let mut class_ids = vec![1, 2];
                let mut scores = vec![0.9, 0.8];
                if self.bad_instance {
                    rois.push(Roi::new(0, 0, h + 5, w));
                    class_ids.push(1);
                    scores.push(0.7);
                }

                // Each mask covers its box except the box's first column.
                let mut masks = Array3::from_elem((rois.len(), h, w), false);
                for (i, roi) in rois.iter().enumerate() {
                    let (y2, x2) = (roi.y2.min(h), roi.x2.min(w));
                    masks
                        .slice_mut(s![i, roi.y1..y2, (roi.x1 + 1).min(x2)..x2])
                        .fill(true);
                }
                DetectionResult::new(rois, masks, class_ids, scores)
            })
            .collect::<Result<Vec<_>>>()?)
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.classes)
    }
}

/// Understands `fake:<classes>`, `fake-empty:<classes>`; anything else fails to load.
pub struct FakeLoader;

impl ModelLoader for FakeLoader {
    fn load(&self, _name: &str, source: &str) -> Result<Arc<dyn Segmenter>> {
        let (kind, classes) = source
            .split_once(':')
            .ok_or_else(|| ServeError::ModelLoad(format!("Model file not found: {source}")))?;
        let classes = classes
            .parse()
            .map_err(|_| ServeError::ModelLoad(format!("bad class count in {source}")))?;
        match kind {
            "fake" => Ok(Arc::new(FakeSegmenter::new(classes))),
            "fake-empty" => Ok(Arc::new(FakeSegmenter::empty(classes))),
            _ => Err(ServeError::ModelLoad(format!("unknown source {source}"))),
        }
    }
}

pub fn names() -> ClassNames {
    ClassNames::new(NAMES.iter().map(ToString::to_string).collect()).unwrap()
}

pub fn settings(output_dir: &Path) -> PipelineSettings {
    PipelineSettings {
        apply_mask: true,
        persist_format: ImageFormat::Png,
        transport_format: FormatPolicy::Original,
        output_dir: output_dir.to_path_buf(),
    }
}

pub fn pipeline_with(model: FakeSegmenter, settings: PipelineSettings) -> RequestPipeline {
    let registry = ModelRegistry::new("fake", Arc::new(model), names()).unwrap();
    RequestPipeline::new(Arc::new(registry), Arc::new(FakeLoader), settings)
}

pub fn pipeline(output_dir: &Path) -> RequestPipeline {
    pipeline_with(FakeSegmenter::new(2), settings(output_dir))
}

/// Gradient test image; no sample reaches 255.
#[allow(clippy::cast_possible_truncation)]
pub fn test_image(height: usize, width: usize, format: ImageFormat) -> ImageBuffer {
    let pixels = Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
        ((y * 3 + x * 2 + c * 50) % 200) as u8
    });
    ImageBuffer::new(pixels, format).unwrap()
}

pub fn encoded_image(height: usize, width: usize, format: ImageFormat) -> Vec<u8> {
    codec::encode(&test_image(height, width, format), format).unwrap()
}
