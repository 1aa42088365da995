// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Raw detection output for a single image.
//!
//! A [`DetectionResult`] holds four parallel collections indexed by instance. Their
//! order is the model's emission order and is preserved by everything downstream.

use ndarray::{Array3, ArrayView2, Axis};

use crate::error::{Result, ServeError};

/// Timing information for inference operations (in milliseconds).
#[derive(Debug, Clone, Default)]
pub struct Speed {
    /// Time spent on preprocessing.
    pub preprocess: Option<f64>,
    /// Time spent on model inference.
    pub inference: Option<f64>,
    /// Time spent on postprocessing.
    pub postprocess: Option<f64>,
}

impl Speed {
    /// Create a new Speed instance with all timings.
    #[must_use]
    pub const fn new(preprocess: f64, inference: f64, postprocess: f64) -> Self {
        Self {
            preprocess: Some(preprocess),
            inference: Some(inference),
            postprocess: Some(postprocess),
        }
    }

    /// Sum of all recorded stages in milliseconds.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.preprocess.unwrap_or(0.0)
            + self.inference.unwrap_or(0.0)
            + self.postprocess.unwrap_or(0.0)
    }
}

/// Bounding box in `(y1, x1, y2, x2)` pixel order, half-open on the far edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    /// Top row (inclusive).
    pub y1: usize,
    /// Left column (inclusive).
    pub x1: usize,
    /// Bottom row (exclusive).
    pub y2: usize,
    /// Right column (exclusive).
    pub x2: usize,
}

impl Roi {
    /// Create a box from `(y1, x1, y2, x2)`.
    #[must_use]
    pub const fn new(y1: usize, x1: usize, y2: usize, x2: usize) -> Self {
        Self { y1, x1, y2, x2 }
    }

    /// Snap a floating-point `[x1, y1, x2, y2]` box outward to whole pixels and clip it
    /// to an image of `(height, width)`.
    ///
    /// Returns `None` when nothing of the box is left after clipping.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_xyxy(xyxy: &[f32; 4], (height, width): (usize, usize)) -> Option<Self> {
        let clip = |v: f32, max: usize| -> usize { (v.max(0.0) as usize).min(max) };

        let x1 = clip(xyxy[0].floor(), width);
        let y1 = clip(xyxy[1].floor(), height);
        let x2 = clip(xyxy[2].ceil(), width);
        let y2 = clip(xyxy[3].ceil(), height);

        (y1 < y2 && x1 < x2).then_some(Self { y1, x1, y2, x2 })
    }

    /// Number of rows covered.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.y2.saturating_sub(self.y1)
    }

    /// Number of columns covered.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.x2.saturating_sub(self.x1)
    }

    /// Whether `0 <= y1 < y2 <= height` and `0 <= x1 < x2 <= width`.
    #[must_use]
    pub const fn fits(&self, height: usize, width: usize) -> bool {
        self.y1 < self.y2 && self.y2 <= height && self.x1 < self.x2 && self.x2 <= width
    }

    /// `[x1, y1, x2, y2]` as floats, the layout drawing code expects.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn xyxy(&self) -> [f32; 4] {
        [self.x1 as f32, self.y1 as f32, self.x2 as f32, self.y2 as f32]
    }
}

/// The model's raw output for one image.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    rois: Vec<Roi>,
    /// Boolean masks with shape `(N, H, W)`.
    masks: Array3<bool>,
    class_ids: Vec<usize>,
    scores: Vec<f32>,
}

impl DetectionResult {
    /// Assemble a result from its parallel collections.
    ///
    /// Only the collection lengths are checked here. Per-instance geometry is checked
    /// at extraction time so one bad instance doesn't reject the rest.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Inference`] if the four collections differ in length.
    pub fn new(
        rois: Vec<Roi>,
        masks: Array3<bool>,
        class_ids: Vec<usize>,
        scores: Vec<f32>,
    ) -> Result<Self> {
        let n = rois.len();
        let n_masks = masks.len_of(Axis(0));
        if n_masks != n || class_ids.len() != n || scores.len() != n {
            return Err(ServeError::Inference(format!(
                "detection collections differ in length: rois={n}, masks={n_masks}, class_ids={}, scores={}",
                class_ids.len(),
                scores.len()
            )));
        }
        Ok(Self {
            rois,
            masks,
            class_ids,
            scores,
        })
    }

    /// A result with no instances for an image of `(height, width)`.
    #[must_use]
    pub fn empty(height: usize, width: usize) -> Self {
        Self {
            rois: Vec::new(),
            masks: Array3::from_elem((0, height, width), false),
            class_ids: Vec::new(),
            scores: Vec::new(),
        }
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rois.len()
    }

    /// Whether nothing was detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    /// Bounding boxes in emission order.
    #[must_use]
    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    /// All masks, shape `(N, H, W)`.
    #[must_use]
    pub const fn masks(&self) -> &Array3<bool> {
        &self.masks
    }

    /// Mask for one instance.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn mask(&self, index: usize) -> ArrayView2<'_, bool> {
        self.masks.index_axis(Axis(0), index)
    }

    /// `(height, width)` every mask is defined over.
    #[must_use]
    pub fn mask_shape(&self) -> (usize, usize) {
        let shape = self.masks.shape();
        (shape[1], shape[2])
    }

    /// Class ids in emission order.
    #[must_use]
    pub fn class_ids(&self) -> &[usize] {
        &self.class_ids
    }

    /// Confidence scores in emission order.
    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }
}
