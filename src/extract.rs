// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Per-instance cropping and masking.
//!
//! [`extract`] turns one [`DetectionResult`] into one crop per instance, in the
//! model's emission order. Each instance is isolated: a malformed box or mask fails
//! that slot only, and the failure is reported alongside the crops that succeeded.

use ndarray::{Axis, Zip, s};
use tracing::warn;

use crate::error::{Result, ServeError};
use crate::image_buffer::{ImageBuffer, MAX_SAMPLE};
use crate::results::DetectionResult;

/// Outcome of extracting every instance of one detection result.
///
/// Slot `i` always corresponds to instance `i` of the result, so crops can be
/// correlated with class ids and scores by position.
#[derive(Debug)]
pub struct Extraction {
    outcomes: Vec<Result<ImageBuffer>>,
}

impl Extraction {
    /// Number of slots, equal to the number of instances in the result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the result had no instances at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Per-instance outcomes in emission order.
    #[must_use]
    pub fn outcomes(&self) -> &[Result<ImageBuffer>] {
        &self.outcomes
    }

    /// Successful crops with their instance index.
    pub fn crops(&self) -> impl Iterator<Item = (usize, &ImageBuffer)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, outcome)| outcome.as_ref().ok().map(|crop| (i, crop)))
    }

    /// Failed instances with their index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ServeError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, outcome)| outcome.as_ref().err().map(|err| (i, err)))
    }

    /// Whether any instance failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(std::result::Result::is_err)
    }

    /// Consume into the raw outcomes.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<Result<ImageBuffer>> {
        self.outcomes
    }

    /// All crops, or the first failure if any instance failed.
    ///
    /// # Errors
    ///
    /// Returns the lowest-index extraction error.
    pub fn into_strict(self) -> Result<Vec<ImageBuffer>> {
        self.outcomes.into_iter().collect()
    }
}

/// Crop every instance of `result` out of `image`.
///
/// With `apply_mask`, pixels outside the instance mask are white-filled before the
/// crop is returned. A zero-instance result yields an empty [`Extraction`].
#[must_use]
pub fn extract(image: &ImageBuffer, result: &DetectionResult, apply_mask: bool) -> Extraction {
    let outcomes = (0..result.len())
        .map(|index| {
            let outcome = extract_instance(image, result, index, apply_mask);
            if let Err(ref e) = outcome {
                warn!("Skipping instance {index}: {e}");
            }
            outcome
        })
        .collect();

    Extraction { outcomes }
}

/// Crop a single instance.
///
/// # Errors
///
/// Returns [`ServeError::Extraction`] if the box leaves the image or the mask shape
/// doesn't match the image.
pub fn extract_instance(
    image: &ImageBuffer,
    result: &DetectionResult,
    index: usize,
    apply_mask: bool,
) -> Result<ImageBuffer> {
    let (height, width) = image.dims();
    let roi = result.rois().get(index).copied().ok_or_else(|| ServeError::Extraction {
        index,
        reason: format!("no such instance, result has {}", result.len()),
    })?;

    if !roi.fits(height, width) {
        return Err(ServeError::Extraction {
            index,
            reason: format!(
                "box (y1={}, x1={}, y2={}, x2={}) outside {width}x{height} image",
                roi.y1, roi.x1, roi.y2, roi.x2
            ),
        });
    }

    let mut crop = image
        .pixels()
        .slice(s![roi.y1..roi.y2, roi.x1..roi.x2, ..])
        .to_owned();

    if apply_mask {
        let mask_shape = result.mask_shape();
        if mask_shape != (height, width) {
            return Err(ServeError::Extraction {
                index,
                reason: format!(
                    "mask is {}x{} but image is {width}x{height}",
                    mask_shape.1, mask_shape.0
                ),
            });
        }

        // Pixels outside the box are discarded by the crop, so only the box region of
        // the mask matters.
        let mask = result.mask(index);
        let mask = mask.slice(s![roi.y1..roi.y2, roi.x1..roi.x2]);
        Zip::from(crop.lanes_mut(Axis(2)))
            .and(mask)
            .for_each(|mut pixel, &keep| {
                if !keep {
                    pixel.fill(MAX_SAMPLE);
                }
            });
    }

    ImageBuffer::new(crop, image.format()).map_err(|e| ServeError::Extraction {
        index,
        reason: e.to_string(),
    })
}
