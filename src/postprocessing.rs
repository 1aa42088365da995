// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Decoding of raw segmentation model outputs.
//!
//! A YOLO segmentation model emits two tensors:
//! - `output0` with shape `[1, 4 + nc + nm, N]` (or transposed): box, class scores and
//!   mask coefficients per candidate,
//! - `output1` with shape `[1, nm, mh, mw]`: mask prototypes.
//!
//! Candidates are filtered by confidence, suppressed per class, and each survivor's mask
//! is assembled from the prototypes and upsampled over its box in the source image.

#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use ndarray::{Array2, Array3, ArrayView2, s};
use tracing::debug;

use crate::error::{Result, ServeError};
use crate::inference::InferenceConfig;
use crate::preprocessing::{Letterbox, scale_coords};
use crate::results::{DetectionResult, Roi};
use crate::utils::{nms_per_class, sigmoid};

/// A raw output tensor: flat data and its shape.
pub type RawOutput = (Vec<f32>, Vec<usize>);

/// A candidate that passed the confidence filter.
struct Candidate {
    bbox: [f32; 4],
    roi: Roi,
    score: f32,
    class: usize,
    row: usize,
}

/// Decode one image's outputs into a [`DetectionResult`].
///
/// `num_classes` is the model's foreground class count; when unknown it is derived
/// from the output shape. Emitted class ids are shifted by one so id 0 stays reserved
/// for the background entry of the class-name table.
///
/// # Errors
///
/// Returns [`ServeError::Inference`] if the outputs don't have segmentation shapes.
pub fn decode_segmentation(
    outputs: &[RawOutput],
    letterbox: &Letterbox,
    config: &InferenceConfig,
    num_classes: Option<usize>,
) -> Result<DetectionResult> {
    let [(preds, preds_shape), (protos, protos_shape), ..] = outputs else {
        return Err(ServeError::Inference(format!(
            "segmentation model must have 2 outputs, got {}",
            outputs.len()
        )));
    };

    let &[_, num_masks, mh, mw] = protos_shape.as_slice() else {
        return Err(ServeError::Inference(format!(
            "mask prototypes must be 4-D, got shape {protos_shape:?}"
        )));
    };
    let protos = ArrayView2::from_shape((num_masks, mh * mw), protos)
        .map_err(|e| ServeError::Inference(format!("Malformed mask prototypes: {e}")))?;

    let (rows, nc) = prediction_rows(preds, preds_shape, num_masks, num_classes)?;
    let (oh, ow) = letterbox.orig_shape;

    let candidates = collect_candidates(rows, nc, letterbox, config);
    if candidates.is_empty() {
        return Ok(DetectionResult::empty(oh, ow));
    }

    let nms_input: Vec<_> = candidates
        .iter()
        .map(|c| (c.bbox, c.score, c.class))
        .collect();
    let keep: Vec<&Candidate> = nms_per_class(&nms_input, config.iou_threshold)
        .into_iter()
        .take(config.max_detections)
        .map(|i| &candidates[i])
        .collect();
    debug!("{} candidates, {} kept after NMS", candidates.len(), keep.len());

    let mut coeffs = Array2::<f32>::zeros((keep.len(), num_masks));
    for (k, candidate) in keep.iter().enumerate() {
        coeffs
            .row_mut(k)
            .assign(&rows.slice(s![candidate.row, 4 + nc..4 + nc + num_masks]));
    }
    let logits = coeffs.dot(&protos);

    let mut masks = Array3::from_elem((keep.len(), oh, ow), false);
    let mut resizer = Resizer::new();
    let region = PrototypeRegion::new(letterbox, (mh, mw));

    for (k, candidate) in keep.iter().enumerate() {
        let probs: Vec<f32> = logits.row(k).iter().map(|&v| sigmoid(v)).collect();
        let src = Image::from_vec_u8(
            mw as u32,
            mh as u32,
            bytemuck::cast_slice(&probs).to_vec(),
            PixelType::F32,
        )
        .map_err(|e| ServeError::Inference(format!("Failed to wrap mask: {e}")))?;

        // Only the box is upsampled; the rest of the mask stays false.
        let roi = candidate.roi;
        let mut dst = Image::new(roi.width() as u32, roi.height() as u32, PixelType::F32);
        resizer
            .resize(&src, &mut dst, &region.box_options(roi, (oh, ow)))
            .map_err(|e| ServeError::Inference(format!("Failed to resize mask: {e}")))?;
        let upsampled: Vec<f32> = bytemuck::pod_collect_to_vec(dst.buffer());

        let mut mask = masks.slice_mut(s![k, roi.y1..roi.y2, roi.x1..roi.x2]);
        for ((y, x), value) in mask.indexed_iter_mut() {
            *value = upsampled[y * roi.width() + x] > config.mask_threshold;
        }
    }

    DetectionResult::new(
        keep.iter().map(|c| c.roi).collect(),
        masks,
        keep.iter().map(|c| c.class + 1).collect(),
        keep.iter().map(|c| c.score).collect(),
    )
}

/// View the prediction tensor as `(candidates, features)` and resolve the class count.
fn prediction_rows<'a>(
    data: &'a [f32],
    shape: &[usize],
    num_masks: usize,
    num_classes: Option<usize>,
) -> Result<(ArrayView2<'a, f32>, usize)> {
    let &[_, a, b] = shape else {
        return Err(ServeError::Inference(format!(
            "predictions must be 3-D, got shape {shape:?}"
        )));
    };

    let features = match num_classes {
        Some(nc) => 4 + nc + num_masks,
        // Candidate count dwarfs the feature count for any real input size.
        None => a.min(b),
    };
    let nc = features
        .checked_sub(4 + num_masks)
        .filter(|&nc| nc > 0)
        .ok_or_else(|| {
            ServeError::Inference(format!(
                "prediction shape {shape:?} leaves no room for class scores with {num_masks} mask coefficients"
            ))
        })?;

    let malformed = |e| ServeError::Inference(format!("Malformed predictions: {e}"));
    let rows = if a == features {
        ArrayView2::from_shape((a, b), data).map_err(malformed)?.reversed_axes()
    } else if b == features {
        ArrayView2::from_shape((a, b), data).map_err(malformed)?
    } else {
        return Err(ServeError::Inference(format!(
            "prediction shape {shape:?} doesn't match {features} features ({nc} classes, {num_masks} masks)"
        )));
    };

    Ok((rows, nc))
}

fn collect_candidates(
    rows: ArrayView2<'_, f32>,
    nc: usize,
    letterbox: &Letterbox,
    config: &InferenceConfig,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for (i, row) in rows.outer_iter().enumerate() {
        let (class, score) = row
            .slice(s![4..4 + nc])
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| !score.is_nan())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .unwrap_or((0, 0.0));

        if score < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = scale_coords(
            &[cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            letterbox.scale,
            letterbox.padding,
        );

        let Some(roi) = Roi::from_xyxy(&bbox, letterbox.orig_shape) else {
            debug!("Dropping candidate {i}: box {bbox:?} is empty after clipping");
            continue;
        };

        candidates.push(Candidate {
            bbox,
            roi,
            score,
            class,
            row: i,
        });
    }

    candidates
}

/// The prototype region that corresponds to the unpadded image.
#[derive(Debug, Clone, Copy)]
struct PrototypeRegion {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl PrototypeRegion {
    fn new(letterbox: &Letterbox, (mh, mw): (usize, usize)) -> Self {
        let (th, tw) = letterbox.input_shape();
        let (pad_top, pad_left) = letterbox.padding;

        let crop_x = pad_left * mw as f32 / tw as f32;
        let crop_y = pad_top * mh as f32 / th as f32;
        let crop_w = (mw as f32 - 2.0 * crop_x).clamp(1.0, mw as f32);
        let crop_h = (mh as f32 - 2.0 * crop_y).clamp(1.0, mh as f32);

        Self {
            left: f64::from(crop_x.max(0.0)),
            top: f64::from(crop_y.max(0.0)),
            width: f64::from(crop_w),
            height: f64::from(crop_h),
        }
    }

    /// Resize options selecting the part of the region that maps onto `roi` in an
    /// image of `(oh, ow)`.
    fn box_options(&self, roi: Roi, (oh, ow): (usize, usize)) -> ResizeOptions {
        let sx = self.width / ow as f64;
        let sy = self.height / oh as f64;

        ResizeOptions::new()
            .resize_alg(ResizeAlg::Convolution(FilterType::Bilinear))
            .crop(
                self.left + roi.x1 as f64 * sx,
                self.top + roi.y1 as f64 * sy,
                roi.width() as f64 * sx,
                roi.height() as f64 * sy,
            )
    }
}
