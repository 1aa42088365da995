// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Letterbox preprocessing.
//!
//! Images are scaled to fit the model input while keeping their aspect ratio, centred,
//! padded with gray and converted to a normalized NCHW tensor.

#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use ndarray::Array4;

use crate::error::{Result, ServeError};
use crate::image_buffer::{CHANNELS, ImageBuffer};

/// Normalized letterbox padding value (114/255).
const LETTERBOX_NORM: f32 = 114.0 / 255.0;

/// Reciprocal of 255 for normalization.
const INV_255: f32 = 1.0 / 255.0;

/// A preprocessed tensor and the transform that produced it.
#[derive(Debug, Clone)]
pub struct Letterbox {
    /// `(1, 3, H, W)` tensor with values in `[0, 1]`.
    pub tensor: Array4<f32>,
    /// Source image `(height, width)`.
    pub orig_shape: (usize, usize),
    /// Scale factors applied (`scale_y`, `scale_x`).
    pub scale: (f32, f32),
    /// Padding applied (`pad_top`, `pad_left`).
    pub padding: (f32, f32),
}

impl Letterbox {
    /// Tensor spatial size `(height, width)`.
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize) {
        let shape = self.tensor.shape();
        (shape[2], shape[3])
    }
}

/// Letterbox `image` into a `target_size` tensor.
///
/// # Errors
///
/// Returns [`ServeError::Inference`] if the resize fails.
pub fn letterbox(image: &ImageBuffer, target_size: (usize, usize)) -> Result<Letterbox> {
    let (orig_h, orig_w) = image.dims();
    let (target_h, target_w) = target_size;
    let params = letterbox_params((orig_h, orig_w), target_size);

    let src = Image::from_vec_u8(
        orig_w as u32,
        orig_h as u32,
        image.pixels().iter().copied().collect(),
        PixelType::U8x3,
    )
    .map_err(|e| ServeError::Inference(format!("Failed to wrap source image: {e}")))?;

    let mut dst = Image::new(params.new_w as u32, params.new_h as u32, PixelType::U8x3);
    Resizer::new()
        .resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )
        .map_err(|e| ServeError::Inference(format!("Failed to resize image: {e}")))?;

    let mut tensor = Array4::from_elem((1, CHANNELS, target_h, target_w), LETTERBOX_NORM);
    for (i, pixel) in dst.buffer().chunks_exact(CHANNELS).enumerate() {
        let y = params.pad_top + i / params.new_w;
        let x = params.pad_left + i % params.new_w;
        for (c, &value) in pixel.iter().enumerate() {
            tensor[[0, c, y, x]] = f32::from(value) * INV_255;
        }
    }

    Ok(Letterbox {
        tensor,
        orig_shape: (orig_h, orig_w),
        scale: params.scale,
        padding: (params.pad_top as f32, params.pad_left as f32),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LetterboxParams {
    new_w: usize,
    new_h: usize,
    pad_left: usize,
    pad_top: usize,
    scale: (f32, f32),
}

fn letterbox_params(
    (orig_h, orig_w): (usize, usize),
    (target_h, target_w): (usize, usize),
) -> LetterboxParams {
    let (orig_hf, orig_wf) = (orig_h as f32, orig_w as f32);
    let ratio = (target_h as f32 / orig_hf).min(target_w as f32 / orig_wf);

    let new_w = ((orig_wf * ratio).round() as usize).clamp(1, target_w);
    let new_h = ((orig_hf * ratio).round() as usize).clamp(1, target_h);

    LetterboxParams {
        new_w,
        new_h,
        pad_left: (target_w - new_w) / 2,
        pad_top: (target_h - new_h) / 2,
        scale: (new_h as f32 / orig_hf, new_w as f32 / orig_wf),
    }
}

/// Map `[x1, y1, x2, y2]` from letterboxed tensor space back to source pixels.
#[must_use]
pub fn scale_coords(coords: &[f32; 4], scale: (f32, f32), padding: (f32, f32)) -> [f32; 4] {
    let (scale_y, scale_x) = scale;
    let (pad_top, pad_left) = padding;

    [
        (coords[0] - pad_left) / scale_x,
        (coords[1] - pad_top) / scale_y,
        (coords[2] - pad_left) / scale_x,
        (coords[3] - pad_top) / scale_y,
    ]
}
