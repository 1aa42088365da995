// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Detection overlay rendering.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use ndarray::{Axis, Zip};
use tracing::warn;

use crate::error::{Result, ServeError};
use crate::image_buffer::ImageBuffer;
use crate::names::ClassNames;
use crate::results::DetectionResult;

/// Ultralytics Color Palette
pub const COLORS: [[u8; 3]; 20] = [
    [4, 42, 255],    // #042aff
    [11, 219, 235],  // #0bdbeb
    [243, 243, 243], // #f3f3f3
    [0, 223, 183],   // #00dfb7
    [17, 31, 104],   // #111f68
    [255, 111, 221], // #ff6fdd
    [255, 68, 79],   // #ff444f
    [204, 237, 0],   // #cced00
    [0, 243, 68],    // #00f344
    [189, 0, 255],   // #bd00ff
    [0, 180, 255],   // #00b4ff
    [221, 0, 186],   // #dd00ba
    [0, 255, 255],   // #00ffff
    [38, 192, 0],    // #26c000
    [1, 255, 179],   // #01ffb3
    [125, 36, 255],  // #7d24ff
    [123, 0, 104],   // #7b0068
    [255, 27, 108],  // #ff1b6c
    [252, 109, 47],  // #fc6d2f
    [162, 255, 11],  // #a2ff0b
];

/// Box outline width in pixels.
const BOX_THICKNESS: i32 = 2;

/// Label font height in pixels.
const LABEL_SCALE: f32 = 16.0;

/// Palette color for a class id.
#[must_use]
pub const fn class_color(class_id: usize) -> [u8; 3] {
    COLORS[class_id % COLORS.len()]
}

/// Load a TrueType/OpenType font for labels.
///
/// # Errors
///
/// Returns [`ServeError::Config`] if the file can't be read or parsed.
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontVec> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| ServeError::Config(format!("Failed to read font {}: {e}", path.display())))?;
    FontVec::try_from_vec(data)
        .map_err(|e| ServeError::Config(format!("Invalid font {}: {e}", path.display())))
}

/// Draw every instance of `result` over a copy of `image`.
///
/// Masks are tinted with the class color at half opacity, then boxes are outlined.
/// Labels (`name score`) are drawn only when a font is available.
///
/// # Errors
///
/// Returns [`ServeError::Encode`] if the overlay can't be converted back to a buffer.
pub fn visualize(
    image: &ImageBuffer,
    result: &DetectionResult,
    names: &ClassNames,
    font: Option<&FontVec>,
) -> Result<ImageBuffer> {
    let mut pixels = image.pixels().clone();

    if result.mask_shape() == image.dims() {
        for (i, &class_id) in result.class_ids().iter().enumerate() {
            let color = class_color(class_id);
            Zip::from(pixels.lanes_mut(Axis(2)))
                .and(result.mask(i))
                .for_each(|mut pixel, &inside| {
                    if inside {
                        for (value, &tint) in pixel.iter_mut().zip(&color) {
                            *value = ((u16::from(*value) + u16::from(tint)) / 2) as u8;
                        }
                    }
                });
        }
    } else if !result.is_empty() {
        warn!(
            "Mask shape {:?} doesn't match image {:?}, drawing boxes only",
            result.mask_shape(),
            image.dims()
        );
    }

    let mut canvas = ImageBuffer::new(pixels, image.format())?
        .to_dynamic()?
        .to_rgb8();
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);

    for (i, roi) in result.rois().iter().enumerate() {
        let class_id = result.class_ids()[i];
        let color = Rgb(class_color(class_id));

        let (x1, y1) = (roi.x1 as i32, roi.y1 as i32);
        let (x2, y2) = ((roi.x2 as i32).min(width), (roi.y2 as i32).min(height));
        for t in 0..BOX_THICKNESS {
            let (w, h) = (x2 - x1 - 2 * t, y2 - y1 - 2 * t);
            if w > 0 && h > 0 {
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32),
                    color,
                );
            }
        }

        if let Some(font) = font {
            let label = format!("{} {:.2}", names.label(class_id), result.scores()[i]);
            let scale = PxScale::from(LABEL_SCALE);
            let (text_w, text_h) = text_size(scale, font, &label);
            let text_y = if y1 >= text_h as i32 { y1 - text_h as i32 } else { y1 };

            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(x1, text_y).of_size(text_w.max(1), text_h.max(1)),
                color,
            );
            draw_text_mut(&mut canvas, Rgb([255, 255, 255]), x1, text_y, scale, font, &label);
        }
    }

    ImageBuffer::from_dynamic(&DynamicImage::ImageRgb8(canvas), image.format())
}
