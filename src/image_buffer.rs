// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Decoded pixel buffers tagged with their originating container format.

use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::Array3;

use crate::error::{Result, ServeError};

/// Number of samples per pixel after normalization (RGB).
pub const CHANNELS: usize = 3;

/// Maximum value of a single sample, used for white-fill.
pub const MAX_SAMPLE: u8 = u8::MAX;

/// An HWC `u8` pixel array plus the container format it came from.
///
/// The format tag is carried so the image (or crops of it) can be re-encoded in the
/// same container it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    pixels: Array3<u8>,
    format: ImageFormat,
}

impl ImageBuffer {
    /// Wrap an existing `(height, width, 3)` array.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Decode`] if either spatial dimension is zero or the
    /// channel count is not 3.
    pub fn new(pixels: Array3<u8>, format: ImageFormat) -> Result<Self> {
        let shape = pixels.shape();
        if shape[0] == 0 || shape[1] == 0 {
            return Err(ServeError::Decode(format!(
                "image must be non-empty, got {}x{}",
                shape[1], shape[0]
            )));
        }
        if shape[2] != CHANNELS {
            return Err(ServeError::Decode(format!(
                "expected {CHANNELS} channels, got {}",
                shape[2]
            )));
        }
        Ok(Self { pixels, format })
    }

    /// Build a buffer from a decoded image, dropping alpha and any extra channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the image has zero area.
    pub fn from_dynamic(image: &DynamicImage, format: ImageFormat) -> Result<Self> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = Array3::from_shape_vec((height as usize, width as usize, CHANNELS), rgb.into_raw())
            .map_err(|e| ServeError::Decode(format!("failed to build pixel array: {e}")))?;
        Self::new(pixels, format)
    }

    /// Convert back to an RGB `DynamicImage` for encoding or drawing.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimensions don't fit in `u32`.
    pub fn to_dynamic(&self) -> Result<DynamicImage> {
        let height = u32::try_from(self.height())
            .map_err(|_| ServeError::Encode("image height exceeds u32::MAX".to_string()))?;
        let width = u32::try_from(self.width())
            .map_err(|_| ServeError::Encode("image width exceeds u32::MAX".to_string()))?;

        // Logical iteration order is row-major HWC regardless of memory layout.
        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        let rgb = RgbImage::from_raw(width, height, raw)
            .ok_or_else(|| ServeError::Encode("failed to create image from array".to_string()))?;
        Ok(DynamicImage::ImageRgb8(rgb))
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    /// `(height, width)` pair.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Borrow the pixel array.
    #[must_use]
    pub const fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// The originating container format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Same pixels, different format tag.
    #[must_use]
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }
}
