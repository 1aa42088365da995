// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Image serialization: container formats, base64 transport, and local files.
//!
//! Two format rules apply and both are explicit here:
//! - local persistence normalizes to one format (JPEG unless configured otherwise),
//! - transport encoding keeps each image's original container format unless a
//!   [`FormatPolicy::Fixed`] override is configured.
//!
//! Base64 round-trips are exact on bytes. Pixel equality after a round-trip only holds
//! for lossless formats such as PNG.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;

use crate::error::{Result, ServeError};
use crate::image_buffer::ImageBuffer;

/// Format every locally persisted image is written in by default.
pub const PERSIST_FORMAT: ImageFormat = ImageFormat::Jpeg;

/// How to pick the container format when encoding an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatPolicy {
    /// Keep the format the image arrived in.
    #[default]
    Original,
    /// Always use this format.
    Fixed(ImageFormat),
}

impl FormatPolicy {
    /// The format to encode `image` with.
    #[must_use]
    pub const fn resolve(&self, image: &ImageBuffer) -> ImageFormat {
        match self {
            Self::Original => image.format(),
            Self::Fixed(format) => *format,
        }
    }
}

impl fmt::Display for FormatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Fixed(format) => write!(f, "{}", format_name(*format)),
        }
    }
}

impl FromStr for FormatPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "original" {
            return Ok(Self::Original);
        }
        parse_format(&s).map(Self::Fixed)
    }
}

/// Parse a format name or file extension such as `png`, `jpg` or `jpeg`.
///
/// # Errors
///
/// Returns a message naming the unknown format.
pub fn parse_format(name: &str) -> std::result::Result<ImageFormat, String> {
    ImageFormat::from_extension(name.trim().trim_start_matches('.'))
        .ok_or_else(|| format!("Unknown image format: {name}"))
}

/// Canonical lowercase extension for a format.
#[must_use]
pub fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("bin")
}

/// Decode container bytes into a 3-channel buffer.
///
/// The format is sniffed from the bytes; `declared` is used only when sniffing fails.
/// The detected format becomes the buffer's format tag.
///
/// # Errors
///
/// Returns [`ServeError::Decode`] if the format is unknown or the bytes are malformed.
pub fn decode(bytes: &[u8], declared: Option<ImageFormat>) -> Result<ImageBuffer> {
    let format = image::guess_format(bytes)
        .ok()
        .or(declared)
        .ok_or_else(|| ServeError::Decode("unrecognized image container".to_string()))?;

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ServeError::Decode(format!("invalid {} image: {e}", format_name(format))))?;

    ImageBuffer::from_dynamic(&image, format)
}

/// Encode a buffer into container bytes.
///
/// # Errors
///
/// Returns [`ServeError::Encode`] if the format has no encoder for RGB data.
pub fn encode(image: &ImageBuffer, format: ImageFormat) -> Result<Vec<u8>> {
    let dynamic = image.to_dynamic()?;
    let mut bytes = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut bytes, format)
        .map_err(|e| ServeError::Encode(format!("failed to encode {}: {e}", format_name(format))))?;
    Ok(bytes.into_inner())
}

/// Encode in the image's original format, then as standard base64.
///
/// # Errors
///
/// Returns an error if the image can't be encoded.
pub fn to_base64(image: &ImageBuffer) -> Result<String> {
    to_base64_as(image, image.format())
}

/// Encode in `format`, then as standard base64.
///
/// # Errors
///
/// Returns an error if the image can't be encoded.
pub fn to_base64_as(image: &ImageBuffer, format: ImageFormat) -> Result<String> {
    Ok(STANDARD.encode(encode(image, format)?))
}

/// Decode base64 text into a buffer.
///
/// Surrounding whitespace and a `data:<mime>;base64,` prefix are tolerated.
///
/// # Errors
///
/// Returns [`ServeError::Base64`] for malformed text and [`ServeError::Decode`] for
/// malformed image bytes.
pub fn from_base64(text: &str, declared: Option<ImageFormat>) -> Result<ImageBuffer> {
    let text = text.trim();
    let payload = match text.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => text,
    };
    let bytes = STANDARD.decode(payload)?;
    decode(&bytes, declared)
}

/// Write `image` as a JPEG file, replacing any existing file at `path`.
///
/// # Errors
///
/// Returns [`ServeError::Persistence`] if encoding or writing fails.
pub fn to_file<P: AsRef<Path>>(image: &ImageBuffer, path: P) -> Result<()> {
    to_file_as(image, path, PERSIST_FORMAT)
}

/// Write `image` in `format`, replacing any existing file at `path`.
///
/// # Errors
///
/// Returns [`ServeError::Persistence`] if encoding or writing fails.
pub fn to_file_as<P: AsRef<Path>>(image: &ImageBuffer, path: P, format: ImageFormat) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(image, format).map_err(|e| ServeError::Persistence(e.to_string()))?;
    std::fs::write(path, bytes)
        .map_err(|e| ServeError::Persistence(format!("Failed to write {}: {e}", path.display())))
}

/// File name for the crop of instance `index`.
#[must_use]
pub fn result_file_name(index: usize, format: ImageFormat) -> String {
    format!("result_{index}.{}", format_name(format))
}

/// Handles to one request's persisted crops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBatch {
    /// Identifier of the request that produced the batch.
    pub request_id: String,
    /// Directory holding the files.
    pub dir: PathBuf,
    /// `(instance index, path)` in emission order.
    pub files: Vec<(usize, PathBuf)>,
}

impl SavedBatch {
    /// Number of files written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of the first crop in emission order.
    #[must_use]
    pub fn first(&self) -> Option<&Path> {
        self.files.first().map(|(_, path)| path.as_path())
    }

    /// All paths in emission order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(_, path)| path.as_path())
    }
}

/// Persist crops as `result_{index}.<ext>` under `{output_dir}/{request_id}/`.
///
/// The per-request directory keeps concurrent requests from overwriting each other's
/// files while names inside it stay predictable.
///
/// # Errors
///
/// Returns [`ServeError::Persistence`] on the first file that can't be written.
pub fn save_batch<'a, I>(
    crops: I,
    output_dir: &Path,
    request_id: &str,
    format: ImageFormat,
) -> Result<SavedBatch>
where
    I: IntoIterator<Item = (usize, &'a ImageBuffer)>,
{
    let dir = output_dir.join(request_id);
    std::fs::create_dir_all(&dir).map_err(|e| {
        ServeError::Persistence(format!("Failed to create directory {}: {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for (index, crop) in crops {
        let path = dir.join(result_file_name(index, format));
        to_file_as(crop, &path, format)?;
        files.push((index, path));
    }

    Ok(SavedBatch {
        request_id: request_id.to_string(),
        dir,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[allow(clippy::cast_possible_truncation)]
    fn sample(format: ImageFormat) -> ImageBuffer {
        let pixels = Array3::from_shape_fn((12, 17, 3), |(y, x, c)| (y * 17 + x * 3 + c) as u8);
        ImageBuffer::new(pixels, format).unwrap()
    }

    #[test]
    fn test_png_base64_round_trip_is_pixel_exact() {
        let image = sample(ImageFormat::Png);
        let text = to_base64(&image).unwrap();
        let decoded = from_base64(&text, None).unwrap();

        assert_eq!(decoded.format(), ImageFormat::Png);
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_jpeg_base64_round_trip_is_structurally_valid() {
        let image = sample(ImageFormat::Jpeg);
        let decoded = from_base64(&to_base64(&image).unwrap(), None).unwrap();

        assert_eq!(decoded.format(), ImageFormat::Jpeg);
        assert_eq!(decoded.dims(), image.dims());
    }

    #[test]
    fn test_base64_keeps_original_format() {
        let image = sample(ImageFormat::Png);
        let bytes = STANDARD.decode(to_base64(&image).unwrap()).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_data_url_prefix_is_accepted() {
        let image = sample(ImageFormat::Png);
        let text = format!("data:image/png;base64,{}\n", to_base64(&image).unwrap());
        assert_eq!(from_base64(&text, None).unwrap(), image);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            from_base64("not base64!!", None),
            Err(ServeError::Base64(_))
        ));

        let garbage = STANDARD.encode(b"definitely not an image");
        assert!(matches!(
            from_base64(&garbage, Some(ImageFormat::Png)),
            Err(ServeError::Decode(_))
        ));
        assert!(matches!(
            from_base64(&garbage, None),
            Err(ServeError::Decode(_))
        ));
    }

    #[test]
    fn test_to_file_always_writes_jpeg_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_0.jpg");

        let first = sample(ImageFormat::Png);
        to_file(&first, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);

        let second = ImageBuffer::new(Array3::from_elem((5, 9, 3), 255), ImageFormat::Png).unwrap();
        to_file(&second, &path).unwrap();
        let reread = decode(&std::fs::read(&path).unwrap(), None).unwrap();
        assert_eq!(reread.dims(), (5, 9));
    }

    #[test]
    fn test_to_file_reports_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("result_0.jpg");
        assert!(matches!(
            to_file(&sample(ImageFormat::Png), &path),
            Err(ServeError::Persistence(_))
        ));
    }

    #[test]
    fn test_save_batch_names_and_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let a = sample(ImageFormat::Png);
        let b = sample(ImageFormat::Png);

        let batch =
            save_batch([(0, &a), (2, &b)], dir.path(), "req-1", PERSIST_FORMAT).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.first(), Some(dir.path().join("req-1").join("result_0.jpg").as_path()));
        assert!(dir.path().join("req-1").join("result_2.jpg").exists());

        let other = save_batch([(0, &a)], dir.path(), "req-2", PERSIST_FORMAT).unwrap();
        assert_ne!(other.first(), batch.first());

        let empty = save_batch(std::iter::empty(), dir.path(), "req-3", PERSIST_FORMAT).unwrap();
        assert!(empty.is_empty());
        assert!(empty.first().is_none());
    }

    #[test]
    fn test_format_policy() {
        assert_eq!("original".parse::<FormatPolicy>().unwrap(), FormatPolicy::Original);
        assert_eq!(
            "PNG".parse::<FormatPolicy>().unwrap(),
            FormatPolicy::Fixed(ImageFormat::Png)
        );
        assert_eq!(
            "jpg".parse::<FormatPolicy>().unwrap(),
            FormatPolicy::Fixed(ImageFormat::Jpeg)
        );
        assert!("nope".parse::<FormatPolicy>().is_err());

        let image = sample(ImageFormat::Png);
        assert_eq!(FormatPolicy::Original.resolve(&image), ImageFormat::Png);
        assert_eq!(
            FormatPolicy::Fixed(ImageFormat::Jpeg).resolve(&image),
            ImageFormat::Jpeg
        );
        assert_eq!(FormatPolicy::Fixed(ImageFormat::Jpeg).to_string(), "jpg");
    }
}
