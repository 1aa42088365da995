// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Class-name tables.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, ServeError};

/// Name of the reserved class at index 0.
pub const BACKGROUND: &str = "BG";

/// COCO class names with the background entry first, used when a model carries no
/// names of its own.
pub const COCO_CLASS_NAMES: [&str; 81] = [
    "BG", "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird",
    "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
    "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard",
    "sports ball", "kite", "baseball bat", "baseball glove", "skateboard", "surfboard",
    "tennis racket", "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl",
    "banana", "apple", "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza",
    "donut", "cake", "chair", "couch", "potted plant", "bed", "dining table", "toilet",
    "tv", "laptop", "mouse", "remote", "keyboard", "cell phone", "microwave", "oven",
    "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors", "teddy bear",
    "hair drier", "toothbrush",
];

/// Ordered class-name table. Index 0 is the background entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    /// Build a table from an ordered list of names.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ClassNames`] if the list is empty.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(ServeError::ClassNames(
                "class-name table must contain at least the background entry".to_string(),
            ));
        }
        Ok(Self(names))
    }

    /// The built-in COCO table.
    #[must_use]
    pub fn coco() -> Self {
        Self(COCO_CLASS_NAMES.iter().map(|s| (*s).to_string()).collect())
    }

    /// Build a table from a zero-based `id -> name` map that has no background entry,
    /// shifting every id up by one.
    ///
    /// Gaps in the id range are filled with the stringified id.
    #[must_use]
    pub fn from_foreground(names: &HashMap<usize, String>) -> Self {
        let count = names.keys().max().map_or(0, |max| max + 1);
        let mut table = Vec::with_capacity(count + 1);
        table.push(BACKGROUND.to_string());
        for id in 0..count {
            table.push(names.get(&id).cloned().unwrap_or_else(|| id.to_string()));
        }
        Self(table)
    }

    /// Read one name per line, skipping blank lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or holds no names.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServeError::Config(format!("Failed to read class names {}: {e}", path.display()))
        })?;
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect(),
        )
    }

    /// Number of entries, background included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed table; provided for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name for a class id, if it's in range.
    #[must_use]
    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.0.get(class_id).map(String::as_str)
    }

    /// Name for a class id, falling back to the stringified id.
    #[must_use]
    pub fn label(&self, class_id: usize) -> String {
        self.get(class_id)
            .map_or_else(|| class_id.to_string(), ToString::to_string)
    }

    /// All names in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}
