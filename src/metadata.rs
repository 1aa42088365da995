// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Metadata embedded in exported segmentation models.
//!
//! Exporters store each field as a separate custom property whose value is a YAML
//! scalar, list or mapping. Only the handful of fields the segmenter needs are read.

use std::collections::HashMap;

use crate::error::{Result, ServeError};

/// Task string a segmentation model must carry.
pub const SEGMENT_TASK: &str = "segment";

/// Custom property keys read from the model.
pub const METADATA_KEYS: [&str; 5] = ["description", "task", "stride", "imgsz", "names"];

/// Fields read from a model's custom metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    /// Free-form description written by the exporter.
    pub description: String,
    /// Task name, `None` if the model doesn't declare one.
    pub task: Option<String>,
    /// Network stride.
    pub stride: u32,
    /// Input size `(height, width)`.
    pub imgsz: (usize, usize),
    /// Zero-based foreground class names.
    pub names: HashMap<usize, String>,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            task: None,
            stride: 32,
            imgsz: (640, 640),
            names: HashMap::new(),
        }
    }
}

impl ModelMetadata {
    /// Build metadata from `key -> value` custom properties.
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ModelLoad`] if a present value can't be parsed.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut metadata = Self::default();

        if let Some(value) = properties.get("description") {
            metadata.description = unquote(value).to_string();
        }
        if let Some(value) = properties.get("task") {
            metadata.task = Some(unquote(value).to_string());
        }
        if let Some(value) = properties.get("stride") {
            metadata.stride = unquote(value).parse().map_err(|_| {
                ServeError::ModelLoad(format!("Invalid stride in model metadata: {value}"))
            })?;
        }
        if let Some(value) = properties.get("imgsz") {
            metadata.imgsz = parse_imgsz(value)?;
        }
        if let Some(value) = properties.get("names") {
            metadata.names = parse_names(value);
        }

        Ok(metadata)
    }

    /// Whether the model declares itself a segmentation model.
    ///
    /// Models without a task entry are given the benefit of the doubt.
    #[must_use]
    pub fn is_segmentation(&self) -> bool {
        self.task.as_deref().is_none_or(|task| task == SEGMENT_TASK)
    }

    /// Number of foreground classes named in the metadata.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.names.len()
    }
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('\'').trim_matches('"')
}

/// Parse `[640, 640]`, a block list of `- 640` lines, or a single number.
fn parse_imgsz(value: &str) -> Result<(usize, usize)> {
    let sizes: Vec<usize> = value
        .split(|c: char| c == ',' || c == '\n' || c == '[' || c == ']' || c == '-')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| ServeError::ModelLoad(format!("Invalid imgsz in model metadata: {value}")))?;

    match sizes.as_slice() {
        [size] => Ok((*size, *size)),
        [h, w, ..] => Ok((*h, *w)),
        [] => Err(ServeError::ModelLoad(
            "Empty imgsz in model metadata".to_string(),
        )),
    }
}

/// Parse `{0: 'person', 1: 'bicycle'}` or a block of `0: person` lines.
///
/// Entries that don't start with an integer id are skipped.
fn parse_names(value: &str) -> HashMap<usize, String> {
    let body = value.trim();
    let body = body
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body);

    body.split([',', '\n'])
        .filter_map(|entry| {
            let (id, name) = entry.split_once(':')?;
            let id = id.trim().parse().ok()?;
            Some((id, unquote(name).to_string()))
        })
        .collect()
}
