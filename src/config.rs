// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Service configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::codec::{FormatPolicy, PERSIST_FORMAT};
use crate::download::DEFAULT_SEGMENT_MODEL;
use crate::error::{Result, ServeError};
use crate::inference::InferenceConfig;

/// Default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default request body limit (16 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Everything the service needs to start.
///
/// # Example
///
/// ```rust
/// use segment_serve::ServiceConfig;
///
/// let config = ServiceConfig::new()
///     .with_port(8080)
///     .with_model_path("models/balloon-seg.onnx")
///     .with_apply_mask(false);
/// assert_eq!(config.model_name(), "balloon-seg");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Model loaded at startup.
    pub model_path: PathBuf,
    /// Newline-separated class names for the startup model, background first.
    pub class_names_file: Option<PathBuf>,
    /// Where models fetched by URL are stored.
    pub model_cache_dir: PathBuf,
    /// Root of the per-request crop directories.
    pub output_dir: PathBuf,
    /// Whether crops are white-filled outside their mask.
    pub apply_mask: bool,
    /// Container format for crops written to disk.
    pub persist_format: ImageFormat,
    /// Container format for base64 crops.
    pub transport_format: FormatPolicy,
    /// Font used for overlay labels; labels are skipped without one.
    pub font_path: Option<PathBuf>,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
    /// Detection thresholds.
    pub inference: InferenceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_path: PathBuf::from(DEFAULT_SEGMENT_MODEL),
            class_names_file: None,
            model_cache_dir: PathBuf::from("models"),
            output_dir: PathBuf::from("results"),
            apply_mask: true,
            persist_format: PERSIST_FORMAT,
            transport_format: FormatPolicy::Original,
            font_path: None,
            body_limit: DEFAULT_BODY_LIMIT,
            inference: InferenceConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the startup model.
    #[must_use]
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }

    /// Set the class-name file for the startup model.
    #[must_use]
    pub fn with_class_names_file(mut self, path: Option<PathBuf>) -> Self {
        self.class_names_file = path;
        self
    }

    /// Set the model cache directory.
    #[must_use]
    pub fn with_model_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_cache_dir = dir.into();
        self
    }

    /// Set the crop output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Toggle mask application.
    #[must_use]
    pub const fn with_apply_mask(mut self, apply_mask: bool) -> Self {
        self.apply_mask = apply_mask;
        self
    }

    /// Set the on-disk crop format.
    #[must_use]
    pub const fn with_persist_format(mut self, format: ImageFormat) -> Self {
        self.persist_format = format;
        self
    }

    /// Set the base64 crop format policy.
    #[must_use]
    pub const fn with_transport_format(mut self, policy: FormatPolicy) -> Self {
        self.transport_format = policy;
        self
    }

    /// Set the overlay label font.
    #[must_use]
    pub fn with_font_path(mut self, path: Option<PathBuf>) -> Self {
        self.font_path = path;
        self
    }

    /// Set the request body limit.
    #[must_use]
    pub const fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Set the detection thresholds.
    #[must_use]
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    /// Name the startup model is registered under: the model file stem.
    #[must_use]
    pub fn model_name(&self) -> String {
        model_name_from_path(&self.model_path)
    }

    /// Socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Config`] if host and port don't form an address.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServeError::Config(format!("Invalid bind address {}:{}: {e}", self.host, self.port)))
    }
}

fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned())
}
