// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Model source resolution and downloading.
//!
//! A model source is either a local `.onnx` path or an `http(s)` URL. Remote models are
//! streamed into the model cache under the name they are registered with.

#![allow(clippy::cast_precision_loss)]

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ServeError};

/// Default segmentation model file name.
pub const DEFAULT_SEGMENT_MODEL: &str = "yolo11n-seg.onnx";

/// Download location of the default segmentation model.
pub const DEFAULT_SEGMENT_MODEL_URL: &str =
    "https://github.com/ultralytics/assets/releases/download/v8.3.0/yolo11n-seg.onnx";

/// Connection timeout in seconds.
const CONNECT_TIMEOUT: u64 = 30;

/// Read timeout in seconds.
const READ_TIMEOUT: u64 = 300;

/// Where a model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A file on local disk.
    Local(PathBuf),
    /// An `http://` or `https://` URL.
    Remote(String),
}

impl ModelSource {
    /// Classify a source string.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::Remote(source.to_string())
        } else {
            Self::Local(PathBuf::from(source))
        }
    }

    /// Make the model available on local disk and return its path.
    ///
    /// Remote models are written to `{cache_dir}/{name}.onnx`, replacing any earlier
    /// download under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ModelLoad`] if a local file is missing or a download fails.
    pub fn fetch(&self, name: &str, cache_dir: &Path) -> Result<PathBuf> {
        match self {
            Self::Local(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(ServeError::ModelLoad(format!(
                        "Model file not found: {}",
                        path.display()
                    )))
                }
            }
            Self::Remote(url) => {
                fs::create_dir_all(cache_dir).map_err(|e| {
                    ServeError::ModelLoad(format!(
                        "Failed to create model cache {}: {e}",
                        cache_dir.display()
                    ))
                })?;
                let dest = cache_dir.join(format!("{}.onnx", cache_file_stem(name)?));
                download_file(url, &dest)?;
                Ok(dest)
            }
        }
    }
}

/// Make sure the startup model exists, downloading the default model if that's what
/// was asked for.
///
/// # Errors
///
/// Returns [`ServeError::ModelLoad`] if the file is missing and can't be downloaded.
pub fn ensure_model<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    if path.file_name().and_then(|n| n.to_str()) != Some(DEFAULT_SEGMENT_MODEL) {
        return Err(ServeError::ModelLoad(format!(
            "Model file not found: {}. Auto-download is only supported for {DEFAULT_SEGMENT_MODEL}",
            path.display()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    download_file(DEFAULT_SEGMENT_MODEL_URL, path)?;
    Ok(path.to_path_buf())
}

/// Turn a registered model name into a safe file stem.
fn cache_file_stem(name: &str) -> Result<String> {
    let stem: String = name
        .trim()
        .trim_end_matches(".onnx")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        return Err(ServeError::ModelLoad(format!("Invalid model name: '{name}'")));
    }
    Ok(stem)
}

/// Format bytes as human-readable string (e.g., "10.4MB").
fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.1}GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes / KB)
    } else {
        format!("{bytes:.0}B")
    }
}

/// Stream `url` into `dest` through a per-call `.part` file that is renamed on success.
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let config = ureq::Agent::config_builder()
        .timeout_connect(Some(Duration::from_secs(CONNECT_TIMEOUT)))
        .timeout_recv_body(Some(Duration::from_secs(READ_TIMEOUT)))
        .build();
    let agent = ureq::Agent::new_with_config(config);

    info!("Downloading {url} to '{}'", dest.display());
    let start = Instant::now();

    let response = agent.get(url).call().map_err(|e| {
        let msg = match &e {
            ureq::Error::Timeout(_) => format!("Connection timed out while downloading {url}"),
            ureq::Error::StatusCode(code) => format!("Failed to download {url}: HTTP {code}"),
            ureq::Error::Io(io_err) => format!("Network error downloading {url}: {io_err}"),
            _ => format!("Failed to download {url}: {e}"),
        };
        ServeError::ModelLoad(msg)
    })?;

    let temp_path = part_path(dest);

    let mut reader = response.into_body().into_reader();
    let written = File::create(&temp_path)
        .map_err(|e| {
            ServeError::ModelLoad(format!(
                "Failed to create temp file {}: {e}",
                temp_path.display()
            ))
        })
        .and_then(|file| copy_body(&mut reader, BufWriter::new(file)));

    let downloaded = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };

    fs::rename(&temp_path, dest).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        ServeError::ModelLoad(format!(
            "Failed to move downloaded file to {}: {e}",
            dest.display()
        ))
    })?;

    info!(
        "Downloaded {} in {:.1}s",
        format_bytes(downloaded as f64),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// A temp file next to `dest`, unique to this download.
fn part_path(dest: &Path) -> PathBuf {
    dest.with_extension(format!("{}.part", Uuid::new_v4().simple()))
}

fn copy_body<R: Read, W: Write>(reader: &mut R, mut writer: W) -> Result<u64> {
    let mut buffer = [0u8; 65536];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| ServeError::ModelLoad(format!("Failed to read from network: {e}")))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| ServeError::ModelLoad(format!("Failed to write to temp file: {e}")))?;
        total += n as u64;
    }
    writer
        .flush()
        .map_err(|e| ServeError::ModelLoad(format!("Failed to flush temp file: {e}")))?;
    Ok(total)
}
