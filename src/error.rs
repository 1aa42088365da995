// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Error types for the segmentation service.
//!
//! Every error is scoped to a single request or a single model swap; none of them
//! are fatal to the process.

use std::fmt;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServeError>;

/// Main error type for the service.
#[derive(Debug)]
pub enum ServeError {
    /// Input bytes could not be decoded as an image.
    Decode(String),
    /// Transport text is not valid base64.
    Base64(String),
    /// A single instance could not be extracted.
    Extraction {
        /// Index of the instance in the model's emission order.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// Error constructing a model from its source.
    ModelLoad(String),
    /// Class-name table does not fit the model.
    ClassNames(String),
    /// Error during model inference.
    Inference(String),
    /// Error writing results to local storage.
    Persistence(String),
    /// Error encoding an image into a container format.
    Encode(String),
    /// Invalid configuration provided.
    Config(String),
    /// Wrapped `std::io::Error`.
    Io(std::io::Error),
}

impl ServeError {
    /// Whether the caller sent something unusable, as opposed to a server-side failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Base64(_) | Self::ClassNames(_) | Self::Config(_)
        )
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "Decode error: {msg}"),
            Self::Base64(msg) => write!(f, "Base64 error: {msg}"),
            Self::Extraction { index, reason } => {
                write!(f, "Extraction error for instance {index}: {reason}")
            }
            Self::ModelLoad(msg) => write!(f, "Model load error: {msg}"),
            Self::ClassNames(msg) => write!(f, "Class names error: {msg}"),
            Self::Inference(msg) => write!(f, "Inference error: {msg}"),
            Self::Persistence(msg) => write!(f, "Persistence error: {msg}"),
            Self::Encode(msg) => write!(f, "Encode error: {msg}"),
            Self::Config(msg) => write!(f, "Config error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ServeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<base64::DecodeError> for ServeError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServeError::ModelLoad("test".to_string());
        assert_eq!(err.to_string(), "Model load error: test");

        let err = ServeError::Extraction {
            index: 3,
            reason: "box out of bounds".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Extraction error for instance 3: box out of bounds"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ServeError::Decode("bad".into()).is_client_error());
        assert!(ServeError::ClassNames("short".into()).is_client_error());
        assert!(!ServeError::Inference("boom".into()).is_client_error());
        assert!(!ServeError::Persistence("disk full".into()).is_client_error());
    }
}
