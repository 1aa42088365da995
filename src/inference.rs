// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Detection thresholds and runtime options for the ONNX segmenter.

/// Configuration for segmentation inference.
///
/// # Example
///
/// ```rust
/// use segment_serve::InferenceConfig;
///
/// let config = InferenceConfig::new()
///     .with_confidence(0.5)
///     .with_mask_threshold(0.6)
///     .with_imgsz(640, 640);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Candidates scoring below this are discarded before NMS.
    pub confidence_threshold: f32,
    /// `IoU` above which a same-class box is suppressed.
    pub iou_threshold: f32,
    /// Maximum number of instances kept per image.
    pub max_detections: usize,
    /// Probability above which a mask pixel belongs to the instance.
    pub mask_threshold: f32,
    /// Input size `(height, width)`; `None` uses the size recorded in the model.
    pub imgsz: Option<(usize, usize)>,
    /// ONNX Runtime intra-op threads, `0` lets the runtime decide.
    pub num_threads: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
            mask_threshold: 0.5,
            imgsz: None,
            num_threads: 0,
        }
    }
}

impl InferenceConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the confidence threshold.
    #[must_use]
    pub const fn with_confidence(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the NMS `IoU` threshold.
    #[must_use]
    pub const fn with_iou(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Set the maximum number of instances per image.
    #[must_use]
    pub const fn with_max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    /// Set the mask binarization threshold.
    #[must_use]
    pub const fn with_mask_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold;
        self
    }

    /// Override the model input size.
    #[must_use]
    pub const fn with_imgsz(mut self, height: usize, width: usize) -> Self {
        self.imgsz = Some((height, width));
        self
    }

    /// Set the number of intra-op threads.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = InferenceConfig::default();
        assert!((config.confidence_threshold - 0.25).abs() < f32::EPSILON);
        assert!((config.iou_threshold - 0.45).abs() < f32::EPSILON);
        assert!((config.mask_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.max_detections, 300);
        assert_eq!(config.imgsz, None);
    }

    #[test]
    fn test_config_builder() {
        let config = InferenceConfig::new()
            .with_confidence(0.6)
            .with_iou(0.3)
            .with_max_detections(10)
            .with_mask_threshold(0.7)
            .with_imgsz(320, 480)
            .with_threads(2);
        assert!((config.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!((config.iou_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.max_detections, 10);
        assert!((config.mask_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.imgsz, Some((320, 480)));
        assert_eq!(config.num_threads, 2);
    }
}
