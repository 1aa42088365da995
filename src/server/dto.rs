// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! JSON bodies exchanged with clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::pipeline::{EncodedCrop, EncodedCrops, FailedInstance};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Server status
    pub status: String,
    /// API version
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Name the active model was registered under
    pub model_name: String,
    /// Swap counter, 0 for the startup model
    pub generation: u64,
    /// Foreground classes the model declares, if any
    pub num_classes: Option<usize>,
    /// Active class-name table, background first
    pub class_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Base64Request {
    /// Base64 text of an encoded image
    pub base64_image: String,
}

/// One detection behind a returned crop.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    /// Instance index in the model's emission order
    pub index: usize,
    /// Class id, 0 is background
    pub class_id: usize,
    /// Class label
    pub class_name: String,
    /// Detection confidence (0.0 - 1.0)
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedInstanceResponse {
    /// Instance index in the model's emission order
    pub index: usize,
    /// Why the instance was skipped
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Base64Response {
    /// Base64 crops, one per extracted instance, in emission order
    pub cropped_image_list: Vec<String>,
    /// Detection behind each entry of `croppedImageList`
    pub detections: Vec<DetectionSummary>,
    /// Instances that couldn't be extracted or encoded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_instances: Vec<FailedInstanceResponse>,
}

impl From<EncodedCrops> for Base64Response {
    fn from(encoded: EncodedCrops) -> Self {
        let (cropped_image_list, detections) = encoded
            .crops
            .into_iter()
            .map(
                |EncodedCrop {
                     index,
                     class_id,
                     class_name,
                     score,
                     data,
                 }| {
                    (
                        data,
                        DetectionSummary {
                            index,
                            class_id,
                            class_name,
                            score,
                        },
                    )
                },
            )
            .unzip();

        Self {
            cropped_image_list,
            detections,
            failed_instances: encoded.failed.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<FailedInstance> for FailedInstanceResponse {
    fn from(failed: FailedInstance) -> Self {
        Self {
            index: failed.index,
            reason: failed.reason,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeModelRequest {
    /// Name to register the model under
    pub model_name: String,
    /// Local path or http(s) URL of the ONNX model
    pub model_url: String,
    /// Class names, background first, one more than the model's class count
    pub class_names: Vec<String>,
}
