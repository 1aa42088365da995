// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use image::ImageFormat;
use tracing::{debug, error, info, warn};

use super::AppState;
use super::dto::{
    Base64Request, Base64Response, ChangeModelRequest, ErrorResponse, HealthResponse, InfoResponse,
};
use crate::codec;
use crate::error::{Result, ServeError};
use crate::image_buffer::ImageBuffer;
use crate::pipeline::{OVERLAY_FORMAT, RequestPipeline};

/// Body of `/extract` when the image has no instances.
pub const NO_OBJECTS: &str = "No objects detected";

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Root endpoint
///
/// Returns a welcome message.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Welcome message", body = String)
    )
)]
pub async fn root() -> &'static str {
    "Segment Serve - POST an image to /visualize, /extract or /base64. Swagger UI at /swagger-ui/"
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Active model information
///
/// Returns the registered name, swap generation and class-name table of the model
/// currently serving requests.
#[utoipa::path(
    get,
    path = "/info",
    tag = "model",
    responses(
        (status = 200, description = "Model information", body = InfoResponse)
    )
)]
pub async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let snapshot = state.pipeline.registry().current();
    Json(InfoResponse {
        model_name: snapshot.name().to_string(),
        generation: snapshot.generation(),
        num_classes: snapshot.model().num_classes(),
        class_names: snapshot.class_names().as_slice().to_vec(),
    })
}

/// Draw detections over an uploaded image
///
/// Upload an image file; the response is a JPEG with every instance's mask tinted and
/// its box outlined.
#[utoipa::path(
    post,
    path = "/visualize",
    tag = "segmentation",
    request_body(content_type = "multipart/form-data", description = "Image file to analyze"),
    responses(
        (status = 200, description = "Annotated image", body = Vec<u8>, content_type = "image/jpeg"),
        (status = 400, description = "Missing or undecodable image", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn visualize(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response> {
    let image = read_upload(multipart).await?;
    let overlay = run_blocking(&state, move |pipeline| pipeline.visualize(&image)).await?;
    Ok(image_response(overlay, OVERLAY_FORMAT))
}

/// Extract instances from an uploaded image
///
/// Every instance is cropped to its box and white-filled outside its mask. The crops are
/// written to a fresh directory under the output root, which is removed again once the
/// first crop is read back. The response is that crop, or a plain-text notice when
/// nothing was detected.
#[utoipa::path(
    post,
    path = "/extract",
    tag = "segmentation",
    request_body(content_type = "multipart/form-data", description = "Image file to analyze"),
    responses(
        (status = 200, description = "First extracted instance, or \"No objects detected\"", body = Vec<u8>, content_type = "image/jpeg"),
        (status = 400, description = "Missing or undecodable image", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn extract(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response> {
    let image = read_upload(multipart).await?;
    let format = state.pipeline.settings().persist_format;

    let first = run_blocking(&state, move |pipeline| pipeline.first_crop(&image)).await?;

    Ok(match first {
        Some(bytes) => image_response(bytes, format),
        None => NO_OBJECTS.into_response(),
    })
}

/// Extract instances from a base64 image
///
/// Returns every instance crop as base64 text, in the model's emission order, along with
/// the detection behind each one.
#[utoipa::path(
    post,
    path = "/base64",
    tag = "segmentation",
    request_body = Base64Request,
    responses(
        (status = 200, description = "Cropped instances", body = Base64Response),
        (status = 400, description = "Invalid base64 or image", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn base64(
    State(state): State<Arc<AppState>>,
    Json(request): Json<Base64Request>,
) -> Result<Json<Base64Response>> {
    let encoded = run_blocking(&state, move |pipeline| {
        let image = codec::from_base64(&request.base64_image, None)?;
        pipeline.crops_base64(&image)
    })
    .await?;
    debug!("Returning {} base64 crops", encoded.crops.len());
    Ok(Json(encoded.into()))
}

/// Swap the active model
///
/// Loads the model from a local path or URL and makes it current together with the
/// given class names. On any failure the previous model keeps serving.
#[utoipa::path(
    post,
    path = "/changemodel",
    tag = "model",
    request_body = ChangeModelRequest,
    responses(
        (status = 200, description = "Model swapped", body = String),
        (status = 400, description = "Class names don't fit the model", body = ErrorResponse),
        (status = 500, description = "Model couldn't be loaded", body = ErrorResponse)
    )
)]
pub async fn change_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChangeModelRequest>,
) -> Result<String> {
    info!("Changing model to '{}' from {}", request.model_name, request.model_url);
    let snapshot = run_blocking(&state, move |pipeline| {
        pipeline.change_model(&request.model_name, &request.model_url, request.class_names)
    })
    .await?;
    Ok(format!("Successfully updated model to {}", snapshot.name()))
}

/// Run pipeline work on the blocking pool.
async fn run_blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&RequestPipeline) -> Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.pipeline))
        .await
        .map_err(|e| ServeError::Inference(format!("Worker task failed: {e}")))?
}

/// Decode the first file field of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<ImageBuffer> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ServeError::Decode(format!("Failed to read upload: {e}")))?;
        let Some(field) = field else {
            return Err(ServeError::Decode("No image file in upload".to_string()));
        };

        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ServeError::Decode(format!("Failed to read field: {e}")))?;
        debug!("Received '{file_name}' ({} bytes)", data.len());

        let declared = ImageFormat::from_path(&file_name).ok();
        return tokio::task::spawn_blocking(move || codec::decode(&data, declared))
            .await
            .map_err(|e| ServeError::Decode(format!("Worker task failed: {e}")))?;
    }
}

fn image_response(bytes: Vec<u8>, format: ImageFormat) -> Response {
    ([(header::CONTENT_TYPE, format.to_mime_type())], bytes).into_response()
}
