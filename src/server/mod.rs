// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! HTTP surface of the service.
//!
//! Routes:
//!
//! - `GET /`, `GET /health`, `GET /info`
//! - `POST /visualize` and `POST /extract`: multipart image upload
//! - `POST /base64`: `{"base64Image": ...}`
//! - `POST /changemodel`: `{"modelName", "modelUrl", "classNames"}`
//!
//! Swagger UI is served at `/swagger-ui/`.

pub mod dto;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::annotate::load_font;
use crate::config::ServiceConfig;
use crate::download::ensure_model;
use crate::error::{Result, ServeError};
use crate::model::{OnnxLoader, OnnxSegmenter};
use crate::pipeline::{PipelineSettings, RequestPipeline};
use crate::registry::{ModelRegistry, resolve_class_names};
use dto::{
    Base64Request, Base64Response, ChangeModelRequest, DetectionSummary, ErrorResponse,
    FailedInstanceResponse, HealthResponse, InfoResponse,
};

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Request pipeline over the model registry.
    pub pipeline: RequestPipeline,
}

impl AppState {
    /// Wrap a pipeline for sharing across handlers.
    #[must_use]
    pub fn new(pipeline: RequestPipeline) -> Arc<Self> {
        Arc::new(Self { pipeline })
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Segment Serve",
        description = "Instance segmentation service: visualize detections, extract masked instance crops, and swap the active model at runtime.",
        license(name = "AGPL-3.0", url = "https://ultralytics.com/license")
    ),
    paths(
        handlers::root,
        handlers::health,
        handlers::info,
        handlers::visualize,
        handlers::extract,
        handlers::base64,
        handlers::change_model
    ),
    components(schemas(
        Base64Request,
        Base64Response,
        ChangeModelRequest,
        DetectionSummary,
        ErrorResponse,
        FailedInstanceResponse,
        HealthResponse,
        InfoResponse
    )),
    tags(
        (name = "segmentation", description = "Instance extraction endpoints"),
        (name = "model", description = "Active model management"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Load the startup model and assemble the shared state.
///
/// # Errors
///
/// Returns an error if the startup model, its class names or the label font can't be
/// loaded. Unlike a runtime swap, a bad startup model stops the service.
pub fn bootstrap(config: &ServiceConfig) -> Result<Arc<AppState>> {
    let model_path = ensure_model(&config.model_path)?;
    let model = OnnxSegmenter::load_with_config(&model_path, config.inference.clone())?;
    let class_names = resolve_class_names(config.class_names_file.as_deref(), &model)?;

    let registry = ModelRegistry::new(&config.model_name(), Arc::new(model), class_names)?;
    let loader = OnnxLoader::new(&config.model_cache_dir, config.inference.clone());
    let font = config.font_path.as_deref().map(load_font).transpose()?;

    let pipeline = RequestPipeline::new(
        Arc::new(registry),
        Arc::new(loader),
        PipelineSettings::from(config),
    )
    .with_font(font);
    Ok(AppState::new(pipeline))
}

/// Bootstrap the service and serve it on the configured address.
///
/// # Errors
///
/// Returns an error if startup fails or the address can't be bound.
pub async fn run(config: ServiceConfig) -> Result<()> {
    let addr = config.addr()?;
    let boot = config.clone();
    let state = tokio::task::spawn_blocking(move || bootstrap(&boot))
        .await
        .map_err(|e| ServeError::ModelLoad(format!("Startup task failed: {e}")))??;

    let snapshot = state.pipeline.registry().current();
    info!(
        "Serving model '{}' with {} class names",
        snapshot.name(),
        snapshot.class_names().len()
    );

    let listener = TcpListener::bind(addr).await?;
    serve(listener, build_router(state, config.body_limit)).await
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/visualize", post(handlers::visualize))
        .route("/extract", post(handlers::extract))
        .route("/base64", post(handlers::base64))
        .route("/changemodel", post(handlers::change_model))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve `router` on `listener` until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Server listening on {addr}");
    info!("Swagger UI available at http://{addr}/swagger-ui/");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
