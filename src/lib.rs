pub mod api;
pub mod app_state;
pub mod compose;
pub mod config;
pub mod scratch;
pub mod upload;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::post;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

//
// Re-export
//
pub use api::{ApiError, ErrorResponse, RequestId, create_video, log_request_errors};
pub use app_state::AppState;
pub use compose::{
    CancelFlag, ComposeError, ComposeJob, Composer, Composition, FfmpegComposer, MediaKind,
    Placement, VideoSpec,
};
pub use config::Config;
pub use scratch::{OUTPUT_FILE, ScratchDir};
pub use upload::{UploadPair, UploadedFile, secure_filename};

/// Builds the service router around `state`.
pub fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/create-video", post(create_video))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serves the API with the FFmpeg backed composer until the listener fails.
///
/// `ffmpeg_next::init` must have been called first.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if !FfmpegComposer::encoders_available() {
        warn!("FFmpeg build lacks an H.264 or AAC encoder, compositions will fail");
    }
    run_with_composer(config, Arc::new(FfmpegComposer::new())).await
}

pub async fn run_with_composer(config: Config, composer: Arc<dyn Composer>) -> anyhow::Result<()> {
    let state = AppState::new(&config, composer)
        .await
        .context("Failed to create app state")?;
    let app = router(state, config.body_limit());

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app).await.context("API server error")
}
