pub mod handlers;
pub mod types;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use stablegen::{ConfigManager, GenerationFacade};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use handlers::SharedState;

/// Public route generated images are served from.
pub const GENERATED_ROUTE: &str = "/static/generated";
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared server state.
///
/// The config manager is locked only to read the persisted base or to apply
/// `PUT /config`; generation runs on per-request snapshots.
pub struct AppState {
    pub facade: GenerationFacade,
    pub config: Mutex<ConfigManager>,
    pub output_dir: PathBuf,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(
        facade: GenerationFacade,
        config: ConfigManager,
        output_dir: impl Into<PathBuf>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            facade,
            config: Mutex::new(config),
            output_dir: output_dir.into(),
            upload_dir: upload_dir.into(),
        }
    }

    /// `/static/generated/<file name>` for a file written under the output directory.
    pub fn public_url(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        Some(format!("{}/{}", GENERATED_ROUTE, name))
    }
}

pub fn router(state: SharedState) -> Router {
    let generated = ServeDir::new(&state.output_dir);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/models", get(handlers::list_models))
        .route("/config", get(handlers::get_config).put(handlers::update_config))
        .route("/generate", post(handlers::text_to_image))
        .route("/img2img", post(handlers::image_to_image))
        .route("/inpaint", post(handlers::inpaint))
        .nest_service(GENERATED_ROUTE, generated)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
