use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::response::Json;
use bytes::Bytes;
use chrono::Local;
use serde_json::{json, Value};
use stablegen::output::{output_file_name, save_images_indexed};
use stablegen::{available_models, GenerationError, GenerationOutput, InputImage, ModelConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::types::*;
use crate::AppState;

pub type SharedState = Arc<AppState>;

/// Strength used by `/img2img` when the form carries none.
pub const DEFAULT_STRENGTH: f64 = 0.75;

// ============================================================================
// Health Check
// ============================================================================

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ============================================================================
// Model Catalog & Config
// ============================================================================

pub async fn list_models() -> Json<ModelListResponse> {
    let data = available_models()
        .into_iter()
        .map(|(name, model_id)| ModelInfo {
            name: name.to_string(),
            model_id,
        })
        .collect();
    Json(ModelListResponse { data })
}

pub async fn get_config(State(state): State<SharedState>) -> Result<Json<ModelConfig>, ApiError> {
    let config = state.config.lock().await.snapshot()?;
    Ok(Json(config))
}

pub async fn update_config(
    State(state): State<SharedState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ModelConfig>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let Value::Object(overrides) = body else {
        return Err(ApiError::bad_request("config update must be a JSON object"));
    };

    let mut manager = state.config.lock().await;
    let updated = manager.update(&overrides)?;
    info!(model_id = %updated.model_id, "Persisted config updated");
    Ok(Json(updated))
}

// ============================================================================
// Generation
// ============================================================================

pub async fn text_to_image(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let prompt = req.prompt()?;
    let config = request_config(&state, &req).await?;

    let output = state.facade.text_to_image(&config, prompt).await?;
    respond(&state, &config, output)
}

pub async fn image_to_image(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let req = GenerateRequest::from_fields(&form.fields)?;
    let prompt = req.prompt()?;
    let strength = parse_field(&form.fields, "strength")?.unwrap_or(DEFAULT_STRENGTH);

    let init_image = form.image("image")?;
    keep_upload(&state.upload_dir, "input", &init_image);

    let config = request_config(&state, &req).await?;
    let output = state
        .facade
        .image_to_image(&config, init_image, prompt, strength)
        .await?;
    respond(&state, &config, output)
}

pub async fn inpaint(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let req = GenerateRequest::from_fields(&form.fields)?;
    let prompt = req.prompt()?;

    let init_image = form.image("image")?;
    let mut mask_image = form.image("mask")?;
    if (mask_image.width(), mask_image.height()) != (init_image.width(), init_image.height()) {
        mask_image = mask_image.resize(init_image.width(), init_image.height());
    }
    keep_upload(&state.upload_dir, "input", &init_image);
    keep_upload(&state.upload_dir, "mask", &mask_image);

    let config = request_config(&state, &req).await?;
    let output = state
        .facade
        .inpaint(&config, init_image, mask_image, prompt)
        .await?;
    respond(&state, &config, output)
}

/// Persisted base config with the request's fields applied. The base is never mutated.
async fn request_config(state: &AppState, req: &GenerateRequest) -> Result<ModelConfig, ApiError> {
    let base = state.config.lock().await.snapshot()?;
    Ok(base.with_overrides(&req.overrides()))
}

fn respond(
    state: &AppState,
    config: &ModelConfig,
    output: GenerationOutput,
) -> Result<Json<GenerateResponse>, ApiError> {
    let paths = save_images_indexed(&state.output_dir, None, &output.images)?;
    let images = paths.iter().filter_map(|path| state.public_url(path)).collect();

    let warning = output.mismatch().map(|m| {
        warn!(requested = m.requested, produced = m.produced, "Returning a short batch");
        format!(
            "Requested {} images but the pipeline returned {}",
            m.requested, m.produced
        )
    });

    Ok(Json(GenerateResponse {
        success: true,
        images,
        requested: output.requested,
        produced: output.produced(),
        seed: output.seed,
        model_id: config.model_id.clone(),
        pipeline: output.class.name().to_string(),
        scheduler: output.scheduler.to_string(),
        warning,
    }))
}

/// Copies an upload to `<upload_dir>/<prefix>_<timestamp>.png`. Failures are logged, not returned.
fn keep_upload(upload_dir: &Path, prefix: &str, image: &InputImage) -> Option<PathBuf> {
    let path = upload_dir.join(output_file_name(Some(prefix), &Local::now(), None));
    let saved = std::fs::create_dir_all(upload_dir)
        .map_err(GenerationError::from)
        .and_then(|_| image.save(&path));
    match saved {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not keep uploaded image");
            None
        }
    }
}

// ============================================================================
// Multipart
// ============================================================================

/// A multipart form split into text fields and file parts.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Bytes>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.files.insert(name, data);
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn image(&self, name: &str) -> Result<InputImage, ApiError> {
        let data = self
            .files
            .get(name)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("'{}' image is required", name)))?;
        Ok(InputImage::decode(data)?)
    }
}
