use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use stablegen::{resolve_preset, ConfigOverrides, GenerationError};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::error;

// ============================================================================
// Generation requests
// ============================================================================

/// Body of `POST /generate`, and the text fields of the multipart routes.
///
/// Absent fields keep the persisted base config's value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    /// Preset name; unknown names fall back to the default preset.
    pub model: Option<String>,
    pub scheduler: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub num_images: Option<u32>,
    /// Positive pins the seed; zero or negative asks for a random one.
    pub seed: Option<i64>,
}

impl GenerateRequest {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ApiError> {
        Ok(Self {
            prompt: fields.get("prompt").cloned(),
            negative_prompt: fields.get("negative_prompt").cloned(),
            model: non_empty(fields, "model").map(str::to_string),
            scheduler: non_empty(fields, "scheduler").map(str::to_string),
            steps: parse_field(fields, "steps")?,
            guidance: parse_field(fields, "guidance")?,
            width: parse_field(fields, "width")?,
            height: parse_field(fields, "height")?,
            num_images: parse_field(fields, "num_images")?,
            seed: parse_field(fields, "seed")?,
        })
    }

    pub fn prompt(&self) -> Result<&str, ApiError> {
        match self.prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => Ok(prompt),
            _ => Err(ApiError::bad_request("prompt is required")),
        }
    }

    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(model) = &self.model {
            overrides = overrides.with_model_id(resolve_preset(Some(model.as_str())).config.model_id);
        }
        if let Some(scheduler) = &self.scheduler {
            overrides = overrides.with_scheduler(scheduler.clone());
        }
        if let Some(steps) = self.steps {
            overrides = overrides.with_steps(steps);
        }
        if let Some(guidance) = self.guidance {
            overrides = overrides.with_guidance_scale(guidance);
        }
        if let Some(width) = self.width {
            overrides = overrides.with_width(width);
        }
        if let Some(height) = self.height {
            overrides = overrides.with_height(height);
        }
        if let Some(count) = self.num_images {
            overrides = overrides.with_num_images(count);
        }
        if let Some(seed) = self.seed {
            overrides = overrides.with_request_seed(seed);
        }
        if let Some(negative) = &self.negative_prompt {
            overrides = overrides.with_negative_prompt(negative.clone());
        }
        overrides
    }
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Parses an optional text field; blank counts as absent.
pub fn parse_field<T: FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, ApiError> {
    non_empty(fields, name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ApiError::bad_request(format!("invalid value for '{}': {}", name, raw)))
        })
        .transpose()
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    /// Public URLs under the generated-images route.
    pub images: Vec<String>,
    pub requested: u32,
    pub produced: u32,
    pub seed: u64,
    pub model_id: String,
    pub pipeline: String,
    pub scheduler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ============================================================================
// Model catalog
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub model_id: String,
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub data: Vec<ModelInfo>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            status,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            error!(error = %err, "Request failed");
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
