//! The core domain re-exported, plus constructors for the feature-gated backends.

pub use stablegen_core::*;

#[cfg(feature = "diffusion-rs")]
pub use stablegen_diffusion_rs;

// --- Top-level helper functions ---

use std::sync::Arc;

/// Convenience function to create a pipeline loader for a backend.
/// Requires the corresponding feature flag to be enabled.
pub fn create_pipeline_loader(backend_type: BackendType) -> Result<Arc<dyn PipelineLoader>> {
    tracing::debug!(backend = %backend_type, "Creating pipeline loader");
    match backend_type {
        #[cfg(feature = "diffusion-rs")]
        BackendType::DiffusionRs => {
            let loader = stablegen_diffusion_rs::DiffusionRsLoader::new()?;
            Ok(Arc::new(loader))
        }
        #[allow(unreachable_patterns)]
        _ => Err(GenerationError::BackendUnavailable(backend_type)),
    }
}

/// Quick helper for text-to-image using a specified backend.
/// Loads the preset (or the default one), applies `overrides`, and generates.
pub async fn generate_images(
    backend_type: BackendType,
    preset_name: Option<&str>,
    prompt: &str,
    overrides: &ConfigOverrides,
) -> Result<GenerationOutput> {
    let loader = create_pipeline_loader(backend_type)?;
    let facade = GenerationFacade::from_loader(loader);
    let config = resolve_preset(preset_name).config.with_overrides(overrides);
    facade.text_to_image(&config, prompt).await
}
