use once_cell::sync::Lazy;
use tracing::warn;

use crate::config::ModelConfig;

/// Preset used when a caller names none, or names one we don't know.
pub const DEFAULT_PRESET: &str = "sd-v1-5";

fn entry(name: &'static str, model_id: &str, size: u32) -> (&'static str, ModelConfig) {
    let config = ModelConfig::new(model_id)
        .with_steps(50)
        .with_guidance_scale(7.5)
        .with_size(size, size);
    (name, config)
}

static PRESETS: Lazy<Vec<(&'static str, ModelConfig)>> = Lazy::new(|| {
    vec![
        entry("sd-v1-5", "runwayml/stable-diffusion-v1-5", 512),
        entry("sd-v2-1", "stabilityai/stable-diffusion-2-1", 512),
        entry("sdxl", "stabilityai/stable-diffusion-xl-base-1.0", 1024),
        entry("sd-v1-4", "CompVis/stable-diffusion-v1-4", 512),
        entry("sd-v2-1-base", "stabilityai/stable-diffusion-2-1-base", 512),
        entry("sdxl-refiner", "stabilityai/stable-diffusion-xl-refiner-1.0", 1024),
    ]
});

pub fn preset(name: &str) -> Option<ModelConfig> {
    PRESETS
        .iter()
        .find(|(preset_name, _)| *preset_name == name)
        .map(|(_, config)| config.clone())
}

pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|(name, _)| *name).collect()
}

/// `(preset name, model id)` pairs in catalog order.
pub fn available_models() -> Vec<(&'static str, String)> {
    PRESETS
        .iter()
        .map(|(name, config)| (*name, config.model_id.clone()))
        .collect()
}

/// A preset lookup that always yields a config.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPreset {
    pub name: &'static str,
    pub config: ModelConfig,
    /// Set when the requested name was missing or unknown and [`DEFAULT_PRESET`] was used.
    pub fell_back: bool,
}

pub fn resolve_preset(name: Option<&str>) -> ResolvedPreset {
    if let Some(requested) = name {
        if let Some((preset_name, config)) = PRESETS.iter().find(|(n, _)| *n == requested) {
            return ResolvedPreset {
                name: preset_name,
                config: config.clone(),
                fell_back: false,
            };
        }
        warn!(requested = %requested, fallback = DEFAULT_PRESET, "Unknown model preset, using default");
    }

    let (preset_name, config) = PRESETS
        .iter()
        .find(|(n, _)| *n == DEFAULT_PRESET)
        .cloned()
        .unwrap_or_else(|| (DEFAULT_PRESET, ModelConfig::default()));
    ResolvedPreset {
        name: preset_name,
        config,
        fell_back: name.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_six_presets_in_order() {
        assert_eq!(
            preset_names(),
            ["sd-v1-5", "sd-v2-1", "sdxl", "sd-v1-4", "sd-v2-1-base", "sdxl-refiner"]
        );
    }

    #[test]
    fn xl_presets_are_1024() {
        let sdxl = preset("sdxl").unwrap();
        assert_eq!((sdxl.width, sdxl.height), (1024, 1024));
        assert_eq!(sdxl.model_id, "stabilityai/stable-diffusion-xl-base-1.0");
        let refiner = preset("sdxl-refiner").unwrap();
        assert_eq!((refiner.width, refiner.height), (1024, 1024));
        let base = preset("sd-v2-1-base").unwrap();
        assert_eq!((base.width, base.height), (512, 512));
        assert_eq!(base.num_inference_steps, 50);
    }

    #[test]
    fn unknown_preset_falls_back_with_signal() {
        let resolved = resolve_preset(Some("sd-v9"));
        assert!(resolved.fell_back);
        assert_eq!(resolved.name, DEFAULT_PRESET);
        assert_eq!(resolved.config, preset(DEFAULT_PRESET).unwrap());

        let absent = resolve_preset(None);
        assert!(!absent.fell_back);
        assert_eq!(absent.name, DEFAULT_PRESET);

        let known = resolve_preset(Some("sdxl"));
        assert!(!known.fell_back);
        assert_eq!(known.name, "sdxl");
    }

    #[test]
    fn available_models_pairs_names_with_ids() {
        let models = available_models();
        assert_eq!(models.len(), 6);
        assert_eq!(models[3], ("sd-v1-4", "CompVis/stable-diffusion-v1-4".to_string()));
    }
}
