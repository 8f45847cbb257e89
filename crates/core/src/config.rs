use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

use crate::error::{GenerationError, Result};

/// Scheduler value meaning "keep whatever the pipeline ships with".
pub const DEFAULT_SCHEDULER: &str = "default";

/// Specifies the type of inference backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[non_exhaustive]
pub enum BackendType {
    #[strum(to_string = "diffusion-rs", serialize = "diffusion_rs")]
    DiffusionRs,
}

/// Where the pipeline executes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Device {
    #[default]
    Cpu,
    #[serde(alias = "gpu")]
    #[strum(to_string = "cuda", serialize = "gpu")]
    Cuda,
}

/// The three generation modes a front-end can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Task {
    TextToImage,
    ImageToImage,
    Inpaint,
}

/// Pipeline family, routed from the model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineFamily {
    Standard,
    Xl,
}

// Checked in order against the lower-cased model id; first hit wins.
const FAMILY_PATTERNS: &[(&str, PipelineFamily)] = &[("xl", PipelineFamily::Xl)];

impl PipelineFamily {
    pub fn from_model_id(model_id: &str) -> Self {
        let lowered = model_id.to_lowercase();
        FAMILY_PATTERNS
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern))
            .map(|(_, family)| *family)
            .unwrap_or(PipelineFamily::Standard)
    }
}

/// A concrete pipeline class: one family crossed with one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineClass {
    pub family: PipelineFamily,
    pub task: Task,
}

impl PipelineClass {
    pub fn new(family: PipelineFamily, task: Task) -> Self {
        Self { family, task }
    }

    pub fn name(&self) -> &'static str {
        match (self.family, self.task) {
            (PipelineFamily::Standard, Task::TextToImage) => "StableDiffusionPipeline",
            (PipelineFamily::Standard, Task::ImageToImage) => "StableDiffusionImg2ImgPipeline",
            (PipelineFamily::Standard, Task::Inpaint) => "StableDiffusionInpaintPipeline",
            (PipelineFamily::Xl, Task::TextToImage) => "StableDiffusionXLPipeline",
            (PipelineFamily::Xl, Task::ImageToImage) => "StableDiffusionXLImg2ImgPipeline",
            (PipelineFamily::Xl, Task::Inpaint) => "StableDiffusionXLInpaintPipeline",
        }
    }
}

impl fmt::Display for PipelineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of one generation request.
///
/// This is also the shape of the persisted config document: one JSON field per
/// attribute. Unknown fields are ignored on read and missing ones take the
/// values from [`ModelConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_id: String,
    pub device: Device,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub width: u32,
    pub height: u32,
    /// `None` draws a fresh seed for every call.
    pub seed: Option<u64>,
    /// `"default"` or a scheduler catalog name. Anything else is kept as-is and
    /// falls back to the pipeline's built-in scheduler at selection time.
    pub scheduler: String,
    pub negative_prompt: String,
    pub num_images: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "runwayml/stable-diffusion-v1-5".to_string(),
            device: Device::Cpu,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            width: 512,
            height: 512,
            seed: None,
            scheduler: DEFAULT_SCHEDULER.to_string(),
            negative_prompt: String::new(),
            num_images: 1,
        }
    }
}

impl ModelConfig {
    /// Names of every recognised attribute, in document order.
    pub const ATTRIBUTE_NAMES: [&'static str; 10] = [
        "model_id",
        "device",
        "num_inference_steps",
        "guidance_scale",
        "width",
        "height",
        "seed",
        "scheduler",
        "negative_prompt",
        "num_images",
    ];

    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn attribute_names() -> &'static [&'static str] {
        &Self::ATTRIBUTE_NAMES
    }

    pub fn is_attribute(name: &str) -> bool {
        Self::ATTRIBUTE_NAMES.contains(&name)
    }

    // Builder methods...
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.num_inference_steps = steps;
        self
    }
    pub fn with_guidance_scale(mut self, scale: f64) -> Self {
        self.guidance_scale = scale;
        self
    }
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }
    pub fn with_negative_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }
    pub fn with_num_images(mut self, count: u32) -> Self {
        self.num_images = count;
        self
    }

    pub fn family(&self) -> PipelineFamily {
        PipelineFamily::from_model_id(&self.model_id)
    }

    /// Returns a new snapshot with every present override applied.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> ModelConfig {
        let mut merged = self.clone();
        if let Some(model_id) = &overrides.model_id {
            merged.model_id = model_id.clone();
        }
        if let Some(device) = overrides.device {
            merged.device = device;
        }
        if let Some(steps) = overrides.num_inference_steps {
            merged.num_inference_steps = steps;
        }
        if let Some(scale) = overrides.guidance_scale {
            merged.guidance_scale = scale;
        }
        if let Some(width) = overrides.width {
            merged.width = width;
        }
        if let Some(height) = overrides.height {
            merged.height = height;
        }
        if let Some(seed) = overrides.seed {
            merged.seed = seed;
        }
        if let Some(scheduler) = &overrides.scheduler {
            merged.scheduler = scheduler.clone();
        }
        if let Some(prompt) = &overrides.negative_prompt {
            merged.negative_prompt = prompt.clone();
        }
        if let Some(count) = overrides.num_images {
            merged.num_images = count;
        }
        merged
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(GenerationError::InvalidConfig(
                "model_id must not be empty".to_string(),
            ));
        }
        if self.num_inference_steps == 0 {
            return Err(GenerationError::InvalidConfig(
                "num_inference_steps must be positive".to_string(),
            ));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(GenerationError::InvalidConfig(format!(
                "guidance_scale must be a positive number, got {}",
                self.guidance_scale
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GenerationError::InvalidConfig(format!(
                "output size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.num_images == 0 {
            return Err(GenerationError::InvalidConfig(
                "num_images must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request-time overrides; `None` leaves the base value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub model_id: Option<String>,
    pub device: Option<Device>,
    pub num_inference_steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `Some(None)` explicitly asks for a random seed.
    pub seed: Option<Option<u64>>,
    pub scheduler: Option<String>,
    pub negative_prompt: Option<String>,
    pub num_images: Option<u32>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.num_inference_steps = Some(steps);
        self
    }
    pub fn with_guidance_scale(mut self, scale: f64) -> Self {
        self.guidance_scale = Some(scale);
        self
    }
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }
    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = Some(seed);
        self
    }
    /// Front-end seed convention: a positive value pins the seed, anything else means random.
    pub fn with_request_seed(self, seed: i64) -> Self {
        let seed = u64::try_from(seed).ok().filter(|s| *s > 0);
        self.with_seed(seed)
    }
    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }
    pub fn with_negative_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(prompt.into());
        self
    }
    pub fn with_num_images(mut self, count: u32) -> Self {
        self.num_images = Some(count);
        self
    }
}
