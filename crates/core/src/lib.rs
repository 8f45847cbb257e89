pub mod config;
pub mod config_manager;
pub mod error;
pub mod facade;
pub mod image;
pub mod output;
pub mod presets;
pub mod prompts;
pub mod scheduler;
pub mod selector;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{
    BackendType, ConfigOverrides, Device, ModelConfig, PipelineClass, PipelineFamily, Task,
    DEFAULT_SCHEDULER,
};
pub use config_manager::ConfigManager;
pub use error::{GenerationError, Result};
pub use facade::{GenerationFacade, GenerationOutput, ImageCountMismatch};
pub use crate::image::{GeneratedImage, InputImage};
pub use presets::{available_models, preset, preset_names, resolve_preset, ResolvedPreset, DEFAULT_PRESET};
pub use prompts::{default_prompt, ImageType};
pub use scheduler::{SchedulerConfig, SchedulerKind, SchedulerType};
pub use selector::{PipelineHandle, PipelineSelector, SchedulerOutcome};
pub use traits::{Pipeline, PipelineLoader, PipelineRequest, TaskInput};
