use crate::config::{Device, PipelineClass, Task};
use crate::error::Result;
use crate::image::{GeneratedImage, InputImage};
use crate::scheduler::SchedulerConfig;
use async_trait::async_trait;
use rand::rngs::StdRng;

/// Loads pretrained pipelines from an external inference library.
///
/// Every call is a fresh load; nothing here caches weights.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    /// Loads `model_id` as the given pipeline class.
    async fn load(&self, model_id: &str, class: PipelineClass) -> Result<Box<dyn Pipeline>>;
}

/// A loaded pipeline, ready for inference.
#[async_trait]
pub trait Pipeline: Send {
    fn class(&self) -> PipelineClass;

    /// The scheduler the pipeline will denoise with.
    fn scheduler(&self) -> &SchedulerConfig;

    /// Replaces the pipeline's scheduler.
    fn set_scheduler(&mut self, scheduler: SchedulerConfig);

    /// Moves the pipeline to `device`.
    fn to_device(&mut self, device: Device) -> Result<()>;

    /// Runs one invocation. All randomness must come from `rng`.
    ///
    /// Returns images in generation order; may return fewer than
    /// `request.num_images_per_prompt` when the library filters some out.
    async fn run(&mut self, request: &PipelineRequest, rng: &mut StdRng)
        -> Result<Vec<GeneratedImage>>;
}

/// Inputs that differ per task.
#[derive(Debug, Clone)]
pub enum TaskInput {
    Text { width: u32, height: u32 },
    Image { init_image: InputImage, strength: f64 },
    Inpaint { init_image: InputImage, mask_image: InputImage },
}

impl TaskInput {
    pub fn task(&self) -> Task {
        match self {
            TaskInput::Text { .. } => Task::TextToImage,
            TaskInput::Image { .. } => Task::ImageToImage,
            TaskInput::Inpaint { .. } => Task::Inpaint,
        }
    }
}

/// Everything a pipeline invocation receives.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub num_images_per_prompt: u32,
    pub input: TaskInput,
}
