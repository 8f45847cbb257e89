//! Stub pipelines shared by the integration tests.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use stablegen::{
    Device, GeneratedImage, GenerationError, Pipeline, PipelineClass, PipelineLoader,
    PipelineRequest, Result, SchedulerConfig, TaskInput,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Prompt that makes [`StubLoader`] pipelines fail the way an out-of-memory run does.
pub const FAILING_PROMPT: &str = "out of memory please";

/// Loads pipelines that echo the requested image count, or a truncated one.
#[derive(Clone, Default)]
pub struct StubLoader {
    truncate_to: Option<u32>,
    loaded: Arc<Mutex<Vec<(String, PipelineClass)>>>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines from this loader return at most `count` images.
    pub fn truncating(count: u32) -> Self {
        Self {
            truncate_to: Some(count),
            ..Self::default()
        }
    }

    pub fn loaded(&self) -> Vec<(String, PipelineClass)> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn shared(self) -> Arc<dyn PipelineLoader> {
        Arc::new(self)
    }
}

#[async_trait]
impl PipelineLoader for StubLoader {
    async fn load(&self, model_id: &str, class: PipelineClass) -> Result<Box<dyn Pipeline>> {
        self.loaded.lock().unwrap().push((model_id.to_string(), class));
        debug!(model_id, class = %class, "Stub pipeline loaded");
        Ok(Box::new(StubPipeline {
            class,
            scheduler: SchedulerConfig::builtin("StubScheduler"),
            truncate_to: self.truncate_to,
        }))
    }
}

struct StubPipeline {
    class: PipelineClass,
    scheduler: SchedulerConfig,
    truncate_to: Option<u32>,
}

#[async_trait]
impl Pipeline for StubPipeline {
    fn class(&self) -> PipelineClass {
        self.class
    }

    fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    fn set_scheduler(&mut self, scheduler: SchedulerConfig) {
        self.scheduler = scheduler;
    }

    fn to_device(&mut self, _device: Device) -> Result<()> {
        Ok(())
    }

    async fn run(
        &mut self,
        request: &PipelineRequest,
        rng: &mut StdRng,
    ) -> Result<Vec<GeneratedImage>> {
        if request.prompt == FAILING_PROMPT {
            return Err(GenerationError::PipelineInvocation(
                "CUDA out of memory. Tried to allocate 2.00 GiB".into(),
            ));
        }

        let (width, height) = match &request.input {
            TaskInput::Text { width, height } => (*width, *height),
            TaskInput::Image { init_image, .. } | TaskInput::Inpaint { init_image, .. } => {
                (init_image.width(), init_image.height())
            }
        };
        let count = self
            .truncate_to
            .map_or(request.num_images_per_prompt, |limit| {
                request.num_images_per_prompt.min(limit)
            });

        (0..count)
            .map(|_| {
                let data = (0..width * height * 3).map(|_| rng.gen::<u8>()).collect();
                GeneratedImage::new(data, width, height)
            })
            .collect()
    }
}
