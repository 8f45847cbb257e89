//! In-memory pipelines for unit tests.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::{Arc, Mutex};

use crate::config::{Device, PipelineClass};
use crate::error::{GenerationError, Result};
use crate::image::GeneratedImage;
use crate::scheduler::SchedulerConfig;
use crate::traits::{Pipeline, PipelineLoader, PipelineRequest, TaskInput};

pub(crate) const BUILTIN_SCHEDULER: &str = "PNDMScheduler";
pub(crate) const MISSING_MODEL: &str = "missing/model";

#[derive(Default)]
struct Log {
    loads: Vec<(String, PipelineClass)>,
    devices: Vec<Device>,
    requests: Vec<PipelineRequest>,
}

/// Loads [`NoisePipeline`]s and records every interaction.
#[derive(Default)]
pub(crate) struct RecordingLoader {
    log: Arc<Mutex<Log>>,
    truncate_to: Option<u32>,
}

impl RecordingLoader {
    /// Pipelines from this loader return at most `count` images.
    pub(crate) fn truncating(count: u32) -> Self {
        Self {
            truncate_to: Some(count),
            ..Default::default()
        }
    }

    pub(crate) fn loads(&self) -> Vec<(String, PipelineClass)> {
        self.log.lock().unwrap().loads.clone()
    }

    pub(crate) fn devices(&self) -> Vec<Device> {
        self.log.lock().unwrap().devices.clone()
    }

    pub(crate) fn requests(&self) -> Vec<PipelineRequest> {
        self.log.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl PipelineLoader for RecordingLoader {
    async fn load(&self, model_id: &str, class: PipelineClass) -> Result<Box<dyn Pipeline>> {
        if model_id == MISSING_MODEL {
            return Err(GenerationError::ModelLoad(format!("no weights for {}", model_id)));
        }
        self.log.lock().unwrap().loads.push((model_id.to_string(), class));
        Ok(Box::new(NoisePipeline {
            class,
            scheduler: SchedulerConfig::builtin(BUILTIN_SCHEDULER)
                .with_param("num_train_timesteps", 1000)
                .with_param("beta_schedule", "scaled_linear"),
            log: self.log.clone(),
            truncate_to: self.truncate_to,
        }))
    }
}

/// Fills every image with bytes drawn from the call's rng.
struct NoisePipeline {
    class: PipelineClass,
    scheduler: SchedulerConfig,
    log: Arc<Mutex<Log>>,
    truncate_to: Option<u32>,
}

#[async_trait]
impl Pipeline for NoisePipeline {
    fn class(&self) -> PipelineClass {
        self.class
    }

    fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    fn set_scheduler(&mut self, scheduler: SchedulerConfig) {
        self.scheduler = scheduler;
    }

    fn to_device(&mut self, device: Device) -> Result<()> {
        self.log.lock().unwrap().devices.push(device);
        Ok(())
    }

    async fn run(
        &mut self,
        request: &PipelineRequest,
        rng: &mut StdRng,
    ) -> Result<Vec<GeneratedImage>> {
        self.log.lock().unwrap().requests.push(request.clone());
        if request.prompt == "explode" {
            return Err(GenerationError::PipelineInvocation("CUDA out of memory".into()));
        }

        let (width, height) = match &request.input {
            TaskInput::Text { width, height } => (*width, *height),
            TaskInput::Image { init_image, .. } | TaskInput::Inpaint { init_image, .. } => {
                (init_image.width(), init_image.height())
            }
        };
        let count = match self.truncate_to {
            Some(limit) => request.num_images_per_prompt.min(limit),
            None => request.num_images_per_prompt,
        };

        (0..count)
            .map(|_| {
                let data = (0..width * height * 3).map(|_| rng.gen::<u8>()).collect();
                GeneratedImage::new(data, width, height)
            })
            .collect()
    }
}
