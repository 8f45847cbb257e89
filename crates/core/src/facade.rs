use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{ModelConfig, PipelineClass};
use crate::error::{GenerationError, Result};
use crate::image::{GeneratedImage, InputImage};
use crate::selector::{PipelineSelector, SchedulerOutcome};
use crate::traits::{PipelineLoader, PipelineRequest, TaskInput};

/// Fewer images came back than were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCountMismatch {
    pub requested: u32,
    pub produced: u32,
}

impl From<ImageCountMismatch> for GenerationError {
    fn from(mismatch: ImageCountMismatch) -> Self {
        GenerationError::ImageCountMismatch {
            requested: mismatch.requested,
            produced: mismatch.produced,
        }
    }
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Images in generation order. Never padded.
    pub images: Vec<GeneratedImage>,
    pub requested: u32,
    /// The seed the call's generator was built from, drawn fresh when the config had none.
    pub seed: u64,
    pub class: PipelineClass,
    pub scheduler: SchedulerOutcome,
}

impl GenerationOutput {
    pub fn produced(&self) -> u32 {
        self.images.len() as u32
    }

    /// Only a short batch counts; extra images are kept as they are.
    pub fn mismatch(&self) -> Option<ImageCountMismatch> {
        let produced = self.produced();
        (produced < self.requested).then_some(ImageCountMismatch {
            requested: self.requested,
            produced,
        })
    }

    /// The images, or [`GenerationError::ImageCountMismatch`] if any are missing.
    pub fn into_complete(self) -> Result<Vec<GeneratedImage>> {
        match self.mismatch() {
            Some(mismatch) => Err(mismatch.into()),
            None => Ok(self.images),
        }
    }
}

/// Text-to-image, image-to-image and inpainting over a [`PipelineSelector`].
///
/// Each call takes its config by reference and builds its own seeded
/// generator, so concurrent calls never observe each other's parameters.
#[derive(Clone)]
pub struct GenerationFacade {
    selector: PipelineSelector,
}

impl GenerationFacade {
    pub fn new(selector: PipelineSelector) -> Self {
        Self { selector }
    }

    pub fn from_loader(loader: Arc<dyn PipelineLoader>) -> Self {
        Self::new(PipelineSelector::new(loader))
    }

    pub fn selector(&self) -> &PipelineSelector {
        &self.selector
    }

    #[instrument(skip(self, config, prompt), fields(model_id = %config.model_id))]
    pub async fn text_to_image(&self, config: &ModelConfig, prompt: &str) -> Result<GenerationOutput> {
        let input = TaskInput::Text {
            width: config.width,
            height: config.height,
        };
        self.run(config, prompt, input).await
    }

    #[instrument(skip(self, config, init_image, prompt), fields(model_id = %config.model_id))]
    pub async fn image_to_image(
        &self,
        config: &ModelConfig,
        init_image: InputImage,
        prompt: &str,
        strength: f64,
    ) -> Result<GenerationOutput> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(GenerationError::InvalidConfig(format!(
                "strength must be within [0, 1], got {}",
                strength
            )));
        }
        let input = TaskInput::Image {
            init_image,
            strength,
        };
        self.run(config, prompt, input).await
    }

    #[instrument(skip(self, config, init_image, mask_image, prompt), fields(model_id = %config.model_id))]
    pub async fn inpaint(
        &self,
        config: &ModelConfig,
        init_image: InputImage,
        mask_image: InputImage,
        prompt: &str,
    ) -> Result<GenerationOutput> {
        let input = TaskInput::Inpaint {
            init_image,
            mask_image,
        };
        self.run(config, prompt, input).await
    }

    async fn run(&self, config: &ModelConfig, prompt: &str, input: TaskInput) -> Result<GenerationOutput> {
        config.validate()?;

        let mut handle = self.selector.select(config, input.task()).await?;
        let (seed, mut rng) = seeded_rng(config.seed);

        let request = PipelineRequest {
            prompt: prompt.to_string(),
            negative_prompt: config.negative_prompt.clone(),
            num_inference_steps: config.num_inference_steps,
            guidance_scale: config.guidance_scale,
            num_images_per_prompt: config.num_images,
            input,
        };

        let images = handle.pipeline_mut().run(&request, &mut rng).await?;

        let output = GenerationOutput {
            images,
            requested: config.num_images,
            seed,
            class: handle.class(),
            scheduler: handle.scheduler_outcome().clone(),
        };
        match output.mismatch() {
            Some(mismatch) => warn!(
                requested = mismatch.requested,
                produced = mismatch.produced,
                "Pipeline returned fewer images than requested"
            ),
            None => info!(count = output.produced(), seed, "Generation finished"),
        }
        Ok(output)
    }
}

/// Per-call generator; an unset seed is replaced by a fresh random one.
fn seeded_rng(seed: Option<u64>) -> (u64, StdRng) {
    let seed = seed.unwrap_or_else(rand::random::<u64>);
    (seed, StdRng::seed_from_u64(seed))
}
