use async_trait::async_trait;
use stablegen_core::{
    BackendType, Device, GeneratedImage, GenerationError, Pipeline, PipelineClass, PipelineLoader,
    PipelineRequest, Result, SchedulerConfig, SchedulerKind, Task, TaskInput,
};
// diffusion_rs reuses names from stablegen_core (ModelConfig, Preset), so alias them.
use diffusion_rs::{
    api::{
        txt2img, Config as DiffusionRsApiConfig, ConfigBuilder as DiffusionRsApiConfigBuilder,
        ModelConfig as DiffusionRsModelConfig, ModelConfigBuilder as DiffusionRsModelConfigBuilder,
        SampleMethod as DiffusionRsSampleMethod,
    },
    preset::{Preset as DiffusionRsPreset, PresetBuilder as DiffusionRsPresetBuilder},
};
use rand::rngs::StdRng;
use rand::Rng;
use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};
use strum_macros::EnumString; // For parsing preset strings
use tracing::{debug, error, info, instrument, warn};

// Environment variable for model paths
const DIFFUSION_MODELS_PATH_ENV: &str = "DIFFUSION_MODELS_PATH";
const DEFAULT_MODELS_PATH_ENV: &str = "MODELS_PATH"; // Fallback

/// Name reported for the sampler a preset ships with.
const PRESET_SCHEDULER: &str = "preset-default";

/// Maps a catalog scheduler onto a stable-diffusion.cpp sampler.
/// `lms` and `unipc` have no counterpart; those keep the preset's sampler.
fn map_to_diffusion_rs_sampler(kind: SchedulerKind) -> Option<DiffusionRsSampleMethod> {
    match kind {
        SchedulerKind::Ddim => Some(DiffusionRsSampleMethod::DDIM_TRAILING),
        SchedulerKind::DpmSolverMultistep => Some(DiffusionRsSampleMethod::DPMPP2M),
        SchedulerKind::Euler => Some(DiffusionRsSampleMethod::EULER),
        SchedulerKind::EulerAncestral => Some(DiffusionRsSampleMethod::EULER_A),
        SchedulerKind::Pndm => Some(DiffusionRsSampleMethod::IPNDM),
        SchedulerKind::Lms | SchedulerKind::UniPc => None,
    }
}

/// Preset names accepted directly as a model id, case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
enum PresetAlias {
    #[strum(serialize = "StableDiffusion1_4")]
    Sd1_4,
    #[strum(serialize = "StableDiffusion1_5")]
    Sd1_5,
    #[strum(serialize = "StableDiffusion2_1")]
    Sd2_1,
    #[strum(serialize = "SDXLBase1_0")]
    SdxlBase1_0,
    #[strum(serialize = "SDTurbo")]
    SdTurbo,
    #[strum(serialize = "SDXLTurbo1_0Fp16")]
    SdxlTurbo1_0Fp16,
}

impl From<PresetAlias> for DiffusionRsPreset {
    fn from(val: PresetAlias) -> Self {
        match val {
            PresetAlias::Sd1_4 => DiffusionRsPreset::StableDiffusion1_4,
            PresetAlias::Sd1_5 => DiffusionRsPreset::StableDiffusion1_5,
            PresetAlias::Sd2_1 => DiffusionRsPreset::StableDiffusion2_1,
            PresetAlias::SdxlBase1_0 => DiffusionRsPreset::SDXLBase1_0,
            PresetAlias::SdTurbo => DiffusionRsPreset::SDTurbo,
            PresetAlias::SdxlTurbo1_0Fp16 => DiffusionRsPreset::SDXLTurbo1_0Fp16,
        }
    }
}

/// Hugging Face repository ids that have a diffusion-rs preset.
fn preset_for_model_id(model_id: &str) -> Option<PresetAlias> {
    match model_id {
        "CompVis/stable-diffusion-v1-4" => Some(PresetAlias::Sd1_4),
        "runwayml/stable-diffusion-v1-5" => Some(PresetAlias::Sd1_5),
        "stabilityai/stable-diffusion-2-1" | "stabilityai/stable-diffusion-2-1-base" => {
            Some(PresetAlias::Sd2_1)
        }
        "stabilityai/stable-diffusion-xl-base-1.0" => Some(PresetAlias::SdxlBase1_0),
        "stabilityai/sd-turbo" => Some(PresetAlias::SdTurbo),
        "stabilityai/sdxl-turbo" => Some(PresetAlias::SdxlTurbo1_0Fp16),
        other => PresetAlias::from_str(other).ok(),
    }
}

/// Resolves a relative weights path against `$DIFFUSION_MODELS_PATH` (or `$MODELS_PATH`).
fn resolve_model_path(model_id: &str) -> Result<PathBuf> {
    let mut model_file_path = PathBuf::from(model_id);

    if !model_file_path.is_absolute() {
        let base_path_str = env::var(DIFFUSION_MODELS_PATH_ENV)
            .or_else(|_| env::var(DEFAULT_MODELS_PATH_ENV))
            .map_err(|_| {
                GenerationError::ModelLoad(format!(
                    "'{}' is not a known preset and neither {} nor {} is set to resolve it as a path",
                    model_id, DIFFUSION_MODELS_PATH_ENV, DEFAULT_MODELS_PATH_ENV
                ))
            })?;
        model_file_path = Path::new(&base_path_str).join(model_id);
    }

    if !model_file_path.exists() {
        return Err(GenerationError::ModelLoad(format!(
            "Model file not found at resolved path: {}",
            model_file_path.display()
        )));
    }
    Ok(model_file_path)
}

/// Loads text-to-image pipelines through stable-diffusion.cpp.
///
/// Model ids are looked up as presets first (Hugging Face ids of the preset
/// catalog, or diffusion-rs preset names), then as local weight files.
#[derive(Debug, Clone, Default)]
pub struct DiffusionRsLoader;

impl DiffusionRsLoader {
    pub fn new() -> Result<Self> {
        info!("DiffusionRsLoader initialized");
        Ok(Self)
    }

    fn build_from_preset(
        &self,
        model_id: &str,
        alias: PresetAlias,
    ) -> Result<(DiffusionRsApiConfig, DiffusionRsModelConfig)> {
        let drs_preset: DiffusionRsPreset = alias.into();
        info!(model_id = %model_id, preset = ?drs_preset, "Loading model from preset");
        let mut preset_builder = DiffusionRsPresetBuilder::default();
        preset_builder.preset(drs_preset);
        preset_builder.prompt(""); // Prompt is set at generation time

        preset_builder.build().map_err(|e| {
            error!(model_id = %model_id, error = ?e, "Failed to build preset");
            GenerationError::ModelLoad(format!(
                "Failed to build diffusion-rs preset for '{}': {:?}",
                model_id, e
            ))
        })
    }

    fn build_from_file(&self, model_id: &str) -> Result<(DiffusionRsApiConfig, DiffusionRsModelConfig)> {
        let model_file_path = resolve_model_path(model_id)?;
        info!(path = %model_file_path.display(), "Loading model from local file path");

        let mut drs_model_config_builder = DiffusionRsModelConfigBuilder::default();
        drs_model_config_builder.model(model_file_path.clone());
        let drs_model_config = drs_model_config_builder.build().map_err(|e| {
            error!(path = %model_file_path.display(), error = ?e, "Failed to build ModelConfig for local file");
            GenerationError::ModelLoad(format!(
                "Failed to build diffusion-rs ModelConfig for '{}': {:?}",
                model_id, e
            ))
        })?;

        let drs_config = DiffusionRsApiConfigBuilder::default()
            .prompt("")
            .build()
            .map_err(|e| GenerationError::ModelLoad(format!("Failed to build default api config: {:?}", e)))?;

        Ok((drs_config, drs_model_config))
    }
}

#[async_trait]
impl PipelineLoader for DiffusionRsLoader {
    #[instrument(skip(self), fields(class = %class))]
    async fn load(&self, model_id: &str, class: PipelineClass) -> Result<Box<dyn Pipeline>> {
        if class.task != Task::TextToImage {
            return Err(GenerationError::UnsupportedTask {
                backend: BackendType::DiffusionRs,
                class,
            });
        }

        let (drs_config, drs_model_config) = match preset_for_model_id(model_id) {
            Some(alias) => self.build_from_preset(model_id, alias)?,
            None => self.build_from_file(model_id)?,
        };
        debug!(model_id = %model_id, config = ?drs_config, model_config = ?drs_model_config, "Pipeline configured");

        Ok(Box::new(DiffusionRsPipeline {
            name: model_id.to_string(),
            class,
            device: Device::Cpu,
            scheduler: SchedulerConfig::builtin(PRESET_SCHEDULER).with_param("model", model_id),
            drs_config,
            drs_model_config,
        }))
    }
}

pub struct DiffusionRsPipeline {
    name: String,
    class: PipelineClass,
    device: Device,
    scheduler: SchedulerConfig,
    drs_config: DiffusionRsApiConfig, // Base config from load time (e.g., from preset)
    drs_model_config: DiffusionRsModelConfig, // Model weights, device info
}

// SAFETY: the configs are only touched from whichever task owns the pipeline;
// txt2img only ever sees clones of them.
unsafe impl Send for DiffusionRsPipeline {}

/// One txt2img invocation, owned so it can move onto the blocking pool.
struct Txt2ImgJob {
    config: DiffusionRsApiConfig,
    model_config: DiffusionRsModelConfig,
}

// SAFETY: the job owns its configs outright and is consumed by a single thread.
unsafe impl Send for Txt2ImgJob {}

/// Runs a diffusion pass on the blocking pool so the runtime keeps serving other tasks.
async fn off_runtime<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!(error = %e, "diffusion-rs worker did not finish");
        GenerationError::PipelineInvocation(format!("diffusion-rs worker did not finish: {}", e))
    })?
}

impl Txt2ImgJob {
    fn run(mut self) -> Result<()> {
        txt2img(&mut self.config, &mut self.model_config).map_err(|e| {
            error!(error = ?e, "txt2img generation failed");
            GenerationError::PipelineInvocation(format!("diffusion-rs txt2img failed: {:?}", e))
        })
    }
}

impl DiffusionRsPipeline {
    fn job(
        &self,
        request: &PipelineRequest,
        (width, height): (u32, u32),
        sampler: Option<DiffusionRsSampleMethod>,
        seed: i64,
        output_path: &Path,
    ) -> Result<Txt2ImgJob> {
        let mut drs_api_config_builder = DiffusionRsApiConfigBuilder::from(self.drs_config.clone());
        drs_api_config_builder.prompt(request.prompt.clone());
        if !request.negative_prompt.is_empty() {
            drs_api_config_builder.negative_prompt(request.negative_prompt.clone());
        }
        drs_api_config_builder.width(width as i32);
        drs_api_config_builder.height(height as i32);
        drs_api_config_builder.steps(request.num_inference_steps as i32);
        drs_api_config_builder.cfg_scale(request.guidance_scale as f32);
        if let Some(sampler) = sampler {
            drs_api_config_builder.sampling_method(sampler);
        }
        drs_api_config_builder.seed(seed);
        drs_api_config_builder.output(output_path.to_path_buf());

        let config = drs_api_config_builder.build().map_err(|e| {
            GenerationError::InvalidConfig(format!("Failed to build diffusion-rs API config: {:?}", e))
        })?;
        Ok(Txt2ImgJob {
            config,
            model_config: self.drs_model_config.clone(),
        })
    }

    fn sampler(&self) -> Option<DiffusionRsSampleMethod> {
        let kind = self.scheduler.kind()?;
        let sampler = map_to_diffusion_rs_sampler(kind);
        if sampler.is_none() {
            warn!(scheduler = %kind, "No stable-diffusion.cpp sampler for scheduler, keeping the preset sampler");
        }
        sampler
    }
}

#[async_trait]
impl Pipeline for DiffusionRsPipeline {
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
        // The compute backend is fixed when diffusion-rs is compiled (cuda/metal/vulkan features).
        debug!(model = %self.name, device = %device, "Recording requested device");
        self.device = device;
        Ok(())
    }

    #[instrument(skip(self, request, rng), fields(model = %self.name, prompt_len = request.prompt.len()))]
    async fn run(
        &mut self,
        request: &PipelineRequest,
        rng: &mut StdRng,
    ) -> Result<Vec<GeneratedImage>> {
        let (width, height) = match &request.input {
            TaskInput::Text { width, height } => (*width, *height),
            _ => {
                return Err(GenerationError::UnsupportedTask {
                    backend: BackendType::DiffusionRs,
                    class: PipelineClass::new(self.class.family, request.input.task()),
                })
            }
        };

        let workdir = tempfile::tempdir()?;
        let sampler = self.sampler();
        let mut images = Vec::with_capacity(request.num_images_per_prompt as usize);

        for index in 0..request.num_images_per_prompt {
            // stable-diffusion.cpp treats negative seeds as "random".
            let seed = rng.gen_range(0..=i64::MAX);
            let output_path = workdir.path().join(format!("{}.png", index));

            let job = self.job(request, (width, height), sampler, seed, &output_path)?;

            info!(index, seed, "Generating image with diffusion-rs");
            off_runtime(move || job.run()).await?;

            let decoded = image::open(&output_path)?.to_rgb8();
            images.push(GeneratedImage::from_rgb_image(decoded));
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stablegen_core::{preset, preset_names, PipelineFamily};

    #[test]
    fn every_catalog_preset_but_the_refiner_maps_to_a_drs_preset() {
        for name in preset_names() {
            let model_id = preset(name).unwrap().model_id;
            let mapped = preset_for_model_id(&model_id);
            if name == "sdxl-refiner" {
                assert!(mapped.is_none());
            } else {
                assert!(mapped.is_some(), "{name} -> {model_id}");
            }
        }
    }

    #[test]
    fn preset_names_parse_case_insensitively() {
        assert_eq!(preset_for_model_id("sdxlbase1_0"), Some(PresetAlias::SdxlBase1_0));
        assert_eq!(preset_for_model_id("StableDiffusion1_5"), Some(PresetAlias::Sd1_5));
        assert_eq!(preset_for_model_id("not-a-preset"), None);
    }

    #[test]
    fn lms_and_unipc_have_no_sampler() {
        assert!(map_to_diffusion_rs_sampler(SchedulerKind::Lms).is_none());
        assert!(map_to_diffusion_rs_sampler(SchedulerKind::UniPc).is_none());
        assert!(map_to_diffusion_rs_sampler(SchedulerKind::EulerAncestral).is_some());
    }

    #[test]
    fn txt2img_jobs_can_cross_threads() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<Txt2ImgJob>();
    }

    // The default test runtime has a single thread, so work run inline would
    // starve the task that unblocks it.
    #[tokio::test]
    async fn blocking_work_leaves_the_runtime_free() {
        let (tx, rx) = std::sync::mpsc::channel();
        let unblocker = tokio::spawn(async move { tx.send(7).unwrap() });

        let received = off_runtime(move || {
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|e| GenerationError::PipelineInvocation(e.to_string()))
        })
        .await
        .unwrap();
        assert_eq!(received, 7);
        unblocker.await.unwrap();
    }

    #[tokio::test]
    async fn a_panicking_worker_is_a_pipeline_failure() {
        let err = off_runtime(|| -> Result<()> { panic!("sd.cpp aborted") })
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::PipelineInvocation(_)));
    }

    #[tokio::test]
    async fn image_tasks_are_rejected_at_load() {
        let loader = DiffusionRsLoader::new().unwrap();
        let class = PipelineClass::new(PipelineFamily::Standard, Task::Inpaint);
        let err = loader
            .load("runwayml/stable-diffusion-v1-5", class)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GenerationError::UnsupportedTask { .. }));
    }

    #[tokio::test]
    async fn unknown_relative_model_without_models_path_fails_to_load() {
        if env::var(DIFFUSION_MODELS_PATH_ENV).is_ok() || env::var(DEFAULT_MODELS_PATH_ENV).is_ok() {
            return;
        }
        let loader = DiffusionRsLoader::new().unwrap();
        let class = PipelineClass::new(PipelineFamily::Standard, Task::TextToImage);
        let err = loader.load("weights/missing.safetensors", class).await.err().unwrap();
        assert!(matches!(err, GenerationError::ModelLoad(_)));
    }
}
