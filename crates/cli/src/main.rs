use anyhow::Context;
use clap::Parser;
use stablegen::output::save_images;
use stablegen::{
    create_pipeline_loader, default_prompt, BackendType, ConfigManager, ConfigOverrides,
    GenerationError, GenerationFacade, ImageType, DEFAULT_PRESET,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stablegen", about = "Generate images with Stable Diffusion")]
struct Args {
    /// Type of image to generate (character, animal, object, architecture)
    #[arg(long = "type", value_name = "TYPE")]
    kind: ImageType,

    /// Custom prompt; defaults to the stock prompt for the type
    #[arg(long)]
    prompt: Option<String>,

    /// Preset used when no config document exists yet
    #[arg(long, default_value = DEFAULT_PRESET)]
    model: String,

    #[arg(long)]
    steps: Option<u32>,

    #[arg(long)]
    guidance: Option<f64>,

    /// Positive values pin the seed, negative values ask for a random one
    #[arg(long, allow_negative_numbers = true)]
    seed: Option<i64>,

    #[arg(long, value_parser = ["default", "ddim", "dpm++", "euler", "euler_a", "lms", "pndm", "unipc"])]
    scheduler: Option<String>,

    #[arg(long)]
    negative_prompt: Option<String>,

    #[arg(long, default_value_t = 1)]
    num_images: u32,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Defaults to assets/<type>
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Config document; defaults to $STABLEGEN_CONFIG_PATH or config/config.json
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "STABLEGEN_BACKEND", default_value = "diffusion-rs")]
    backend: BackendType,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new().with_num_images(self.num_images);
        if let Some(steps) = self.steps {
            overrides = overrides.with_steps(steps);
        }
        if let Some(guidance) = self.guidance {
            overrides = overrides.with_guidance_scale(guidance);
        }
        // Zero leaves the persisted seed alone.
        if let Some(seed) = self.seed.filter(|seed| *seed != 0) {
            overrides = overrides.with_request_seed(seed);
        }
        if let Some(scheduler) = &self.scheduler {
            overrides = overrides.with_scheduler(scheduler.clone());
        }
        if let Some(negative) = &self.negative_prompt {
            overrides = overrides.with_negative_prompt(negative.clone());
        }
        if let Some(width) = self.width {
            overrides = overrides.with_width(width);
        }
        if let Some(height) = self.height {
            overrides = overrides.with_height(height);
        }
        overrides
    }

    fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("assets").join(self.kind.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_directive = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let mut manager = match &args.config {
        Some(path) => ConfigManager::new(path),
        None => ConfigManager::from_env(),
    };
    let base = manager
        .load(Some(args.model.as_str()))
        .with_context(|| format!("loading config from {}", manager.path().display()))?;
    let config = base.with_overrides(&args.overrides());
    debug!(?config, "Resolved generation config");

    let prompt = args
        .prompt
        .clone()
        .unwrap_or_else(|| default_prompt(args.kind).to_string());

    let loader = create_pipeline_loader(args.backend)?;
    let facade = GenerationFacade::from_loader(loader);
    let output = facade.text_to_image(&config, &prompt).await?;
    info!(seed = output.seed, pipeline = %output.class, "Generation finished");

    let kind = args.kind.to_string();
    let paths = save_images(&args.output_dir(), Some(kind.as_str()), &output.images)?;
    for (i, path) in paths.iter().enumerate() {
        println!("Image {} saved to {}", i + 1, path.display());
    }

    if let Some(mismatch) = output.mismatch() {
        return Err(GenerationError::from(mismatch).into());
    }
    Ok(())
}
