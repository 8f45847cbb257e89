use clap::Parser;
use stablegen::{create_pipeline_loader, BackendType, ConfigManager, GenerationFacade};
use stablegen_server::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stablegen-server", about = "HTTP front-end for Stable Diffusion generation")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "STABLEGEN_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Persisted config document
    #[arg(long, env = "STABLEGEN_CONFIG_PATH", default_value = "config/config.json")]
    config: PathBuf,

    /// Preset used to seed the config document when it does not exist yet
    #[arg(long, env = "STABLEGEN_PRESET")]
    preset: Option<String>,

    #[arg(long, env = "STABLEGEN_OUTPUT_DIR", default_value = "static/generated")]
    output_dir: PathBuf,

    #[arg(long, env = "STABLEGEN_UPLOAD_DIR", default_value = "static/uploads")]
    upload_dir: PathBuf,

    #[arg(long, env = "STABLEGEN_BACKEND", default_value = "diffusion-rs")]
    backend: BackendType,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_directive = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    // A corrupt document stops the server here rather than being overwritten.
    let mut config = ConfigManager::new(&args.config);
    let base = config.load(args.preset.as_deref())?;
    info!(path = %args.config.display(), model_id = %base.model_id, "Loaded base config");

    let loader = create_pipeline_loader(args.backend)?;
    let state = Arc::new(AppState::new(
        GenerationFacade::from_loader(loader),
        config,
        &args.output_dir,
        &args.upload_dir,
    ));
    std::fs::create_dir_all(&args.output_dir)?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, backend = %args.backend, "stablegen-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
