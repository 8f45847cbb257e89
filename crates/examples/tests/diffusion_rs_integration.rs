#[cfg(feature = "diffusion-rs")]
mod diffusion_rs_tests {
    use anyhow::Result;
    use stablegen::output::save_images;
    use stablegen::{
        create_pipeline_loader, BackendType, ConfigOverrides, GenerationFacade, ModelConfig,
    };
    use std::env;

    // Helper function to setup tracing and dotenv only once
    fn setup() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        dotenvy::dotenv().ok();
    }

    #[tokio::test]
    #[ignore = "Requires diffusion-rs setup and preset weights (downloaded on first run)"]
    async fn test_diffusion_preset_generation() -> Result<()> {
        setup();

        let loader = create_pipeline_loader(BackendType::DiffusionRs)?;
        let facade = GenerationFacade::from_loader(loader);

        let config = ModelConfig::new("stabilityai/sd-turbo").with_overrides(
            &ConfigOverrides::new()
                .with_width(512)
                .with_height(512)
                .with_steps(4) // Fewer steps for Turbo
                .with_guidance_scale(1.2)
                .with_scheduler("euler_a")
                .with_negative_prompt("blurry, low quality, watermark")
                .with_seed(Some(12345))
                .with_num_images(2),
        );

        let prompt = "A corgi in a wizard hat, detailed, fantasy art";
        let output = facade.text_to_image(&config, prompt).await?;
        assert_eq!(output.produced(), 2);
        assert_eq!((output.images[0].width, output.images[0].height), (512, 512));

        let out_dir = env::temp_dir().join("stablegen_diffusion_preset");
        let paths = save_images(&out_dir, Some("animal"), &output.images)?;
        for path in &paths {
            println!("Image saved to {}", path.display());
            assert!(path.exists(), "Output file should exist");
        }
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires diffusion-rs setup and a local model under DIFFUSION_MODELS_PATH."]
    async fn test_diffusion_local_model_generation() -> Result<()> {
        setup();

        let Ok(model_file) = env::var("STABLEGEN_TEST_MODEL") else {
            println!("Skipping local model test: set STABLEGEN_TEST_MODEL to a weights file.");
            return Ok(());
        };

        let loader = create_pipeline_loader(BackendType::DiffusionRs)?;
        let facade = GenerationFacade::from_loader(loader);
        let config = ModelConfig::new(model_file)
            .with_size(512, 512)
            .with_steps(20)
            .with_scheduler("dpm++")
            .with_seed(Some(54321));

        let output = facade
            .text_to_image(&config, "A serene forest path at dawn, shafts of light through trees")
            .await?;
        let images = output.into_complete()?;
        assert_eq!(images.len(), 1);
        Ok(())
    }
}
