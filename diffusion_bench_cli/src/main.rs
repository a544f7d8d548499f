use cliclack::input;
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Parser;
use diffusion_bench_core::{
    compare, Backend, BenchmarkConfig, BenchmarkReport, DiffusionGenerationParams, Pipeline,
    PipelineConfig, ReshapeParams, TextToImage, DEFAULT_NB_PASS, DEFAULT_NUM_INFERENCE_STEPS,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Prompt to benchmark with. If not specified, it is asked for interactively.
    #[arg(short, long)]
    prompt: Option<String>,

    /// Number of timed passes per pipeline.
    #[arg(long, default_value_t = DEFAULT_NB_PASS)]
    nb_pass: usize,

    /// Number of denoising steps for each timed pass. The warm-up pass always uses 10.
    #[arg(short, long, default_value_t = DEFAULT_NUM_INFERENCE_STEPS)]
    num_inference_steps: usize,

    /// Output image height.
    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Output image width.
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Guidance scale to use.
    #[arg(short, long, default_value_t = 7.5)]
    guidance_scale: f64,

    /// Pipeline config JSON file. If not specified, the default config is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not pin the accelerated pipeline's output shape before benchmarking.
    #[arg(long)]
    no_reshape: bool,

    /// Write a JSON report of the comparison to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Save an image generated by the accelerated pipeline to this path.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Hide progress bars and loading messages.
    #[arg(long)]
    silent: bool,
}

fn check_image_path(path: &Path) -> anyhow::Result<()> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .context("Extension is required for the image path!")?;
    if !["png", "jpg"].contains(&ext) {
        anyhow::bail!(".png or .jpg extension is required!");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.save {
        check_image_path(path)?;
    }

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => input("Prompt:")
            .validate(|input: &String| {
                if input.is_empty() {
                    Err("Prompt is required!")
                } else {
                    Ok(())
                }
            })
            .interact()?,
    };
    let config = BenchmarkConfig::new(prompt)?
        .with_nb_pass(args.nb_pass)?
        .with_num_inference_steps(args.num_inference_steps)?;

    let pipeline_config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let params = DiffusionGenerationParams {
        height: args.height,
        width: args.width,
        num_steps: config.num_inference_steps(),
        guidance_scale: args.guidance_scale,
        ..Default::default()
    };

    let mut baseline = Pipeline::load(pipeline_config.clone(), Backend::Eager, args.silent)?;
    baseline.set_default_params(params.clone());

    let mut accelerated = Pipeline::load(pipeline_config, Backend::Compiled, args.silent)?;
    accelerated.set_default_params(params);
    if !args.no_reshape {
        accelerated.reshape(ReshapeParams {
            batch_size: 1,
            height: args.height,
            width: args.width,
            num_images_per_prompt: 1,
        })?;
    }

    info!(
        "benchmarking {} timed passes of {} steps at {}x{}",
        config.nb_pass(),
        config.num_inference_steps(),
        args.height,
        args.width
    );
    let comparison = compare(&baseline, &accelerated, &config)?;

    println!(
        "Baseline ({}) latency: {:.3}s",
        baseline.backend(),
        comparison.baseline
    );
    println!(
        "Accelerated ({}{}) latency: {:.3}s",
        accelerated.backend(),
        if accelerated.is_static() {
            ", reshaped"
        } else {
            ""
        },
        comparison.accelerated
    );
    println!("Speedup: {:.2}x", comparison.speedup());

    if let Some(path) = &args.report {
        let report = BenchmarkReport::new(&config, args.height, args.width)
            .with_comparison(comparison, accelerated.is_static());
        fs::write(path, report.to_json()?)?;
        info!("wrote report to {}", path.display());
    }

    if let Some(path) = &args.save {
        let images = accelerated
            .generate(config.prompt(), config.num_inference_steps())?
            .images()?;
        let image = images.first().context("Pipeline returned no images.")?;
        image.save(path)?;
        info!("saved image to {}", path.display());
    }

    Ok(())
}
