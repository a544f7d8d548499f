use std::time::Instant;

use diffusion_bench_core::{Backend, DiffusionGenerationParams, Pipeline, PipelineConfig};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Backend to generate with
    #[arg(long, default_value = "compiled")]
    backend: Backend,

    /// Prompt to use
    #[arg(short, long)]
    prompt: String,

    /// Seed for the initial noise
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pipeline = Pipeline::load(PipelineConfig::default(), args.backend, false)?;

    let start = Instant::now();

    let images = pipeline
        .forward(
            vec![args.prompt],
            DiffusionGenerationParams {
                seed: args.seed,
                ..Default::default()
            },
        )?
        .images()?;

    let end = Instant::now();
    println!("Took: {:.2}s", end.duration_since(start).as_secs_f32());

    images[0].save("image.png")?;

    Ok(())
}
