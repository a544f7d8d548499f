use diffusion_bench_core::{
    elapsed_time, Backend, BenchmarkConfig, Pipeline, PipelineConfig, ReshapeParams,
};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BenchmarkConfig::new("sailing ship in storm by Rembrandt")?;

    let pipeline = Pipeline::load(PipelineConfig::default(), Backend::Eager, false)?;
    let baseline = elapsed_time(&pipeline, &config)?;
    println!("Baseline latency: {baseline:.3}s");

    let mut pipeline = Pipeline::load(PipelineConfig::default(), Backend::Compiled, false)?;
    let compiled = elapsed_time(&pipeline, &config)?;
    println!("Compiled latency: {compiled:.3}s");

    pipeline.reshape(ReshapeParams {
        batch_size: 1,
        height: 512,
        width: 512,
        num_images_per_prompt: 1,
    })?;
    let reshaped = elapsed_time(&pipeline, &config)?;
    println!("Compiled + reshaped latency: {reshaped:.3}s");

    println!("Speedup: {:.2}x", baseline / reshaped);

    Ok(())
}
