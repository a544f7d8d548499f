//! Core crate of diffusion_bench: a latency harness for text-to-image pipelines and a latent
//! diffusion pipeline with eager and compiled backends to measure.
//!
//! ```rust,no_run
//! use diffusion_bench_core::{
//!     compare, Backend, BenchmarkConfig, Pipeline, PipelineConfig, ReshapeParams,
//! };
//!
//! let baseline = Pipeline::load(PipelineConfig::default(), Backend::Eager, false)?;
//! let mut accelerated = Pipeline::load(PipelineConfig::default(), Backend::Compiled, false)?;
//! accelerated.reshape(ReshapeParams {
//!     batch_size: 1,
//!     height: 512,
//!     width: 512,
//!     num_images_per_prompt: 1,
//! })?;
//!
//! let config = BenchmarkConfig::new("sailing ship in storm by Rembrandt")?;
//! let comparison = compare(&baseline, &accelerated, &config)?;
//! println!(
//!     "Baseline: {:.2}s, accelerated: {:.2}s, speedup: {:.2}x",
//!     comparison.baseline,
//!     comparison.accelerated,
//!     comparison.speedup()
//! );
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod benchmark;
mod models;
mod pipelines;

pub use benchmark::{
    compare, elapsed_time, BenchmarkConfig, BenchmarkError, BenchmarkReport, BenchmarkRun,
    LatencyComparison, DEFAULT_NB_PASS, DEFAULT_NUM_INFERENCE_STEPS, WARMUP_STEPS,
};
pub use pipelines::{
    pipeline_fn, Backend, DiffusionGenerationParams, FnPipeline, OutputType, Pipeline,
    PipelineConfig, PipelineOutput, ReshapeParams, SchedulerConfig, SchedulerType, TextToImage,
};
