mod sampling;
mod scheduler;

use std::{fmt::Display, fs, path::Path};

use anyhow::{Context, Result};
use diffusion_bench_common::{
    best_device,
    core::{DType, Device, Tensor},
};
use image::{DynamicImage, RgbImage};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    dispatch_load_denoiser, init_weight, Denoiser, LatentDecoder, PromptEmbedding,
};
pub use scheduler::{SchedulerConfig, SchedulerType};

/// Anything that turns a prompt into generated artifacts, given a number of denoising steps.
///
/// This is the only contract the benchmark harness relies on.
pub trait TextToImage {
    type Output;
    type Error;

    fn generate(
        &self,
        prompt: &str,
        num_inference_steps: usize,
    ) -> std::result::Result<Self::Output, Self::Error>;
}

impl<P: TextToImage + ?Sized> TextToImage for &P {
    type Output = P::Output;
    type Error = P::Error;

    fn generate(
        &self,
        prompt: &str,
        num_inference_steps: usize,
    ) -> std::result::Result<Self::Output, Self::Error> {
        (**self).generate(prompt, num_inference_steps)
    }
}

/// A [`TextToImage`] backed by a closure. Create one with [`pipeline_fn`].
#[derive(Clone, Copy, Debug)]
pub struct FnPipeline<F>(F);

/// Wrap a closure taking `(prompt, num_inference_steps)` as a [`TextToImage`].
///
/// ```rust
/// use diffusion_bench_core::{pipeline_fn, TextToImage};
///
/// let echo = pipeline_fn(|prompt: &str, steps: usize| Ok::<_, String>(format!("{prompt}:{steps}")));
/// assert_eq!(echo.generate("cat", 2).unwrap(), "cat:2");
/// ```
pub fn pipeline_fn<F, O, E>(f: F) -> FnPipeline<F>
where
    F: Fn(&str, usize) -> std::result::Result<O, E>,
{
    FnPipeline(f)
}

impl<F, O, E> TextToImage for FnPipeline<F>
where
    F: Fn(&str, usize) -> std::result::Result<O, E>,
{
    type Output = O;
    type Error = E;

    fn generate(&self, prompt: &str, num_inference_steps: usize) -> std::result::Result<O, E> {
        (self.0)(prompt, num_inference_steps)
    }
}

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct DiffusionGenerationParams {
    pub height: usize,
    pub width: usize,
    /// The number of denoising steps. More denoising steps usually lead to a higher quality image at the
    /// expense of slower inference.
    pub num_steps: usize,
    /// Higher guidance scale pulls the latents more strongly towards the prompt conditioning.
    pub guidance_scale: f64,
    pub num_images_per_prompt: usize,
    pub output_type: OutputType,
    /// Seed for the initial noise. If `None`, fresh noise is drawn for every call.
    pub seed: Option<u64>,
}

impl Default for DiffusionGenerationParams {
    /// Image dimensions will be 512x512 with 20 denoising steps.
    fn default() -> Self {
        Self {
            height: 512,
            width: 512,
            num_steps: 20,
            guidance_scale: 7.5,
            num_images_per_prompt: 1,
            output_type: OutputType::Pil,
            seed: None,
        }
    }
}

/// What [`Pipeline::forward`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Decoded RGB images.
    #[default]
    Pil,
    /// Raw latents, skipping the decoder.
    Latent,
}

#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Images(Vec<DynamicImage>),
    Latents(Tensor),
}

impl PipelineOutput {
    pub fn images(self) -> Result<Vec<DynamicImage>> {
        match self {
            Self::Images(images) => Ok(images),
            Self::Latents(_) => anyhow::bail!("Pipeline returned latents, not images."),
        }
    }
}

/// Execution backend for the pipeline.
///
/// - Eager: latents stay in image layout and each denoising step reshuffles them.
/// - Compiled: latents are packed into a sequence once, so each step is a single batched matmul.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Eager,
    Compiled,
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::Compiled => write!(f, "compiled"),
        }
    }
}

/// Fixed output shape, see [`Pipeline::reshape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReshapeParams {
    pub batch_size: usize,
    pub height: usize,
    pub width: usize,
    pub num_images_per_prompt: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub latent_channels: usize,
    /// Ratio between image and latent resolution.
    pub vae_scale_factor: usize,
    pub weights_seed: u64,
    pub scheduler: SchedulerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latent_channels: 4,
            vae_scale_factor: 8,
            weights_seed: 0,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config `{}`", path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct StaticShape {
    shape: ReshapeParams,
    mu: f64,
}

/// Latent diffusion pipeline: prompt conditioning, flow-matching sampler and latent decoder.
pub struct Pipeline {
    config: PipelineConfig,
    backend: Backend,
    device: Device,
    embedding: PromptEmbedding,
    denoiser: Box<dyn Denoiser>,
    decoder: LatentDecoder,
    defaults: DiffusionGenerationParams,
    static_shape: Option<StaticShape>,
    silent: bool,
}

impl Pipeline {
    /// Load the pipeline on the best available device.
    pub fn load(config: PipelineConfig, backend: Backend, silent: bool) -> Result<Self> {
        let device = best_device(silent)?;
        Self::load_with_device(config, backend, silent, device)
    }

    /// Load the pipeline with a config read from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P, backend: Backend, silent: bool) -> Result<Self> {
        Self::load(PipelineConfig::from_file(path)?, backend, silent)
    }

    /// Weights only depend on `config.weights_seed`, so both backends load identical weights.
    pub fn load_with_device(
        config: PipelineConfig,
        backend: Backend,
        silent: bool,
        device: Device,
    ) -> Result<Self> {
        if config.latent_channels == 0 || config.vae_scale_factor == 0 {
            anyhow::bail!("`latent_channels` and `vae_scale_factor` must be nonzero.");
        }
        config.scheduler.validate()?;
        let channels = config.latent_channels;
        #[allow(clippy::cast_precision_loss)]
        let init_std = 1. / (channels as f32).sqrt();

        let mut rng = StdRng::seed_from_u64(config.weights_seed);
        let embedding = PromptEmbedding::new(init_weight(
            &mut rng,
            PromptEmbedding::VOCAB_SIZE,
            channels,
            1.,
            &device,
        )?);
        let denoiser = dispatch_load_denoiser(
            backend,
            init_weight(&mut rng, channels, channels, init_std, &device)?,
        )?;
        let decoder = LatentDecoder::new(
            init_weight(&mut rng, channels, 3, init_std, &device)?,
            config.vae_scale_factor,
        );

        if !silent {
            info!("loaded {backend} pipeline with {channels} latent channels");
        }

        Ok(Self {
            config,
            backend,
            device,
            embedding,
            denoiser,
            decoder,
            defaults: DiffusionGenerationParams::default(),
            static_shape: None,
            silent,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameters used by [`TextToImage::generate`]. The step count is always overridden.
    pub fn default_params(&self) -> &DiffusionGenerationParams {
        &self.defaults
    }

    pub fn set_default_params(&mut self, params: DiffusionGenerationParams) {
        self.defaults = params;
    }

    /// Whether [`Pipeline::reshape`] has pinned the output shape.
    pub fn is_static(&self) -> bool {
        self.static_shape.is_some()
    }

    /// Pin batch size, resolution and images per prompt ahead of time.
    ///
    /// The default generation parameters are updated to match, and later calls to
    /// [`Pipeline::forward`] with any other shape are rejected.
    pub fn reshape(&mut self, shape: ReshapeParams) -> Result<()> {
        if shape.batch_size == 0 || shape.num_images_per_prompt == 0 {
            anyhow::bail!("Batch size and images per prompt must be nonzero, got {shape:?}.");
        }
        self.validate_resolution(shape.height, shape.width)?;
        let mu = self.shift_for(shape.height, shape.width);

        self.defaults.height = shape.height;
        self.defaults.width = shape.width;
        self.defaults.num_images_per_prompt = shape.num_images_per_prompt;
        self.static_shape = Some(StaticShape { shape, mu });

        if !self.silent {
            info!(
                "reshaped {} pipeline to batch size {}, {}x{}, {} images per prompt",
                self.backend,
                shape.batch_size,
                shape.height,
                shape.width,
                shape.num_images_per_prompt
            );
        }
        Ok(())
    }

    pub fn forward(
        &self,
        prompts: Vec<String>,
        params: DiffusionGenerationParams,
    ) -> Result<PipelineOutput> {
        if prompts.is_empty() {
            anyhow::bail!("At least one prompt is required.");
        }
        if prompts.iter().any(String::is_empty) {
            anyhow::bail!("Prompts must be non-empty.");
        }
        if params.num_images_per_prompt == 0 {
            anyhow::bail!("At least one image per prompt is required.");
        }
        if !params.guidance_scale.is_finite() || params.guidance_scale < 0. {
            anyhow::bail!(
                "Guidance scale must be finite and non-negative, got {}.",
                params.guidance_scale
            );
        }
        self.validate_resolution(params.height, params.width)?;

        let mu = match &self.static_shape {
            Some(StaticShape { shape, mu }) => {
                if prompts.len() != shape.batch_size
                    || params.height != shape.height
                    || params.width != shape.width
                    || params.num_images_per_prompt != shape.num_images_per_prompt
                {
                    anyhow::bail!(
                        "Pipeline was reshaped to {shape:?}, got batch size {}, {}x{} and {} images per prompt.",
                        prompts.len(),
                        params.height,
                        params.width,
                        params.num_images_per_prompt
                    );
                }
                *mu
            }
            None => self.shift_for(params.height, params.width),
        };
        let timesteps = self
            .config
            .scheduler
            .get_timesteps(params.num_steps, Some(mu))?;

        let scale = self.config.vae_scale_factor;
        let (latent_h, latent_w) = (params.height / scale, params.width / scale);
        let batch = prompts.len() * params.num_images_per_prompt;

        let guidance = params.guidance_scale / (1. + params.guidance_scale);
        let cond = (self
            .embedding
            .forward(&prompts, params.num_images_per_prompt)?
            * guidance)?;
        let cond = self.denoiser.pack_cond(&cond)?;

        let noise = sampling::get_noise(
            batch,
            self.config.latent_channels,
            latent_h,
            latent_w,
            params.seed,
            &self.device,
        )?;
        let img = self.denoiser.pack(&noise)?;
        let img = sampling::sample(&timesteps, &img, self.silent, |xs, t| {
            self.denoiser.forward(xs, &cond, t)
        })?;
        let latents = self.denoiser.unpack(&img, latent_h, latent_w)?;
        debug!(
            "{} pipeline denoised {batch} latents in {} steps",
            self.backend, params.num_steps
        );

        match params.output_type {
            OutputType::Latent => Ok(PipelineOutput::Latents(latents)),
            OutputType::Pil => {
                let img = self.decoder.decode(&latents)?;
                let img = ((img.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
                Ok(PipelineOutput::Images(to_images(&img)?))
            }
        }
    }

    fn validate_resolution(&self, height: usize, width: usize) -> Result<()> {
        let scale = self.config.vae_scale_factor;
        if height == 0 || width == 0 || height % scale != 0 || width % scale != 0 {
            anyhow::bail!(
                "Height and width must be nonzero multiples of {scale}, got {height}x{width}."
            );
        }
        Ok(())
    }

    fn shift_for(&self, height: usize, width: usize) -> f64 {
        let scale = self.config.vae_scale_factor;
        self.config
            .scheduler
            .mu_for((height / scale) * (width / scale))
    }
}

impl TextToImage for Pipeline {
    type Output = PipelineOutput;
    type Error = anyhow::Error;

    /// Run one prompt with the default parameters. A reshaped pipeline repeats the prompt to fill
    /// its batch.
    fn generate(&self, prompt: &str, num_inference_steps: usize) -> Result<PipelineOutput> {
        let batch_size = self
            .static_shape
            .as_ref()
            .map_or(1, |static_shape| static_shape.shape.batch_size);
        let params = DiffusionGenerationParams {
            num_steps: num_inference_steps,
            ..self.defaults.clone()
        };
        self.forward(vec![prompt.to_string(); batch_size], params)
    }
}

fn to_images(img: &Tensor) -> Result<Vec<DynamicImage>> {
    let (_b, c, h, w) = img.dims4()?;
    if c != 3 {
        anyhow::bail!("Expected 3 channels in image output");
    }
    let mut images = Vec::new();
    for b_img in img.chunk(img.dim(0)?, 0)? {
        let flattened = b_img.squeeze(0)?.permute((1, 2, 0))?.flatten_all()?;
        #[allow(clippy::cast_possible_truncation)]
        images.push(DynamicImage::ImageRgb8(
            RgbImage::from_raw(w as u32, h as u32, flattened.to_vec1::<u8>()?)
                .context("RgbImage has invalid capacity.")?,
        ));
    }
    Ok(images)
}
