mod decoder;
mod denoiser;
mod embedding;

use diffusion_bench_common::core::{Device, Result, Tensor};
use rand::{rngs::StdRng, Rng};
use rand_distr::StandardNormal;

pub(crate) use decoder::LatentDecoder;
pub(crate) use denoiser::dispatch_load_denoiser;
pub(crate) use embedding::PromptEmbedding;

/// A velocity model for the flow-matching sampler.
///
/// Each backend keeps latents in its own layout: `pack` converts from `(b, c, h, w)` on entry and
/// `unpack` converts back before decoding.
pub(crate) trait Denoiser: Send + Sync {
    fn pack(&self, latents: &Tensor) -> Result<Tensor>;

    /// `cond` has shape `(b, c)`; the returned tensor is broadcastable against packed latents.
    fn pack_cond(&self, cond: &Tensor) -> Result<Tensor>;

    /// Predicted velocity at time `t` for packed latents `xs`.
    fn forward(&self, xs: &Tensor, cond: &Tensor, t: f64) -> Result<Tensor>;

    fn unpack(&self, xs: &Tensor, height: usize, width: usize) -> Result<Tensor>;
}

/// Gaussian `(rows, cols)` matrix scaled by `std`.
pub(crate) fn init_weight(
    rng: &mut StdRng,
    rows: usize,
    cols: usize,
    std: f32,
    device: &Device,
) -> Result<Tensor> {
    let data: Vec<f32> = (0..rows * cols)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
        .collect();
    Tensor::from_vec(data, (rows, cols), device)
}
