#![allow(clippy::cast_precision_loss)]

use diffusion_bench_common::{
    core::{Device, Result, Tensor},
    NiceProgressBar,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Standard normal latents of shape `(num_samples, channels, height, width)`.
///
/// The same `seed` always yields the same noise.
pub fn get_noise(
    num_samples: usize,
    channels: usize,
    height: usize,
    width: usize,
    seed: Option<u64>,
    device: &Device,
) -> Result<Tensor> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let len = num_samples * channels * height * width;
    let data: Vec<f32> = (0..len).map(|_| rng.sample::<f32, _>(StandardNormal)).collect();
    Tensor::from_vec(data, (num_samples, channels, height, width), device)
}

/// Euler integration over consecutive timestep pairs.
pub fn sample(
    timesteps: &[f64],
    img: &Tensor,
    silent: bool,
    step: impl Fn(&Tensor, f64) -> Result<Tensor>,
) -> Result<Tensor> {
    let mut img = img.clone();
    for window in NiceProgressBar::<_, 'g'>::new(timesteps.windows(2), "Denoise loop", silent) {
        let (t_curr, t_prev) = match window {
            [a, b] => (*a, *b),
            _ => continue,
        };
        let pred = step(&img, t_curr)?;
        img = (img + (pred * (t_prev - t_curr))?)?;
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::{get_noise, sample};
    use diffusion_bench_common::core::{Device, Tensor};

    #[test]
    fn seeded_noise_is_reproducible() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let a = get_noise(1, 4, 8, 8, Some(42), &dev)?;
        let b = get_noise(1, 4, 8, 8, Some(42), &dev)?;
        assert_eq!(a.dims(), &[1, 4, 8, 8]);
        assert_eq!(
            a.flatten_all()?.to_vec1::<f32>()?,
            b.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn constant_velocity_integrates_linearly() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let img = Tensor::zeros(3, diffusion_bench_common::core::DType::F32, &dev)?;
        let timesteps = [1.0, 0.75, 0.5, 0.25, 0.0];
        // dx/dt = 1 integrated from t = 1 to t = 0 gives -1.
        let out = sample(&timesteps, &img, true, |x, _t| x.ones_like())?;
        for v in out.to_vec1::<f32>()? {
            assert!((v + 1.0).abs() < 1e-6);
        }
        Ok(())
    }
}
