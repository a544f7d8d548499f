use diffusion_bench_common::core::{Result, Tensor};

use super::Denoiser;
use crate::pipelines::Backend;

/// Baseline backend: latents stay in `(b, c, h, w)` and every step permutes them to apply the
/// channel projection, then permutes back.
struct EagerDenoiser {
    weight: Tensor,
}

impl Denoiser for EagerDenoiser {
    fn pack(&self, latents: &Tensor) -> Result<Tensor> {
        Ok(latents.clone())
    }

    fn pack_cond(&self, cond: &Tensor) -> Result<Tensor> {
        let (b, c) = cond.dims2()?;
        cond.reshape((b, c, 1, 1))
    }

    fn forward(&self, xs: &Tensor, cond: &Tensor, t: f64) -> Result<Tensor> {
        let (b, c, h, w) = xs.dims4()?;
        let flat = xs.permute((0, 2, 3, 1))?.contiguous()?.reshape((b * h * w, c))?;
        let proj = flat.matmul(&self.weight)?.tanh()?;
        let proj = proj
            .reshape((b, h, w, c))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        (proj * t)?.broadcast_add(cond)
    }

    fn unpack(&self, xs: &Tensor, _height: usize, _width: usize) -> Result<Tensor> {
        Ok(xs.clone())
    }
}

/// Accelerated backend: latents are packed once into a `(b, h * w, c)` sequence so each step is a
/// single batched matmul with no layout changes.
struct CompiledDenoiser {
    weight: Tensor,
}

impl Denoiser for CompiledDenoiser {
    fn pack(&self, latents: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = latents.dims4()?;
        latents
            .permute((0, 2, 3, 1))? // (b, h, w, c)
            .contiguous()?
            .reshape((b, h * w, c))
    }

    fn pack_cond(&self, cond: &Tensor) -> Result<Tensor> {
        let (b, c) = cond.dims2()?;
        cond.reshape((b, 1, c))
    }

    fn forward(&self, xs: &Tensor, cond: &Tensor, t: f64) -> Result<Tensor> {
        (xs.broadcast_matmul(&self.weight)?.tanh()? * t)?.broadcast_add(cond)
    }

    fn unpack(&self, xs: &Tensor, height: usize, width: usize) -> Result<Tensor> {
        let (b, _h_w, c) = xs.dims3()?;
        xs.reshape((b, height, width, c))?
            .permute((0, 3, 1, 2))? // (b, c, h, w)
            .contiguous()
    }
}

pub(crate) fn dispatch_load_denoiser(backend: Backend, weight: Tensor) -> Result<Box<dyn Denoiser>> {
    match backend {
        Backend::Eager => Ok(Box::new(EagerDenoiser { weight })),
        Backend::Compiled => Ok(Box::new(CompiledDenoiser {
            weight: weight.contiguous()?,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::dispatch_load_denoiser;
    use crate::pipelines::Backend;
    use diffusion_bench_common::core::{DType, Device, Tensor};

    #[test]
    fn backends_agree() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let weight = Tensor::randn(0f32, 0.5, (4, 4), &dev)?;
        let latents = Tensor::randn(0f32, 1., (2, 4, 3, 5), &dev)?;
        let cond = Tensor::randn(0f32, 1., (2, 4), &dev)?;

        let mut outputs = Vec::new();
        for backend in [Backend::Eager, Backend::Compiled] {
            let denoiser = dispatch_load_denoiser(backend, weight.clone())?;
            let xs = denoiser.pack(&latents)?;
            let cond = denoiser.pack_cond(&cond)?;
            let out = denoiser.forward(&xs, &cond, 0.7)?;
            outputs.push(denoiser.unpack(&out, 3, 5)?);
        }

        assert_eq!(outputs[0].dims(), &[2, 4, 3, 5]);
        let diff = (&outputs[0] - &outputs[1])?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-5, "max difference {diff}");
        Ok(())
    }

    #[test]
    fn compiled_round_trips_layout() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let denoiser = dispatch_load_denoiser(Backend::Compiled, Tensor::eye(4, DType::F32, &dev)?)?;
        let latents = Tensor::arange(0f32, 48., &dev)?.reshape((1, 4, 3, 4))?;
        let packed = denoiser.pack(&latents)?;
        assert_eq!(packed.dims(), &[1, 12, 4]);
        let unpacked = denoiser.unpack(&packed, 3, 4)?;
        assert_eq!(
            unpacked.flatten_all()?.to_vec1::<f32>()?,
            latents.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }
}
