use diffusion_bench_common::core::{Result, Tensor};

/// Maps latents back to pixel space.
pub(crate) struct LatentDecoder {
    proj: Tensor,
    scale_factor: usize,
}

impl LatentDecoder {
    pub(crate) fn new(proj: Tensor, scale_factor: usize) -> Self {
        Self { proj, scale_factor }
    }

    /// `(b, c, h, w)` latents to `(b, 3, h * scale, w * scale)` images in `[-1, 1]`.
    pub(crate) fn decode(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = xs.dims4()?;
        let (_, out_c) = self.proj.dims2()?;
        let flat = xs.permute((0, 2, 3, 1))?.contiguous()?.reshape((b * h * w, c))?;
        flat.matmul(&self.proj)?
            .tanh()?
            .reshape((b, h, w, out_c))?
            .permute((0, 3, 1, 2))?
            .contiguous()?
            .upsample_nearest2d(h * self.scale_factor, w * self.scale_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::LatentDecoder;
    use diffusion_bench_common::core::{Device, Tensor};

    #[test]
    fn decodes_to_pixel_resolution() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let decoder = LatentDecoder::new(Tensor::randn(0f32, 1., (4, 3), &dev)?, 8);
        let img = decoder.decode(&Tensor::randn(0f32, 1., (2, 4, 2, 3), &dev)?)?;
        assert_eq!(img.dims(), &[2, 3, 16, 24]);
        let values = img.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
        Ok(())
    }
}
