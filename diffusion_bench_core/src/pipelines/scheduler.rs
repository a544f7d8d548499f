use anyhow::{Context, Result};
use serde::Deserialize;

/// Flow-matching scheduler settings, as read from the `scheduler` entry of a pipeline config.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name")]
    pub scheduler_type: SchedulerType,
    /// Latent sequence length at which the dynamic shift equals `base_shift`.
    pub base_image_seq_len: usize,
    pub base_shift: f64,
    /// Latent sequence length at which the dynamic shift equals `max_shift`.
    pub max_image_seq_len: usize,
    pub max_shift: f64,
    /// Static shift, only used when `use_dynamic_shifting` is off.
    pub shift: f64,
    pub use_dynamic_shifting: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_type: SchedulerType::FlowMatchEulerDiscrete,
            base_image_seq_len: 256,
            base_shift: 0.5,
            max_image_seq_len: 4096,
            max_shift: 1.15,
            shift: 1.0,
            use_dynamic_shifting: true,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerType {
    #[default]
    #[serde(rename = "FlowMatchEulerDiscreteScheduler")]
    FlowMatchEulerDiscrete,
}

impl SchedulerConfig {
    /// Reject settings that would make the shift or the sigmas non-finite.
    pub fn validate(&self) -> Result<()> {
        if self.max_image_seq_len <= self.base_image_seq_len {
            anyhow::bail!(
                "`max_image_seq_len` ({}) must be greater than `base_image_seq_len` ({}).",
                self.max_image_seq_len,
                self.base_image_seq_len
            );
        }
        if !self.base_shift.is_finite() || !self.max_shift.is_finite() {
            anyhow::bail!("`base_shift` and `max_shift` must be finite.");
        }
        if !(self.shift.is_finite() && self.shift > 0.) {
            anyhow::bail!("`shift` must be positive, got {}.", self.shift);
        }
        Ok(())
    }

    /// Dynamic shift `mu` for a latent sequence of `image_seq_len` tokens, linear between
    /// `(base_image_seq_len, base_shift)` and `(max_image_seq_len, max_shift)`.
    ///
    /// Only meaningful for a config that passed [`SchedulerConfig::validate`].
    #[allow(clippy::cast_precision_loss)]
    pub fn mu_for(&self, image_seq_len: usize) -> f64 {
        let base = self.base_image_seq_len as f64;
        let span = self.max_image_seq_len as f64 - base;
        let slope = (self.max_shift - self.base_shift) / span;
        self.base_shift + slope * (image_seq_len as f64 - base)
    }

    /// Sigmas for `num_steps` denoising steps: `num_steps + 1` values going from 1 down to 0.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_timesteps(&self, num_steps: usize, mu: Option<f64>) -> Result<Vec<f64>> {
        if num_steps == 0 {
            anyhow::bail!("At least one denoising step is required.");
        }
        let shift = match self.scheduler_type {
            SchedulerType::FlowMatchEulerDiscrete if self.use_dynamic_shifting => {
                let mu = mu.context("`mu` is required for dynamic shifting")?;
                Shift::Dynamic(mu.exp())
            }
            SchedulerType::FlowMatchEulerDiscrete => Shift::Static(self.shift),
        };
        Ok((0..=num_steps)
            .rev()
            .map(|v| shift.apply(v as f64 / num_steps as f64))
            .collect())
    }
}

enum Shift {
    /// Holds `e^mu`.
    Dynamic(f64),
    Static(f64),
}

impl Shift {
    fn apply(&self, t: f64) -> f64 {
        match *self {
            Self::Dynamic(exp_mu) => exp_mu / (exp_mu + (1. / t - 1.)),
            Self::Static(shift) => shift * t / (1. + (shift - 1.) * t),
        }
    }
}
