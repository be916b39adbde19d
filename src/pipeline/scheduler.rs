//! Deterministic DDIM scheduler (eta = 0).

use ndarray::Array4;

use super::vae::LatentTensor;

/// Number of diffusion steps the model was trained with.
const TRAIN_TIMESTEPS: usize = 1000;
const BETA_START: f64 = 0.000_85;
const BETA_END: f64 = 0.012;
/// Offset added to every inference timestep ("leading" spacing).
const STEPS_OFFSET: usize = 1;

/// DDIM scheduler with the Stable Diffusion 1.x scaled-linear beta schedule.
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdimScheduler {
    /// Build a schedule with `num_steps` inference steps.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn new(num_steps: u32) -> Self {
        let num_steps = (num_steps as usize).clamp(1, TRAIN_TIMESTEPS);

        let (start, end) = (BETA_START.sqrt(), BETA_END.sqrt());
        let last = (TRAIN_TIMESTEPS - 1) as f64;
        let mut product = 1.0;
        let alphas_cumprod = (0..TRAIN_TIMESTEPS)
            .map(|i| {
                let beta = (end - start).mul_add(i as f64 / last, start).powi(2);
                product *= 1.0 - beta;
                product
            })
            .collect();

        let step_ratio = TRAIN_TIMESTEPS / num_steps;
        let timesteps = (0..num_steps)
            .rev()
            .map(|i| i * step_ratio + STEPS_OFFSET)
            .collect();

        Self {
            alphas_cumprod,
            timesteps,
            step_ratio,
        }
    }

    /// Timesteps in the order they are visited (descending).
    #[must_use]
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Timesteps left after skipping the first `1 - strength` of the schedule.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    #[must_use]
    pub fn timesteps_for_strength(&self, strength: f32) -> &[usize] {
        let total = self.timesteps.len();
        let init = ((total as f32 * strength) as usize).min(total);
        &self.timesteps[total - init..]
    }

    /// Standard deviation of the initial noise.
    #[must_use]
    pub const fn init_noise_sigma(&self) -> f32 {
        1.0
    }

    fn alpha_at(&self, timestep: usize) -> f64 {
        self.alphas_cumprod[timestep.min(TRAIN_TIMESTEPS - 1)]
    }

    /// Advance `sample` from `timestep` to the previous timestep.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn step(
        &self,
        noise_pred: &LatentTensor,
        timestep: usize,
        sample: &LatentTensor,
    ) -> LatentTensor {
        let alpha_t = self.alpha_at(timestep);
        // No "set alpha to one": the final step falls back to the first cumulative alpha
        let alpha_prev = timestep
            .checked_sub(self.step_ratio)
            .map_or(self.alphas_cumprod[0], |prev| self.alpha_at(prev));

        let sqrt_alpha_t = alpha_t.sqrt() as f32;
        let sqrt_one_minus_alpha_t = (1.0 - alpha_t).sqrt() as f32;
        let sqrt_alpha_prev = alpha_prev.sqrt() as f32;
        let sqrt_one_minus_alpha_prev = (1.0 - alpha_prev).sqrt() as f32;

        let pred_original = (sample - &(noise_pred * sqrt_one_minus_alpha_t)) / sqrt_alpha_t;
        pred_original * sqrt_alpha_prev + noise_pred * sqrt_one_minus_alpha_prev
    }

    /// Noise clean latents up to `timestep`.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn add_noise(
        &self,
        original: &LatentTensor,
        noise: &Array4<f32>,
        timestep: usize,
    ) -> LatentTensor {
        let alpha = self.alpha_at(timestep);
        original * (alpha.sqrt() as f32) + noise * ((1.0 - alpha).sqrt() as f32)
    }
}
