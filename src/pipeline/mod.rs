//! Diffusion inpainting: the [`Inpainter`] seam and its ONNX Runtime backend.

mod diffusion;
mod guidance;
mod onnx;
mod scheduler;
mod text;
mod vae;

pub use diffusion::{Config, InpaintPipeline, TimestepType};
pub use scheduler::DdimScheduler;

use image::{GrayImage, RgbImage};

use crate::error::{Error, Result};

/// Negative prompt sent with every generation.
pub const NEGATIVE_PROMPT: &str =
    "low quality, blurry, distorted, text, watermark, bad anatomy, cropped";

/// Prompt used when the caller does not send one.
pub const DEFAULT_PROMPT: &str = "a photo of a car";

/// Parameters handed to the inpainting model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Text prompt describing the scene.
    pub prompt: String,
    /// What the model should steer away from.
    pub negative_prompt: String,
    /// Number of denoising steps.
    pub steps: u32,
    /// Classifier-free guidance scale. Values at or below 1 disable guidance.
    pub guidance: f32,
    /// Fraction of the schedule to run (0.0-1.0]. 1.0 starts from pure noise.
    pub strength: f32,
    /// Seed for the noise generator.
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            steps: 30,
            guidance: 7.5,
            strength: 1.0,
            seed: 42,
        }
    }
}

impl GenerationParams {
    /// Validate the parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::invalid("steps", "must be greater than 0"));
        }

        if !self.guidance.is_finite() {
            return Err(Error::invalid("guidance", "must be a finite number"));
        }

        if !(self.strength > 0.0 && self.strength <= 1.0) {
            return Err(Error::invalid("strength", "must be in (0.0, 1.0]"));
        }

        Ok(())
    }
}

/// One inpainting call: a canvas, its mask, and generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct InpaintRequest<'a> {
    /// 512x512 RGB canvas.
    pub image: &'a RgbImage,
    /// 512x512 mask; 255 regenerates a pixel, 0 keeps it.
    pub mask: &'a GrayImage,
    /// Prompt, steps, guidance and seed.
    pub params: &'a GenerationParams,
}

/// A model that fills the masked region of an image.
///
/// The same seed and inputs must give the same output.
pub trait Inpainter: Send {
    /// Inpaint the white region of `request.mask`, returning a canvas-sized image.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails.
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();

        assert_eq!(params.prompt, "a photo of a car");
        assert_eq!(params.steps, 30);
        assert!((params.guidance - 7.5).abs() < f32::EPSILON);
        assert_eq!(params.seed, 42);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero_steps = GenerationParams {
            steps: 0,
            ..GenerationParams::default()
        };
        assert!(zero_steps.validate().is_err());

        let nan_guidance = GenerationParams {
            guidance: f32::NAN,
            ..GenerationParams::default()
        };
        assert!(nan_guidance.validate().is_err());

        let no_strength = GenerationParams {
            strength: 0.0,
            ..GenerationParams::default()
        };
        assert!(no_strength.validate().is_err());
    }
}
