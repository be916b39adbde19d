//! Classifier-free guidance and inpaint conditioning helpers.

use ndarray::{s, Array4, Axis};

use crate::error::{Error, Result};
use crate::image::{ImageTensor, MaskTensor};

/// VAE downsampling factor between pixel and latent space.
pub const LATENT_SCALE: usize = 8;

/// Whether a guidance scale turns classifier-free guidance on.
#[must_use]
pub fn uses_guidance(scale: f32) -> bool {
    scale > 1.0
}

/// `uncond + scale * (cond - uncond)`.
#[must_use]
pub fn apply_guidance(uncond: &Array4<f32>, cond: &Array4<f32>, scale: f32) -> Array4<f32> {
    uncond + &((cond - uncond) * scale)
}

/// Split a batch-of-two prediction into (unconditional, conditional) and combine them.
///
/// # Errors
///
/// Returns an error if the prediction batch is not 2.
pub fn combine_batched(noise_pred: &Array4<f32>, scale: f32) -> Result<Array4<f32>> {
    if noise_pred.len_of(Axis(0)) != 2 {
        return Err(Error::ShapeMismatch {
            expected: "batch of 2 noise predictions".to_string(),
            actual: format!("{:?}", noise_pred.shape()),
        });
    }

    let uncond = noise_pred.slice(s![0..1, .., .., ..]).to_owned();
    let cond = noise_pred.slice(s![1..2, .., .., ..]).to_owned();
    Ok(apply_guidance(&uncond, &cond, scale))
}

/// Zero the pixels the model is asked to regenerate.
#[must_use]
pub fn mask_image(image: &ImageTensor, mask: &MaskTensor) -> ImageTensor {
    let mut masked = image.clone();
    for ((_, _, y, x), value) in masked.indexed_iter_mut() {
        if mask[[0, 0, y, x]] >= 0.5 {
            *value = 0.0;
        }
    }
    masked
}

/// Nearest-neighbour downsample of a pixel mask to latent resolution.
#[must_use]
pub fn downsample_mask(mask: &MaskTensor) -> Array4<f32> {
    let (_, _, height, width) = mask.dim();
    let (lh, lw) = (height / LATENT_SCALE, width / LATENT_SCALE);
    Array4::from_shape_fn((1, 1, lh, lw), |(_, _, y, x)| {
        mask[[0, 0, y * LATENT_SCALE, x * LATENT_SCALE]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guidance_scale_one_is_conditional() {
        let uncond = Array4::<f32>::from_elem((1, 4, 2, 2), 1.0);
        let cond = Array4::<f32>::from_elem((1, 4, 2, 2), 3.0);

        let out = apply_guidance(&uncond, &cond, 1.0);
        assert!(out.iter().all(|&v| (v - 3.0).abs() < 1e-6));

        let out = apply_guidance(&uncond, &cond, 7.5);
        assert!(out.iter().all(|&v| (v - 16.0).abs() < 1e-6));
    }

    #[test]
    fn test_combine_batched_rejects_single() {
        let single = Array4::<f32>::zeros((1, 4, 2, 2));
        assert!(combine_batched(&single, 7.5).is_err());

        let mut pair = Array4::<f32>::zeros((2, 4, 2, 2));
        pair.slice_mut(s![1..2, .., .., ..]).fill(2.0);
        let out = combine_batched(&pair, 2.0).unwrap();
        assert_eq!(out.shape(), &[1, 4, 2, 2]);
        assert!(out.iter().all(|&v| (v - 4.0).abs() < 1e-6));
    }

    #[test]
    fn test_mask_image_zeroes_inpaint_region() {
        let image = Array4::<f32>::from_elem((1, 3, 16, 16), 0.7);
        let mut mask = Array4::<f32>::zeros((1, 1, 16, 16));
        mask[[0, 0, 3, 4]] = 1.0;

        let masked = mask_image(&image, &mask);
        assert_eq!(masked[[0, 1, 3, 4]], 0.0);
        assert!((masked[[0, 1, 4, 4]] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_downsample_mask_takes_top_left_sample() {
        let mut mask = Array4::<f32>::zeros((1, 1, 512, 512));
        mask[[0, 0, 8, 16]] = 1.0;
        mask[[0, 0, 9, 24]] = 1.0;

        let latent = downsample_mask(&mask);
        assert_eq!(latent.shape(), &[1, 1, 64, 64]);
        assert_eq!(latent[[0, 0, 1, 2]], 1.0);
        assert_eq!(latent[[0, 0, 1, 3]], 0.0);
    }
}
