//! Variational Autoencoder operations for encoding/decoding images.

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::ImageTensor;

use super::onnx::{extract_array4, missing_output};

/// Latent tensor type (batch, 4, 64, 64) for 512x512 images.
pub type LatentTensor = Array4<f32>;

/// VAE scaling factor (from Stable Diffusion).
pub const VAE_SCALE: f32 = 0.18215;

/// Encode an image to scaled latent space using the VAE encoder.
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn encode(encoder: &mut Session, image: &ImageTensor) -> Result<LatentTensor> {
    let input_value =
        Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

    let outputs = encoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    let output = outputs
        .values()
        .next()
        .ok_or_else(|| missing_output("latent_sample"))?;
    let latent = extract_array4(&output, "latent_sample")?;

    // Scale latents as per SD convention
    Ok(latent * VAE_SCALE)
}

/// Decode scaled latents back to image space using the VAE decoder.
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn decode(decoder: &mut Session, latent: &LatentTensor) -> Result<ImageTensor> {
    let unscaled = latent / VAE_SCALE;

    let input_value =
        Tensor::from_array(unscaled).map_err(|source| Error::Inference { source })?;

    let outputs = decoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    let output = outputs
        .values()
        .next()
        .ok_or_else(|| missing_output("sample"))?;
    extract_array4(&output, "sample")
}
