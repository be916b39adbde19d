//! Tensor-to-image conversion and PNG encoding.

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};

use crate::error::{Error, Result};

use super::{ImageTensor, SD_IMAGE_SIZE};

/// Encode an RGB image as PNG bytes.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png)
        .map_err(|source| Error::ImageEncode {
            format: "PNG",
            source,
        })?;
    Ok(bytes.into_inner())
}

/// Convert a normalized NCHW tensor to a 512x512 RGB image.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn tensor_to_image(tensor: &ImageTensor) -> RgbImage {
    let height = SD_IMAGE_SIZE as usize;
    let width = SD_IMAGE_SIZE as usize;

    let mut img = ImageBuffer::new(SD_IMAGE_SIZE, SD_IMAGE_SIZE);

    for y in 0..height {
        for x in 0..width {
            // Denormalize from [-1, 1] to [0, 255]
            let r = denormalize(tensor[[0, 0, y, x]]);
            let g = denormalize(tensor[[0, 1, y, x]]);
            let b = denormalize(tensor[[0, 2, y, x]]);

            // Safe: x and y are bounded by SD_IMAGE_SIZE (512) which fits in u32
            img.put_pixel(x as u32, y as u32, Rgb([r, g, b]));
        }
    }

    img
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Round half up after clamping, matching the usual `(x / 2 + 0.5) * 255` conversion
    let scaled = (value + 1.0) * 127.5;
    scaled.clamp(0.0, 255.0).round() as u8
}
