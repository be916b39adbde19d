//! Image decoding and tensor conversion.

use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, MaskTensor, RGB_CHANNELS, SD_IMAGE_SIZE};

/// Decode uploaded bytes into an image, guessing the format from its contents.
///
/// # Errors
///
/// Returns [`Error::ImageDecode`] if the bytes are not a supported image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|source| Error::ImageDecode { source })
}

/// Convert an RGB image to a normalized NCHW tensor (1, 3, 512, 512).
///
/// Images that are not already 512x512 are resized with Lanczos3 first.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn image_to_tensor(img: &RgbImage) -> ImageTensor {
    let resized;
    let rgb = if img.dimensions() == (SD_IMAGE_SIZE, SD_IMAGE_SIZE) {
        img
    } else {
        resized = image::imageops::resize(img, SD_IMAGE_SIZE, SD_IMAGE_SIZE, FilterType::Lanczos3);
        &resized
    };

    let (width, height) = (SD_IMAGE_SIZE as usize, SD_IMAGE_SIZE as usize);
    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        // Normalize from [0, 255] to [-1, 1]
        tensor[[0, 0, y, x]] = (f32::from(pixel[0]) / 127.5) - 1.0;
        tensor[[0, 1, y, x]] = (f32::from(pixel[1]) / 127.5) - 1.0;
        tensor[[0, 2, y, x]] = (f32::from(pixel[2]) / 127.5) - 1.0;
    }

    tensor
}

/// Convert a grayscale mask to a binary NCHW tensor (1, 1, 512, 512).
///
/// Values at or above half intensity become 1 (inpaint), the rest 0 (preserve).
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn mask_to_tensor(mask: &GrayImage) -> MaskTensor {
    let resized;
    let gray = if mask.dimensions() == (SD_IMAGE_SIZE, SD_IMAGE_SIZE) {
        mask
    } else {
        resized = image::imageops::resize(mask, SD_IMAGE_SIZE, SD_IMAGE_SIZE, FilterType::Nearest);
        &resized
    };

    let size = SD_IMAGE_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, pixel) in gray.enumerate_pixels() {
        if f32::from(pixel[0]) / 255.0 >= 0.5 {
            tensor[[0, 0, y as usize, x as usize]] = 1.0;
        }
    }

    tensor
}
