//! Image decoding, tensor conversion, and encoding utilities.

mod load;
mod save;

pub use load::{decode_image, image_to_tensor, mask_to_tensor};
pub use save::{encode_png, tensor_to_image};

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1] range for diffusion model compatibility.
pub type ImageTensor = Array4<f32>;

/// Mask tensor in NCHW format (1, 1, height, width) with values in {0, 1}.
/// 1 marks pixels to regenerate.
pub type MaskTensor = Array4<f32>;

/// Standard image size for Stable Diffusion 1.5, also the compositing canvas size.
pub const SD_IMAGE_SIZE: u32 = 512;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
