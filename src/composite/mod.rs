//! Plate compositing: places the crop on the canvas, builds the inpaint mask,
//! and restores the plate over the generated image.
//!
//! The placement geometry is fixed: the plate is scaled to a quarter of the
//! canvas width, centred horizontally, and anchored at 65% of the canvas height.

mod paste;
mod transform;

pub use paste::{paste_rgba, paste_value_masked};
pub use transform::{resize_bicubic, rotate_expand, rotated_extent};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, RgbaImage};

use crate::error::{Error, Result};
use crate::image::SD_IMAGE_SIZE;
use crate::pipeline::{GenerationParams, InpaintRequest, Inpainter};

/// Side length of the square working canvas.
pub const CANVAS_SIZE: u32 = SD_IMAGE_SIZE;

/// Plate width as a fraction of the canvas, before the scale factor.
pub const TARGET_WIDTH_FRACTION: f64 = 0.25;

/// Vertical anchor as a fraction of the canvas height.
pub const VERTICAL_ANCHOR_FRACTION: f64 = 0.65;

/// Neutral gray the canvas starts from.
pub const CANVAS_FILL: Rgb<u8> = Rgb([127, 127, 127]);

/// Mask value for pixels the model should regenerate.
pub const MASK_INPAINT: u8 = 255;

/// Mask value for pixels the model should keep.
pub const MASK_PRESERVE: u8 = 0;

/// Largest resized plate side, in multiples of the canvas.
const MAX_PLATE_FACTOR: u32 = 8;

/// Where and how the plate is placed on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Rotation in degrees, clockwise on screen.
    pub rotation: f64,
    /// Horizontal offset in pixels from the anchor.
    pub translate_x: f64,
    /// Vertical offset in pixels from the anchor.
    pub translate_y: f64,
    /// Multiplier on the default plate width.
    pub scale: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
            scale: 1.0,
        }
    }
}

impl Placement {
    /// Validate the placement.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is not finite or the scale is not positive.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("rotation", self.rotation),
            ("x", self.translate_x),
            ("y", self.translate_y),
            ("scale", self.scale),
        ] {
            if !value.is_finite() {
                return Err(Error::invalid(name, "must be a finite number"));
            }
        }

        if self.scale <= 0.0 {
            return Err(Error::invalid("scale", "must be greater than 0"));
        }

        Ok(())
    }

    /// Size the crop is resized to before rotation.
    ///
    /// Width is `trunc(canvas * 0.25 * scale)`; height keeps the aspect ratio, rounded.
    ///
    /// # Errors
    ///
    /// Returns an error for empty crops or when the target collapses to zero pixels
    /// or grows past the supported limit.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn target_size(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(Error::UnsupportedDimensions {
                width,
                height,
                reason: "crop must have a non-zero width and height".to_string(),
            });
        }

        let limit = CANVAS_SIZE * MAX_PLATE_FACTOR;
        let target_w = (f64::from(CANVAS_SIZE) * TARGET_WIDTH_FRACTION * self.scale).trunc();
        let target_h = (f64::from(height) * target_w / f64::from(width)).round();

        if target_w < 1.0 || target_h < 1.0 {
            return Err(Error::UnsupportedDimensions {
                width,
                height,
                reason: format!("scale {} shrinks the plate to nothing", self.scale),
            });
        }
        if target_w > f64::from(limit) || target_h > f64::from(limit) {
            return Err(Error::UnsupportedDimensions {
                width,
                height,
                reason: format!("scale {} grows the plate past {limit} pixels", self.scale),
            });
        }

        // Safe: both values are in [1, limit]
        Ok((target_w as u32, target_h as u32))
    }

    /// Top-left paste position for a plate of the given rotated width.
    ///
    /// The anchor is horizontally centred (floor division) and fixed at 65% of the
    /// canvas height; the translation is added and the sum truncated toward zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    #[must_use]
    pub fn position(&self, rotated_width: u32) -> (i64, i64) {
        let center_x = (i64::from(CANVAS_SIZE) - i64::from(rotated_width)).div_euclid(2);
        let center_y = (f64::from(CANVAS_SIZE) * VERTICAL_ANCHOR_FRACTION).trunc();

        let pos_x = (center_x as f64 + self.translate_x).trunc() as i64;
        let pos_y = (center_y + self.translate_y).trunc() as i64;
        (pos_x, pos_y)
    }
}

/// A prepared canvas and mask, plus what is needed to restore the plate afterwards.
#[derive(Debug, Clone)]
pub struct Composition {
    /// Gray canvas with the plate pasted on.
    pub canvas: RgbImage,
    /// 255 where the model may paint, 0 on the plate silhouette.
    pub mask: GrayImage,
    /// The resized and rotated plate.
    pub plate: RgbaImage,
    /// Top-left paste position of `plate` on the canvas.
    pub position: (i64, i64),
}

impl Composition {
    /// Paste the plate back over a generated image.
    ///
    /// # Errors
    ///
    /// Returns an error if `generated` is not canvas-sized.
    pub fn finish(&self, mut generated: RgbImage) -> Result<RgbImage> {
        if generated.dimensions() != self.canvas.dimensions() {
            return Err(Error::ShapeMismatch {
                expected: format!("{CANVAS_SIZE}x{CANVAS_SIZE} generated image"),
                actual: format!("{}x{}", generated.width(), generated.height()),
            });
        }

        paste_rgba(&mut generated, &self.plate, self.position);
        Ok(generated)
    }
}

/// Build the canvas and mask for a crop.
///
/// # Errors
///
/// Returns a validation error for an unusable crop or placement.
pub fn prepare(crop: &DynamicImage, placement: &Placement) -> Result<Composition> {
    placement.validate()?;

    let crop = crop.to_rgba8();
    let (width, height) = crop.dimensions();
    let (target_w, target_h) = placement.target_size(width, height)?;

    let resized = resize_bicubic(&crop, target_w, target_h);
    let plate = rotate_expand(&resized, -placement.rotation);
    let position = placement.position(plate.width());

    tracing::debug!(
        "Plate {width}x{height} -> {target_w}x{target_h}, rotated {}x{}, at {position:?}",
        plate.width(),
        plate.height()
    );

    let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, CANVAS_FILL);
    paste_rgba(&mut canvas, &plate, position);

    let mut mask = GrayImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Luma([MASK_INPAINT]));
    paste_value_masked(&mut mask, MASK_PRESERVE, &plate, position);

    Ok(Composition {
        canvas,
        mask,
        plate,
        position,
    })
}

/// Composite a plate crop, inpaint around it, and restore the plate.
///
/// # Errors
///
/// Returns a validation error for bad input, or whatever the inpainter fails with.
pub fn process_plate(
    inpainter: &mut dyn Inpainter,
    crop: &DynamicImage,
    placement: &Placement,
    params: &GenerationParams,
) -> Result<RgbImage> {
    params.validate()?;
    let composition = prepare(crop, placement)?;

    tracing::info!("Generating: '{}' | Seed: {}", params.prompt, params.seed);
    let generated = inpainter.inpaint(&InpaintRequest {
        image: &composition.canvas,
        mask: &composition.mask,
        params,
    })?;

    composition.finish(generated)
}
