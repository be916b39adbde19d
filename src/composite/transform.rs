//! Resize and expanding rotation of the plate crop.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Fully transparent fill for corners exposed by rotation.
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Resize with bicubic (Catmull-Rom) interpolation.
#[must_use]
pub fn resize_bicubic(crop: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(crop, width, height, FilterType::CatmullRom)
}

/// Border added around the source before warping; covers the bicubic stencil.
const STENCIL_PAD: u32 = 3;

/// Rotate `image` by `degrees` counter-clockwise, growing the canvas so no content is clipped.
///
/// Pass a negated angle to rotate clockwise. Right angles are exact transposes.
/// Otherwise every output pixel whose centre maps back inside the source is
/// sampled bicubically, with source edges replicated, and the rest is fully
/// transparent.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
#[must_use]
pub fn rotate_expand(image: &RgbaImage, degrees: f64) -> RgbaImage {
    let degrees = degrees.rem_euclid(360.0);
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    // imageops turns clockwise
    if degrees == 0.0 {
        return image.clone();
    } else if degrees == 90.0 {
        return imageops::rotate270(image);
    } else if degrees == 180.0 {
        return imageops::rotate180(image);
    } else if degrees == 270.0 {
        return imageops::rotate90(image);
    }

    let (new_width, new_height) = rotated_extent(width, height, degrees);

    // Pixel centres sit at integer coordinates, so the rotation pivots on (n - 1) / 2
    let (src_cx, src_cy) = (f64::from(width - 1) / 2.0, f64::from(height - 1) / 2.0);
    let (dst_cx, dst_cy) = (f64::from(new_width - 1) / 2.0, f64::from(new_height - 1) / 2.0);
    let pad = f64::from(STENCIL_PAD);

    // Projection::rotate turns clockwise on screen, so a counter-clockwise angle is negated
    let theta = -degrees.to_radians();
    let projection = Projection::translate(dst_cx as f32, dst_cy as f32)
        * Projection::rotate(theta as f32)
        * Projection::translate(-(src_cx + pad) as f32, -(src_cy + pad) as f32);

    let padded = replicate_edges(image, STENCIL_PAD);
    let mut out = RgbaImage::from_pixel(new_width, new_height, TRANSPARENT);
    warp_into(
        &padded,
        &projection,
        Interpolation::Bicubic,
        TRANSPARENT,
        &mut out,
    );

    // Coverage is decided on the unpadded source: [-0.5, n - 0.5) around each centre
    let (sin, cos) = theta.sin_cos();
    let (max_x, max_y) = (f64::from(width) - 0.5, f64::from(height) - 0.5);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = f64::from(x) - dst_cx;
        let dy = f64::from(y) - dst_cy;
        let u = cos.mul_add(dx, sin * dy) + src_cx;
        let v = cos.mul_add(dy, -sin * dx) + src_cy;
        if !(u >= -0.5 && u < max_x && v >= -0.5 && v < max_y) {
            *pixel = TRANSPARENT;
        }
    }

    out
}

/// Copy of `image` with a `pad`-pixel border repeating its outermost pixels.
fn replicate_edges(image: &RgbaImage, pad: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    RgbaImage::from_fn(width + 2 * pad, height + 2 * pad, |x, y| {
        let sx = x.saturating_sub(pad).min(width - 1);
        let sy = y.saturating_sub(pad).min(height - 1);
        *image.get_pixel(sx, sy)
    })
}

/// Bounding box of a `width` x `height` image rotated counter-clockwise by `degrees`.
///
/// Corners are pushed through the centre-anchored affine map and the extent is
/// `ceil(max) - floor(min)` on each axis. The trigonometric terms are rounded to
/// 15 decimals so that right angles give exact swaps.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn rotated_extent(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let degrees = degrees.rem_euclid(360.0);
    if degrees == 0.0 {
        return (width, height);
    }

    let (w, h) = (f64::from(width), f64::from(height));
    let angle = -degrees.to_radians();
    let (a, b) = (round15(angle.cos()), round15(angle.sin()));
    let (d, e) = (-b, a);

    let (cx, cy) = (w / 2.0, h / 2.0);
    let c = a.mul_add(-cx, b * -cy) + cx;
    let f = d.mul_add(-cx, e * -cy) + cy;

    let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let xs = corners.map(|(x, y)| a.mul_add(x, b.mul_add(y, c)));
    let ys = corners.map(|(x, y)| d.mul_add(x, e.mul_add(y, f)));

    let span = |values: [f64; 4]| {
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        (max.ceil() - min.floor()).max(1.0) as u32
    };

    (span(xs), span(ys))
}

#[inline]
fn round15(value: f64) -> f64 {
    (value * 1e15).round() / 1e15
}
