//! Alpha-masked pasting onto the canvas and mask.

use image::{GrayImage, RgbImage, RgbaImage};

/// Paste `src` onto `dst` at `(x, y)`, blending with the source alpha.
///
/// The offset may be negative or past the edge; pixels that land outside `dst` are dropped.
pub fn paste_rgba(dst: &mut RgbImage, src: &RgbaImage, (x, y): (i64, i64)) {
    for_each_overlap(dst.dimensions(), src.dimensions(), (x, y), |dx, dy, sx, sy| {
        let s = src.get_pixel(sx, sy);
        let alpha = u32::from(s[3]);
        if alpha == 0 {
            return;
        }
        let d = dst.get_pixel_mut(dx, dy);
        for c in 0..3 {
            d[c] = blend(d[c], s[c], alpha);
        }
    });
}

/// Fill `value` into `dst` through the alpha channel of `shape`, placed at `(x, y)`.
pub fn paste_value_masked(dst: &mut GrayImage, value: u8, shape: &RgbaImage, (x, y): (i64, i64)) {
    for_each_overlap(dst.dimensions(), shape.dimensions(), (x, y), |dx, dy, sx, sy| {
        let alpha = u32::from(shape.get_pixel(sx, sy)[3]);
        if alpha == 0 {
            return;
        }
        let d = dst.get_pixel_mut(dx, dy);
        d[0] = blend(d[0], value, alpha);
    });
}

/// Visit every source pixel that lands inside the destination.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn for_each_overlap(
    (dst_w, dst_h): (u32, u32),
    (src_w, src_h): (u32, u32),
    (x, y): (i64, i64),
    mut f: impl FnMut(u32, u32, u32, u32),
) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = x.saturating_add(i64::from(src_w)).min(i64::from(dst_w));
    let y1 = y.saturating_add(i64::from(src_h)).min(i64::from(dst_h));

    // Safe: every coordinate below is clamped into [0, dst) and [0, src)
    for dy in y0..y1 {
        for dx in x0..x1 {
            f(dx as u32, dy as u32, (dx - x) as u32, (dy - y) as u32);
        }
    }
}

/// `(dst * (255 - alpha) + src * alpha) / 255`, rounded.
#[inline]
#[allow(clippy::cast_possible_truncation)]
fn blend(dst: u8, src: u8, alpha: u32) -> u8 {
    let v = u32::from(dst) * (255 - alpha) + u32::from(src) * alpha;
    let t = v + 128;
    // Safe: the result of the rounded divide-by-255 never exceeds 255
    (((t >> 8) + t) >> 8) as u8
}
