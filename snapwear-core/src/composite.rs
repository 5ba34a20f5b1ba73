use image::{RgbImage, RgbaImage};

/// Blend `overlay` onto `base` with its top-left corner at `(x, y)`.
///
/// Source-over blending per channel: `a * overlay + (1 - a) * base` with
/// `a = alpha / 255`. Only the part of the overlay that intersects the base
/// is written; anything outside is clipped. This is the one place the
/// engine mutates a buffer in place.
pub fn alpha_overlay(base: &mut RgbImage, overlay: &RgbaImage, x: i64, y: i64) {
    let (base_w, base_h) = (base.width() as i64, base.height() as i64);
    if x >= base_w || y >= base_h {
        return;
    }

    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + overlay.width() as i64).min(base_w);
    let y2 = (y + overlay.height() as i64).min(base_h);
    if x1 >= x2 || y1 >= y2 {
        return;
    }

    for by in y1..y2 {
        for bx in x1..x2 {
            let src = overlay.get_pixel((bx - x) as u32, (by - y) as u32);
            let alpha = src[3] as f32 / 255.0;
            if alpha == 0.0 {
                continue;
            }

            let dst = base.get_pixel_mut(bx as u32, by as u32);
            for c in 0..3 {
                let blended = alpha * src[c] as f32 + (1.0 - alpha) * dst[c] as f32;
                dst[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Copying variant of [`alpha_overlay`]
pub fn composite(mut base: RgbImage, overlay: &RgbaImage, x: i64, y: i64) -> RgbImage {
    alpha_overlay(&mut base, overlay, x, y);
    base
}
