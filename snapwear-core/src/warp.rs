use crate::placement::scaled_size;
use image::{Rgba, RgbaImage};

const TRANSPARENT: [f32; 4] = [0.0; 4];

/// Scales and rotates garment buffers, alpha included
pub struct AffineTransformer;

impl AffineTransformer {
    /// Scale by `scale_factor` (area averaging), then rotate about the
    /// center by `rotation_degrees` onto an expanded canvas.
    pub fn transform(garment: &RgbaImage, scale_factor: f32, rotation_degrees: f32) -> RgbaImage {
        let (width, height) = garment.dimensions();
        let (new_width, new_height) = scaled_size(width, height, scale_factor);

        let resized = if (new_width, new_height) == (width, height) {
            garment.clone()
        } else {
            Self::resize_area(garment, new_width, new_height)
        };

        if rotation_degrees == 0.0 {
            return resized;
        }
        Self::rotate_expanded(&resized, rotation_degrees)
    }

    /// Resample by averaging every source pixel a destination pixel covers,
    /// weighted by covered area. Channels are averaged independently.
    pub fn resize_area(image: &RgbaImage, out_width: u32, out_height: u32) -> RgbaImage {
        let (width, height) = image.dimensions();
        let out_width = out_width.max(1);
        let out_height = out_height.max(1);
        if width == 0 || height == 0 {
            return RgbaImage::new(out_width, out_height);
        }

        let x_weights = area_weights(width, out_width);
        let y_weights = area_weights(height, out_height);

        RgbaImage::from_fn(out_width, out_height, |x_out, y_out| {
            let mut acc = [0.0f32; 4];
            for &(y_in, wy) in &y_weights[y_out as usize] {
                for &(x_in, wx) in &x_weights[x_out as usize] {
                    let pixel = image.get_pixel(x_in, y_in);
                    let weight = wx * wy;
                    for c in 0..4 {
                        acc[c] += pixel[c] as f32 * weight;
                    }
                }
            }
            Rgba(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
        })
    }

    /// Rotate about the image center onto the smallest canvas holding the
    /// whole rotated rectangle. Uncovered pixels are fully transparent.
    pub fn rotate_expanded(image: &RgbaImage, degrees: f32) -> RgbaImage {
        let (width, height) = image.dimensions();
        let (w, h) = (width as f64, height as f64);

        let (sin, cos) = (degrees as f64).to_radians().sin_cos();
        let out_width = ((h * sin.abs() + w * cos.abs()) as u32).max(1);
        let out_height = ((h * cos.abs() + w * sin.abs()) as u32).max(1);

        let (src_cx, src_cy) = (w / 2.0, h / 2.0);
        let (dst_cx, dst_cy) = (out_width as f64 / 2.0, out_height as f64 / 2.0);

        // Backward mapping through the inverse rotation, sampling at pixel centers
        RgbaImage::from_fn(out_width, out_height, |x_out, y_out| {
            let u = x_out as f64 + 0.5 - dst_cx;
            let v = y_out as f64 + 0.5 - dst_cy;
            let x_in = cos * u + sin * v + src_cx - 0.5;
            let y_in = -sin * u + cos * v + src_cy - 0.5;
            Rgba(sample_bilinear(image, x_in as f32, y_in as f32))
        })
    }
}

/// Source pixels and coverage weights for each destination index
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(u32, f32)>> {
    let scale = src_len as f64 / dst_len as f64;

    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src_len as f64);

            let mut weights = Vec::new();
            let mut s = start.floor() as u32;
            while (s as f64) < end && s < src_len {
                let covered = end.min(s as f64 + 1.0) - start.max(s as f64);
                if covered > 0.0 {
                    weights.push((s, covered));
                }
                s += 1;
            }

            let total: f64 = weights.iter().map(|&(_, w)| w).sum();
            weights
                .into_iter()
                .map(|(s, w)| (s, (w / total) as f32))
                .collect()
        })
        .collect()
}

fn sample_bilinear(image: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let x_floor = x.floor();
    let y_floor = y.floor();
    let x_frac = x - x_floor;
    let y_frac = y - y_floor;

    let x0 = x_floor as i64;
    let y0 = y_floor as i64;

    let p00 = texel(image, x0, y0);
    let p10 = texel(image, x0 + 1, y0);
    let p01 = texel(image, x0, y0 + 1);
    let p11 = texel(image, x0 + 1, y0 + 1);

    let mut pixel = [0u8; 4];
    for c in 0..4 {
        let v0 = p00[c] * (1.0 - x_frac) + p10[c] * x_frac;
        let v1 = p01[c] * (1.0 - x_frac) + p11[c] * x_frac;
        let v = v0 * (1.0 - y_frac) + v1 * y_frac;
        pixel[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    pixel
}

/// Pixel as floats, transparent outside the image
fn texel(image: &RgbaImage, x: i64, y: i64) -> [f32; 4] {
    if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
        return TRANSPARENT;
    }
    image.get_pixel(x as u32, y as u32).0.map(|v| v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 40) as u8, (y * 40) as u8, 100, 255])
        })
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let image = gradient(5, 4);
        assert_eq!(AffineTransformer::resize_area(&image, 5, 4), image);
    }

    #[test]
    fn test_resize_area_averages_blocks() {
        // 4x2 with left half black, right half white, alpha split too
        let image = RgbaImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([200, 200, 200, 255])
            }
        });

        let half = AffineTransformer::resize_area(&image, 2, 1);
        assert_eq!(*half.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*half.get_pixel(1, 0), Rgba([200, 200, 200, 255]));

        let single = AffineTransformer::resize_area(&image, 1, 1);
        assert_eq!(*single.get_pixel(0, 0), Rgba([100, 100, 100, 128]));
    }

    #[test]
    fn test_resize_uniform_color_non_integer_ratio() {
        let image = RgbaImage::from_pixel(7, 5, Rgba([12, 34, 56, 255]));
        let out = AffineTransformer::resize_area(&image, 3, 2);
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| *p == Rgba([12, 34, 56, 255])));

        let up = AffineTransformer::resize_area(&image, 11, 9);
        assert!(up.pixels().all(|p| *p == Rgba([12, 34, 56, 255])));
    }

    #[test]
    fn test_zero_rotation_keeps_aspect_without_border() {
        let image = RgbaImage::from_pixel(200, 300, Rgba([90, 60, 30, 255]));
        let out = AffineTransformer::transform(&image, 1.5, 0.0);

        assert_eq!(out.dimensions(), (300, 450));
        assert!(out.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn test_rotate_quarter_turn_swaps_dimensions() {
        let image = gradient(4, 2);
        let rotated = AffineTransformer::rotate_expanded(&image, 90.0);

        assert_eq!(rotated.dimensions(), (2, 4));
        // Clockwise: output (x, y) comes from source (y, height - 1 - x)
        for y in 0..4 {
            for x in 0..2 {
                assert_eq!(rotated.get_pixel(x, y), image.get_pixel(y, 1 - x));
            }
        }
    }

    #[test]
    fn test_rotate_expands_canvas_with_transparent_corners() {
        let image = RgbaImage::from_pixel(100, 60, Rgba([255, 0, 0, 255]));
        let rotated = AffineTransformer::rotate_expanded(&image, 30.0);

        let (sin, cos) = 30f64.to_radians().sin_cos();
        let expected_w = (60.0 * sin + 100.0 * cos) as u32;
        let expected_h = (60.0 * cos + 100.0 * sin) as u32;
        assert_eq!(rotated.dimensions(), (expected_w, expected_h));

        assert_eq!(rotated.get_pixel(0, 0)[3], 0);
        assert_eq!(rotated.get_pixel(expected_w - 1, expected_h - 1)[3], 0);
        assert_eq!(*rotated.get_pixel(expected_w / 2, expected_h / 2), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_transform_never_empty() {
        let image = RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 255]));
        let out = AffineTransformer::transform(&image, 0.0001, 45.0);
        assert!(out.width() >= 1 && out.height() >= 1);
    }
}
