use image::{DynamicImage, RgbImage, RgbaImage};
use std::fmt;

/// Which engine input an image buffer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Person,
    Garment,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Person => write!(f, "person"),
            ImageRole::Garment => write!(f, "garment"),
        }
    }
}

/// Decode encoded bytes (PNG, JPEG, ...) into a pixel buffer
pub fn decode(bytes: &[u8], role: ImageRole) -> Result<DynamicImage, crate::Error> {
    image::load_from_memory(bytes).map_err(|source| crate::Error::Decode { role, source })
}

/// Base image as opaque RGB. Any alpha channel is dropped.
pub fn to_rgb(image: &DynamicImage) -> RgbImage {
    image.to_rgb8()
}

/// Garment as RGBA. Images without alpha get a fully opaque channel.
pub fn ensure_rgba(image: &DynamicImage) -> RgbaImage {
    match image {
        DynamicImage::ImageRgba8(rgba) => rgba.clone(),
        other => {
            if !other.color().has_alpha() {
                log::debug!("Garment has no alpha channel, synthesizing opaque alpha");
            }
            other.to_rgba8()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn test_ensure_rgba_synthesizes_opaque_alpha() {
        let rgb = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let rgba = ensure_rgba(&DynamicImage::ImageRgb8(rgb));

        assert_eq!(rgba.dimensions(), (4, 3));
        assert!(rgba.pixels().all(|p| *p == Rgba([10, 20, 30, 255])));
    }

    #[test]
    fn test_ensure_rgba_keeps_existing_alpha() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 40]));
        let out = ensure_rgba(&DynamicImage::ImageRgba8(rgba.clone()));
        assert_eq!(out, rgba);
    }

    #[test]
    fn test_decode_garbage_reports_role() {
        let err = decode(b"definitely not an image", ImageRole::Garment).unwrap_err();
        match err {
            crate::Error::Decode { role, .. } => assert_eq!(role, ImageRole::Garment),
            other => panic!("unexpected error: {}", other),
        }
    }
}
