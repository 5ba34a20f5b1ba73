pub mod buffer;
pub mod composite;
pub mod config;
pub mod placement;
pub mod pose;
pub mod runtime;
pub mod warp;

pub use buffer::ImageRole;
pub use placement::{BodyRegion, PlacementPlanner, PlacementTransform};
pub use pose::{BodyPart, Keypoint, KeypointSource, Pose};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to decode {role} image: {source}")]
    Decode {
        role: ImageRole,
        source: image::ImageError,
    },
    #[error("Invalid garment: {width}x{height} after normalization")]
    InvalidGarment { width: u32, height: u32 },
    #[error("{0}")]
    Other(String),
}

/// Result of one try-on
#[derive(Debug, Clone)]
pub struct TryOnOutput {
    /// Composited image, same size as the person image
    pub image: RgbImage,
    pub placement: PlacementTransform,
    /// Keypoints the placement was planned from, if any
    pub pose: Option<Pose>,
    /// Where the transformed garment's top-left corner landed
    pub top_left: (i64, i64),
    /// Transformed garment size (after scale and rotation)
    pub garment_size: (u32, u32),
}

/// Garment placement and compositing pipeline.
///
/// Stateless per call; the keypoint source is the only shared component and
/// is safe to use from several threads at once.
pub struct TryOnEngine {
    config: config::Config,
    planner: PlacementPlanner,
    keypoints: Box<dyn KeypointSource>,
}

impl TryOnEngine {
    /// Create an engine with the keypoint source described by `config`
    pub fn new(config: config::Config) -> Result<Self, Error> {
        config.validate()?;
        let keypoints = pose::from_config(&config.pose);
        Ok(Self::with_source(config, keypoints))
    }

    /// Create an engine around an explicit keypoint source
    pub fn with_source(config: config::Config, keypoints: Box<dyn KeypointSource>) -> Self {
        let planner = PlacementPlanner::from_config(&config);
        Self {
            config,
            planner,
            keypoints,
        }
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Ask the configured source for keypoints
    pub fn keypoints(&self, image: &RgbImage) -> Option<Pose> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }
        self.keypoints.infer(image)
    }

    /// Decode both images and run the pipeline
    pub fn run_bytes(
        &self,
        person: &[u8],
        garment: &[u8],
        region: BodyRegion,
    ) -> Result<TryOnOutput, Error> {
        let person = buffer::decode(person, ImageRole::Person)?;
        let garment = buffer::decode(garment, ImageRole::Garment)?;
        self.run(&person, &garment, region, None)
    }

    /// Place `garment` on `person`.
    ///
    /// Caller-supplied keypoints take precedence over the configured source.
    /// Missing or low-confidence keypoints fall back to center-top placement.
    pub fn run(
        &self,
        person: &DynamicImage,
        garment: &DynamicImage,
        region: BodyRegion,
        pose: Option<Pose>,
    ) -> Result<TryOnOutput, Error> {
        let start = std::time::Instant::now();

        let mut base = buffer::to_rgb(person);
        let garment = buffer::ensure_rgba(garment);
        let (garment_width, garment_height) = garment.dimensions();
        if garment_width == 0 || garment_height == 0 {
            return Err(Error::InvalidGarment {
                width: garment_width,
                height: garment_height,
            });
        }

        let pose = pose.or_else(|| self.keypoints(&base));

        let placement = self.planner.plan(
            pose.as_ref(),
            region,
            (garment_width, garment_height),
            base.dimensions(),
        );

        let transformed = warp::AffineTransformer::transform(
            &garment,
            placement.scale_factor,
            placement.rotation_degrees,
        );
        let garment_size = transformed.dimensions();
        let top_left = placement.top_left(garment_size.0, garment_size.1);

        composite::alpha_overlay(&mut base, &transformed, top_left.0, top_left.1);

        log::debug!(
            "Placed {}x{} garment at ({}, {}) on {}x{} image (fallback={}) in {}ms",
            garment_size.0,
            garment_size.1,
            top_left.0,
            top_left.1,
            base.width(),
            base.height(),
            placement.used_fallback,
            start.elapsed().as_millis()
        );

        Ok(TryOnOutput {
            image: base,
            placement,
            pose,
            top_left,
            garment_size,
        })
    }
}

/// Debug filename with timestamp and process id
pub fn generate_debug_filename(operation: &str) -> String {
    use chrono::Local;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}_{}.png", operation, timestamp, std::process::id())
}

/// Save the composited image with the garment box and shoulder keypoints drawn on
pub fn save_debug_overlay(output: &TryOnOutput, path: &Path) -> Result<(), Error> {
    let debug_img = draw_debug_overlay(output);
    debug_img
        .save(path)
        .map_err(|e| Error::Other(format!("Failed to save debug image: {}", e)))?;

    log::info!("Debug visualization saved to: {}", path.display());
    Ok(())
}

/// Draw the garment box, shoulders and anchor onto a copy of the result
pub fn draw_debug_overlay(output: &TryOnOutput) -> RgbImage {
    let mut debug_img = output.image.clone();
    let to_i32 = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;

    // Garment box in green
    let (x, y) = output.top_left;
    let (w, h) = output.garment_size;
    let rect = Rect::at(to_i32(x), to_i32(y)).of_size(w.max(1), h.max(1));
    draw_hollow_rect_mut(&mut debug_img, rect, Rgb([0, 255, 0]));

    // Shoulders in red
    if let Some(shoulders) = output.pose.as_ref().and_then(Pose::shoulders) {
        let red = Rgb([255, 0, 0]);
        draw_cross_mut(&mut debug_img, red, shoulders.right.x, shoulders.right.y);
        draw_cross_mut(&mut debug_img, red, shoulders.left.x, shoulders.left.y);
    }

    // Anchor in blue
    draw_cross_mut(
        &mut debug_img,
        Rgb([0, 0, 255]),
        to_i32(output.placement.anchor_x),
        to_i32(output.placement.anchor_y),
    );

    debug_img
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use pose::{FixedKeypoints, NoPoseEstimator};

    fn engine(source: Box<dyn KeypointSource>) -> TryOnEngine {
        TryOnEngine::with_source(config::Config::default(), source)
    }

    #[test]
    fn test_rejects_empty_garment() {
        let engine = engine(Box::new(NoPoseEstimator));
        let person = DynamicImage::ImageRgb8(RgbImage::new(20, 20));
        let garment = DynamicImage::ImageRgba8(RgbaImage::new(0, 5));

        let result = engine.run(&person, &garment, BodyRegion::UpperBody, None);
        assert!(matches!(
            result,
            Err(Error::InvalidGarment { width: 0, height: 5 })
        ));
    }

    #[test]
    fn test_run_bytes_reports_undecodable_person() {
        let engine = engine(Box::new(NoPoseEstimator));
        let result = engine.run_bytes(b"nope", b"nope", BodyRegion::UpperBody);
        assert!(matches!(
            result,
            Err(Error::Decode { role: ImageRole::Person, .. })
        ));
    }

    #[test]
    fn test_caller_pose_overrides_source() {
        let source_pose = Pose::from_parts([
            (BodyPart::RightShoulder, Keypoint::new(10, 10, 0.0)),
            (BodyPart::LeftShoulder, Keypoint::new(30, 10, 0.0)),
        ]);
        let caller_pose = Pose::from_parts([
            (BodyPart::RightShoulder, Keypoint::new(30, 40, 0.9)),
            (BodyPart::LeftShoulder, Keypoint::new(70, 40, 0.9)),
        ]);
        let engine = engine(Box::new(FixedKeypoints(source_pose)));
        let person = DynamicImage::ImageRgb8(RgbImage::new(100, 100));
        let garment =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([9, 9, 9, 255])));

        let from_source = engine
            .run(&person, &garment, BodyRegion::UpperBody, None)
            .unwrap();
        assert!(from_source.placement.used_fallback);

        let from_caller = engine
            .run(&person, &garment, BodyRegion::UpperBody, Some(caller_pose))
            .unwrap();
        assert!(!from_caller.placement.used_fallback);
        assert_eq!(from_caller.placement.anchor_x, 50);
    }

    #[test]
    fn test_debug_overlay_keeps_dimensions() {
        let engine = engine(Box::new(NoPoseEstimator));
        let person = DynamicImage::ImageRgb8(RgbImage::new(64, 48));
        let garment =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([200, 0, 0, 255])));
        let output = engine
            .run(&person, &garment, BodyRegion::Dresses, None)
            .unwrap();

        let debug = draw_debug_overlay(&output);
        assert_eq!(debug.dimensions(), (64, 48));
    }

    #[test]
    fn test_run_writes_nothing_to_debug_dir() {
        let debug_dir = std::env::temp_dir().join(format!(
            "snapwear-debug-{}-{}",
            std::process::id(),
            generate_debug_filename("run")
        ));
        let mut config = config::Config::default();
        config.debug.output_dir = debug_dir.clone();
        let engine = TryOnEngine::with_source(config, Box::new(NoPoseEstimator));

        let person = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        let garment = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255])));
        engine
            .run(&person, &garment, BodyRegion::UpperBody, None)
            .unwrap();

        assert!(!debug_dir.exists());
    }

    #[test]
    fn test_debug_overlay_handles_far_anchor() {
        let engine = engine(Box::new(NoPoseEstimator));
        let person = DynamicImage::ImageRgb8(RgbImage::new(16, 16));
        let garment = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let mut output = engine
            .run(&person, &garment, BodyRegion::UpperBody, None)
            .unwrap();
        output.placement.anchor_x = i64::MAX;
        output.top_left = (i64::MIN, 0);

        assert_eq!(draw_debug_overlay(&output).dimensions(), (16, 16));
    }

    #[test]
    fn test_debug_filename_format() {
        let name = generate_debug_filename("tryon");
        assert!(name.starts_with("tryon_"));
        assert!(name.ends_with(".png"));
    }
}
