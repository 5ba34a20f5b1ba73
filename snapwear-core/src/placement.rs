use crate::config::{
    Config, PlacementConfig, RegionFit, MAX_VERTICAL_OFFSET_RATIO, MAX_WIDTH_FACTOR,
};
use crate::pose::{Keypoint, Pose, Shoulders};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Fraction of the garment height that sits above the anchor point when
/// placing from shoulders. Keeps the collar above the shoulder line.
///
/// Empirically tuned; recalibrate against measured try-on results before
/// changing.
pub const COLLAR_LIFT_DIVISOR: i64 = 3;

/// Garment category, which decides how wide and how low it sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyRegion {
    #[default]
    UpperBody,
    LowerBody,
    Dresses,
}

impl BodyRegion {
    /// Map free text ("Upper body", "lower", "Dresses", ...) to a region.
    /// Matching is a case-insensitive prefix check; anything unrecognized
    /// gets the generic policy shared with dresses.
    pub fn from_hint(hint: &str) -> Self {
        let hint = hint.trim().to_ascii_lowercase();
        if hint.starts_with("upper") {
            BodyRegion::UpperBody
        } else if hint.starts_with("lower") {
            BodyRegion::LowerBody
        } else {
            BodyRegion::Dresses
        }
    }
}

impl FromStr for BodyRegion {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_hint(s))
    }
}

impl fmt::Display for BodyRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyRegion::UpperBody => write!(f, "Upper body"),
            BodyRegion::LowerBody => write!(f, "Lower body"),
            BodyRegion::Dresses => write!(f, "Dresses"),
        }
    }
}

/// Which point of the transformed garment lands on the anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pivot {
    /// Horizontal center, one third down from the top
    UpperThird,
    /// Horizontal center of the top edge
    TopCenter,
}

/// Garment transform decided for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementTransform {
    pub scale_factor: f32,
    /// Positive values rotate clockwise in image coordinates
    pub rotation_degrees: f32,
    pub anchor_x: i64,
    pub anchor_y: i64,
    pub pivot: Pivot,
    /// Garment size after scaling, before rotation
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub used_fallback: bool,
}

impl PlacementTransform {
    /// Top-left position for a transformed garment of the given size
    pub fn top_left(&self, width: u32, height: u32) -> (i64, i64) {
        let (ax, ay) = (self.anchor_x, self.anchor_y);
        let (w, h) = (width as i64, height as i64);
        match self.pivot {
            Pivot::UpperThird => (ax - w / 2, ay - h / COLLAR_LIFT_DIVISOR),
            Pivot::TopCenter => (ax - w / 2, ay),
        }
    }
}

/// Size of a `width`x`height` buffer scaled by `scale`, never below 1x1
pub fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = (width as f32 * scale) as u32;
    let h = (height as f32 * scale) as u32;
    (w.max(1), h.max(1))
}

/// Decides scale, rotation and anchor for a garment
#[derive(Debug, Clone)]
pub struct PlacementPlanner {
    config: PlacementConfig,
    confidence_threshold: f32,
}

impl PlacementPlanner {
    pub fn new(config: PlacementConfig, confidence_threshold: f32) -> Self {
        Self {
            config,
            confidence_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.placement.clone(), config.pose.confidence_threshold)
    }

    /// Plan the garment transform.
    ///
    /// Uses the shoulder line when both shoulders clear the confidence
    /// threshold and lie inside the base image, otherwise the center-top
    /// fallback. Never fails.
    pub fn plan(
        &self,
        pose: Option<&Pose>,
        region: BodyRegion,
        garment_size: (u32, u32),
        base_size: (u32, u32),
    ) -> PlacementTransform {
        match self.usable_shoulders(pose, base_size) {
            Some(shoulders) => self.plan_from_shoulders(shoulders, region, garment_size),
            None => self.plan_fallback(garment_size, base_size),
        }
    }

    fn usable_shoulders(&self, pose: Option<&Pose>, base_size: (u32, u32)) -> Option<Shoulders> {
        let shoulders = pose?.shoulders()?;
        let threshold = self.confidence_threshold;
        if shoulders.right.confidence < threshold || shoulders.left.confidence < threshold {
            log::debug!(
                "Shoulder confidence too low (right={:.2}, left={:.2}, threshold={:.2})",
                shoulders.right.confidence,
                shoulders.left.confidence,
                threshold
            );
            return None;
        }

        if !inside(&shoulders.right, base_size) || !inside(&shoulders.left, base_size) {
            log::debug!(
                "Shoulders outside {}x{} image (right=({}, {}), left=({}, {}))",
                base_size.0,
                base_size.1,
                shoulders.right.x,
                shoulders.right.y,
                shoulders.left.x,
                shoulders.left.y
            );
            return None;
        }

        Some(shoulders)
    }

    fn region_fit(&self, region: BodyRegion) -> RegionFit {
        let fit = match region {
            BodyRegion::UpperBody => self.config.upper_body,
            BodyRegion::LowerBody => self.config.lower_body,
            BodyRegion::Dresses => self.config.dresses,
        };
        RegionFit {
            width_factor: fit.width_factor.min(MAX_WIDTH_FACTOR),
            vertical_offset_ratio: fit
                .vertical_offset_ratio
                .clamp(-MAX_VERTICAL_OFFSET_RATIO, MAX_VERTICAL_OFFSET_RATIO),
        }
    }

    fn plan_from_shoulders(
        &self,
        shoulders: Shoulders,
        region: BodyRegion,
        (garment_width, garment_height): (u32, u32),
    ) -> PlacementTransform {
        let Shoulders { right, left } = shoulders;
        let (rx, ry) = (right.x as i64, right.y as i64);
        let (lx, ly) = (left.x as i64, left.y as i64);

        let dx = (lx - rx) as f32;
        let dy = (ly - ry) as f32;
        let dist = dx.hypot(dy).max(1.0);
        let angle = dy.atan2(dx).to_degrees();

        let fit = self.region_fit(region);
        let target_width = ((fit.width_factor * dist) as i64).max(1);
        let scale_factor = target_width as f32 / garment_width.max(1) as f32;
        let (scaled_width, scaled_height) =
            scaled_size(garment_width, garment_height, scale_factor);

        let mid_x = (rx + lx) / 2;
        let mid_y = (ry + ly) / 2;
        let y_offset = (fit.vertical_offset_ratio * scaled_height as f32) as i64;

        log::debug!(
            "Shoulder placement: dist={:.1}, angle={:.2}°, scale={:.3}, region={}",
            dist,
            angle,
            scale_factor,
            region
        );

        PlacementTransform {
            scale_factor,
            rotation_degrees: angle,
            anchor_x: mid_x,
            anchor_y: mid_y + y_offset,
            pivot: Pivot::UpperThird,
            scaled_width,
            scaled_height,
            used_fallback: false,
        }
    }

    fn plan_fallback(
        &self,
        (garment_width, garment_height): (u32, u32),
        (base_width, base_height): (u32, u32),
    ) -> PlacementTransform {
        let width_ratio = self.config.fallback_width_ratio.clamp(0.0, 1.0);
        let target_width = ((base_width as f32 * width_ratio) as u32).max(1);
        let scale_factor = target_width as f32 / garment_width.max(1) as f32;
        let (scaled_width, scaled_height) =
            scaled_size(garment_width, garment_height, scale_factor);

        log::debug!(
            "Fallback placement: target width {}px, scale={:.3}",
            target_width,
            scale_factor
        );

        // Anchor chosen so the top-left lands on (W - w) / 2
        let left = (base_width as i64 - scaled_width as i64).div_euclid(2);
        let top_ratio = self.config.fallback_top_ratio.clamp(0.0, 1.0);

        PlacementTransform {
            scale_factor,
            rotation_degrees: 0.0,
            anchor_x: left + scaled_width as i64 / 2,
            anchor_y: (base_height as f32 * top_ratio) as i64,
            pivot: Pivot::TopCenter,
            scaled_width,
            scaled_height,
            used_fallback: true,
        }
    }
}

fn inside(keypoint: &Keypoint, (width, height): (u32, u32)) -> bool {
    (0..width as i64).contains(&(keypoint.x as i64))
        && (0..height as i64).contains(&(keypoint.y as i64))
}

impl Default for PlacementPlanner {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
