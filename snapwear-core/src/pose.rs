use crate::config::PoseConfig;
use crate::runtime::OnnxRuntime;
use image::{imageops, RgbImage};
use ndarray::{ArrayView3, Axis};
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("Pose model unavailable")]
    Unavailable,
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Number of body parts in the COCO/OpenPose label set
pub const NUM_PARTS: usize = 18;

/// Anatomical labels in heatmap channel order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Nose,
    Neck,
    RightShoulder,
    RightElbow,
    RightWrist,
    LeftShoulder,
    LeftElbow,
    LeftWrist,
    RightHip,
    RightKnee,
    RightAnkle,
    LeftHip,
    LeftKnee,
    LeftAnkle,
    RightEye,
    LeftEye,
    RightEar,
    LeftEar,
}

impl BodyPart {
    pub const ALL: [BodyPart; NUM_PARTS] = [
        BodyPart::Nose,
        BodyPart::Neck,
        BodyPart::RightShoulder,
        BodyPart::RightElbow,
        BodyPart::RightWrist,
        BodyPart::LeftShoulder,
        BodyPart::LeftElbow,
        BodyPart::LeftWrist,
        BodyPart::RightHip,
        BodyPart::RightKnee,
        BodyPart::RightAnkle,
        BodyPart::LeftHip,
        BodyPart::LeftKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightEye,
        BodyPart::LeftEye,
        BodyPart::RightEar,
        BodyPart::LeftEar,
    ];

    /// Heatmap channel index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A labeled point in base-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: i32,
    pub y: i32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: i32, y: i32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shoulders {
    pub right: Keypoint,
    pub left: Keypoint,
}

/// Keypoints for one image, indexed by `BodyPart`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    keypoints: Vec<Keypoint>,
}

impl Pose {
    /// Keypoints in `BodyPart::ALL` order. Shorter lists are allowed but
    /// parts past the end read as missing.
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// Build a full 18-part pose; parts not listed get zero confidence
    pub fn from_parts<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (BodyPart, Keypoint)>,
    {
        let mut keypoints = vec![Keypoint::new(0, 0, 0.0); NUM_PARTS];
        for (part, keypoint) in parts {
            keypoints[part.index()] = keypoint;
        }
        Self { keypoints }
    }

    pub fn get(&self, part: BodyPart) -> Option<&Keypoint> {
        self.keypoints.get(part.index())
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn shoulders(&self) -> Option<Shoulders> {
        Some(Shoulders {
            right: *self.get(BodyPart::RightShoulder)?,
            left: *self.get(BodyPart::LeftShoulder)?,
        })
    }
}

/// Supplies body keypoints for a base image.
///
/// Implementations never fail: an unconfigured or broken estimator returns
/// `None`, and an ambiguous image returns low-confidence keypoints.
pub trait KeypointSource: Send + Sync {
    fn infer(&self, image: &RgbImage) -> Option<Pose>;
}

/// Disabled source
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPoseEstimator;

impl KeypointSource for NoPoseEstimator {
    fn infer(&self, _image: &RgbImage) -> Option<Pose> {
        None
    }
}

/// Returns the same pose for every image
#[derive(Debug, Clone)]
pub struct FixedKeypoints(pub Pose);

impl KeypointSource for FixedKeypoints {
    fn infer(&self, _image: &RgbImage) -> Option<Pose> {
        Some(self.0.clone())
    }
}

/// OpenPose-style heatmap network run through ONNX Runtime.
///
/// The session is loaded on first use. `Session::run` needs exclusive
/// access, so inference calls are serialized by a mutex while the rest of
/// the pipeline stays concurrent.
pub struct PoseEstimator {
    model_path: PathBuf,
    input_width: u32,
    input_height: u32,
    runtime: OnnxRuntime,
    session: OnceCell<Option<Mutex<Session>>>,
}

impl PoseEstimator {
    pub fn new<P: AsRef<Path>>(model_path: P, config: &PoseConfig) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            input_width: config.input_width,
            input_height: config.input_height,
            runtime: OnnxRuntime::new(),
            session: OnceCell::new(),
        }
    }

    fn session(&self) -> Option<&Mutex<Session>> {
        self.session
            .get_or_init(|| {
                log::info!("Loading pose model...");
                match self.runtime.create_session(&self.model_path) {
                    Ok(session) => Some(Mutex::new(session)),
                    Err(e) => {
                        log::warn!("Pose model unavailable, placement will use fallback: {}", e);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Run the network and decode one keypoint per body part
    pub fn estimate(&self, image: &RgbImage) -> Result<Pose, PoseError> {
        let session = self.session().ok_or(PoseError::Unavailable)?;

        let start = std::time::Instant::now();
        let input_tensor = self.preprocess(image);
        let input_value = Value::from_array(input_tensor)
            .map_err(|e| PoseError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = session
            .lock()
            .map_err(|_| PoseError::Inference("pose session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PoseError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PoseError::Inference(format!("Failed to extract heatmaps: {}", e)))?;

        let pose = decode_heatmaps(shape, data, image.width(), image.height())?;
        log::debug!("Pose inference: {}ms", start.elapsed().as_millis());
        Ok(pose)
    }

    /// Resize to the network input, NCHW, BGR order, scaled to [0, 1]
    fn preprocess(&self, image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let (width, height) = (self.input_width, self.input_height);
        let resized = imageops::resize(image, width, height, imageops::FilterType::Triangle);

        let mut input_data = Vec::with_capacity((width * height * 3) as usize);
        for c in [2usize, 1, 0] {
            for y in 0..height {
                for x in 0..width {
                    input_data.push(resized.get_pixel(x, y)[c] as f32 / 255.0);
                }
            }
        }

        ([1, 3, height as usize, width as usize], input_data)
    }
}

impl KeypointSource for PoseEstimator {
    fn infer(&self, image: &RgbImage) -> Option<Pose> {
        match self.estimate(image) {
            Ok(pose) => Some(pose),
            Err(PoseError::Unavailable) => None,
            Err(e) => {
                log::warn!("Pose estimation failed, using fallback placement: {}", e);
                None
            }
        }
    }
}

/// Build the keypoint source described by the configuration
pub fn from_config(config: &PoseConfig) -> Box<dyn KeypointSource> {
    match &config.model_path {
        Some(path) => Box::new(PoseEstimator::new(path, config)),
        None => {
            log::debug!("No pose model configured");
            Box::new(NoPoseEstimator)
        }
    }
}

/// Take the peak of each part heatmap and map it back to image pixels.
///
/// `shape` is `[1, C, h, w]` with `C >= NUM_PARTS`; extra channels (PAFs,
/// background) are ignored.
fn decode_heatmaps(
    shape: &[i64],
    data: &[f32],
    image_width: u32,
    image_height: u32,
) -> Result<Pose, PoseError> {
    if shape.len() != 4 {
        return Err(PoseError::UnexpectedOutput(format!(
            "expected 4-D heatmaps, got shape {:?}",
            shape
        )));
    }

    let channels = shape[1].max(0) as usize;
    let out_h = shape[2].max(0) as usize;
    let out_w = shape[3].max(0) as usize;
    if channels < NUM_PARTS || out_h == 0 || out_w == 0 {
        return Err(PoseError::UnexpectedOutput(format!(
            "heatmap shape {:?} has fewer than {} parts",
            shape, NUM_PARTS
        )));
    }

    let len = channels * out_h * out_w;
    if data.len() < len {
        return Err(PoseError::UnexpectedOutput(format!(
            "heatmap data has {} values, expected {}",
            data.len(),
            len
        )));
    }

    let heatmaps = ArrayView3::from_shape((channels, out_h, out_w), &data[..len])
        .map_err(|e| PoseError::UnexpectedOutput(e.to_string()))?;

    let keypoints = BodyPart::ALL
        .iter()
        .map(|part| {
            let heat = heatmaps.index_axis(Axis(0), part.index());
            let ((py, px), confidence) = heat.indexed_iter().fold(
                ((0, 0), f32::NEG_INFINITY),
                |best, (pos, &value)| if value > best.1 { (pos, value) } else { best },
            );
            let x = (image_width as u64 * px as u64 / out_w as u64) as i32;
            let y = (image_height as u64 * py as u64 / out_h as u64) as i32;
            log::trace!("{:?}: ({}, {}) conf={:.3}", part, x, y, confidence);
            Keypoint::new(x, y, confidence)
        })
        .collect();

    Ok(Pose::new(keypoints))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heatmaps_with_peaks(
        channels: usize,
        h: usize,
        w: usize,
        peaks: &[(usize, usize, usize, f32)],
    ) -> Vec<f32> {
        let mut data = vec![0.0; channels * h * w];
        for &(c, y, x, value) in peaks {
            data[c * h * w + y * w + x] = value;
        }
        data
    }

    #[test]
    fn test_body_part_indices_follow_heatmap_order() {
        assert_eq!(BodyPart::RightShoulder.index(), 2);
        assert_eq!(BodyPart::LeftShoulder.index(), 5);
        assert_eq!(BodyPart::ALL.len(), NUM_PARTS);
        for (i, part) in BodyPart::ALL.iter().enumerate() {
            assert_eq!(part.index(), i);
        }
    }

    #[test]
    fn test_pose_from_parts_fills_missing_with_zero_confidence() {
        let pose = Pose::from_parts([(BodyPart::LeftShoulder, Keypoint::new(500, 210, 0.9))]);
        assert_eq!(pose.keypoints().len(), NUM_PARTS);
        assert_eq!(pose.get(BodyPart::Nose).unwrap().confidence, 0.0);

        let shoulders = pose.shoulders().unwrap();
        assert_eq!(shoulders.left, Keypoint::new(500, 210, 0.9));
        assert_eq!(shoulders.right.confidence, 0.0);
    }

    #[test]
    fn test_short_pose_has_no_shoulders() {
        let pose = Pose::new(vec![Keypoint::new(1, 1, 1.0); 3]);
        assert!(pose.shoulders().is_none());
    }

    #[test]
    fn test_decode_heatmaps_scales_peaks_to_image() {
        // 19 channels (18 parts + background), 46x46 grid, image 800x600
        let (c, h, w) = (19, 46, 46);
        let data = heatmaps_with_peaks(
            c,
            h,
            w,
            &[
                (BodyPart::RightShoulder.index(), 15, 17, 0.8),
                (BodyPart::LeftShoulder.index(), 16, 28, 0.6),
            ],
        );

        let pose = decode_heatmaps(&[1, c as i64, h as i64, w as i64], &data, 800, 600).unwrap();
        let shoulders = pose.shoulders().unwrap();

        assert_eq!(shoulders.right.x, 800 * 17 / 46);
        assert_eq!(shoulders.right.y, 600 * 15 / 46);
        assert!((shoulders.right.confidence - 0.8).abs() < 1e-6);
        assert_eq!(shoulders.left.x, 800 * 28 / 46);
        assert!((shoulders.left.confidence - 0.6).abs() < 1e-6);
        assert_eq!(pose.keypoints().len(), NUM_PARTS);
    }

    #[test]
    fn test_decode_heatmaps_rejects_too_few_channels() {
        let data = vec![0.0; 10 * 4 * 4];
        let result = decode_heatmaps(&[1, 10, 4, 4], &data, 100, 100);
        assert!(matches!(result, Err(PoseError::UnexpectedOutput(_))));
    }

    #[test]
    fn test_missing_model_yields_no_keypoints() {
        let config = PoseConfig::default();
        let estimator = PoseEstimator::new("models/does-not-exist.onnx", &config);
        let image = RgbImage::new(32, 32);

        assert!(estimator.infer(&image).is_none());
        // Second call reuses the remembered failure
        assert!(matches!(estimator.estimate(&image), Err(PoseError::Unavailable)));
    }

    #[test]
    fn test_from_config_without_model_is_disabled() {
        let source = from_config(&PoseConfig::default());
        assert!(source.infer(&RgbImage::new(8, 8)).is_none());
    }

    #[test]
    #[ignore] // Requires model file
    fn test_pose_estimation() {
        let config = PoseConfig::default();
        let estimator = PoseEstimator::new("models/openpose_coco.onnx", &config);
        let image = RgbImage::new(368, 368);
        let pose = estimator.estimate(&image).unwrap();
        assert_eq!(pose.keypoints().len(), NUM_PARTS);
    }
}
