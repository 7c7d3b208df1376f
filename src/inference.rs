// Face detection, landmark and expression inference

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, error, warn};

use crate::config::ModelsConfig;
use crate::error::{MoodMirrorError, Result};
use crate::models::{BoundingBox, Detection, ExpressionScores, Frame, Point};

/// Classifier output order (HSEmotion 8-class head)
pub const EXPRESSION_LABELS: [&str; 8] = [
    "angry",
    "disgusted",
    "fearful",
    "happy",
    "sad",
    "surprised",
    "neutral",
    "contempt",
];

const LANDMARK_INPUT: usize = 112;
const LANDMARK_POINTS: usize = 68;
const EXPRESSION_INPUT: usize = 260;

/// Anything that can turn a frame into face detections.
///
/// Implementations block; callers run them off the async executor.
pub trait FaceModel: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Face detector using OpenCV Haar Cascade
pub struct FaceDetector {
    classifier: Mutex<CascadeClassifier>,
}

impl FaceDetector {
    /// Loads the Haar Cascade classifier
    pub fn new(cascade_path: &Path) -> Result<Self> {
        let path = cascade_path.to_string_lossy();
        let classifier = CascadeClassifier::new(&path).map_err(|e| {
            error!("Failed to load Haar Cascade: {}", e);
            MoodMirrorError::ModelLoad(format!("Haar Cascade load failed: {e}"))
        })?;

        if classifier.empty()? {
            return Err(MoodMirrorError::ModelLoad(format!(
                "Haar Cascade classifier is empty: {path}"
            )));
        }

        Ok(Self {
            classifier: Mutex::new(classifier),
        })
    }

    /// Detects faces and returns their rectangles with the grayscale frame
    fn detect_faces(&self, frame: &Frame) -> Result<(Mat, Vec<Rect>)> {
        let mat = Mat::from_slice(&frame.data).map_err(|e| {
            MoodMirrorError::FaceDetection(format!("Failed to create Mat: {e}"))
        })?;

        let mat = mat.reshape(3, frame.height as i32).map_err(|e| {
            MoodMirrorError::FaceDetection(format!("Failed to reshape Mat: {e}"))
        })?;

        let mut gray = Mat::default();
        imgproc::cvt_color_def(&mat, &mut gray, imgproc::COLOR_RGB2GRAY).map_err(|e| {
            MoodMirrorError::FaceDetection(format!("Failed to convert to grayscale: {e}"))
        })?;

        let mut faces = Vector::<Rect>::new();
        let mut classifier = self
            .classifier
            .lock()
            .map_err(|_| MoodMirrorError::FaceDetection("Classifier lock poisoned".to_string()))?;
        classifier
            .detect_multi_scale(
                &gray,
                &mut faces,
                1.1,               // scale factor
                5,                 // min neighbors
                0,                 // flags
                Size::new(40, 40), // min size
                Size::new(0, 0),   // no max size
            )
            .map_err(|e| MoodMirrorError::FaceDetection(format!("Face detection failed: {e}")))?;

        Ok((gray, faces.to_vec()))
    }
}

/// Crops a face from the grayscale frame and turns it into a normalised
/// `[1, 3, side, side]` RGB tensor.
fn face_tensor(gray: &Mat, rect: Rect, side: usize) -> Result<Array4<f32>> {
    let face_roi = Mat::roi(gray, rect).map_err(|e| {
        MoodMirrorError::FrameProcessing(format!("Failed to crop face region: {e}"))
    })?;

    // Clone the ROI so the crop is continuous in memory
    let face = face_roi.try_clone().map_err(|e| {
        MoodMirrorError::FrameProcessing(format!("Failed to clone face ROI: {e}"))
    })?;

    let mut rgb = Mat::default();
    imgproc::cvt_color_def(&face, &mut rgb, imgproc::COLOR_GRAY2RGB).map_err(|e| {
        MoodMirrorError::FrameProcessing(format!("Failed to convert to RGB: {e}"))
    })?;

    let mut resized = Mat::default();
    imgproc::resize(
        &rgb,
        &mut resized,
        Size::new(side as i32, side as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(|e| MoodMirrorError::FrameProcessing(format!("Failed to resize face: {e}")))?;

    let data = resized.data_bytes().map_err(|e| {
        MoodMirrorError::FrameProcessing(format!("Failed to get resized data: {e}"))
    })?;

    // HWC bytes -> CHW floats in [0, 1]
    let mut chw = vec![0.0f32; 3 * side * side];
    for h in 0..side {
        for w in 0..side {
            for c in 0..3 {
                let hwc_idx = (h * side + w) * 3 + c;
                let chw_idx = c * (side * side) + h * side + w;
                chw[chw_idx] = data[hwc_idx] as f32 / 255.0;
            }
        }
    }

    Array4::from_shape_vec((1, 3, side, side), chw)
        .map_err(|e| MoodMirrorError::Inference(format!("Failed to create input array: {e}")))
}

fn load_session(path: &Path) -> Result<Session> {
    Session::builder()
        .map_err(|e| MoodMirrorError::ModelLoad(format!("Failed to create session builder: {e}")))?
        .commit_from_file(path)
        .map_err(|e| {
            error!("Failed to load ONNX model {}: {}", path.display(), e);
            MoodMirrorError::ModelLoad(format!("ONNX model load failed ({}): {e}", path.display()))
        })
}

/// Runs a single-input session and returns the first output as a flat slice
fn run_first_output(session: &Mutex<Session>, input: Array4<f32>) -> Result<Vec<f32>> {
    let input_tensor = Value::from_array(input).map_err(|e| {
        MoodMirrorError::OnnxRuntime(format!("Failed to create input tensor: {e}"))
    })?;

    let mut session = session
        .lock()
        .map_err(|_| MoodMirrorError::Inference("Session lock poisoned".to_string()))?;
    let outputs = session.run(ort::inputs![input_tensor]).map_err(|e| {
        error!("ONNX inference failed: {}", e);
        MoodMirrorError::OnnxRuntime(format!("Inference failed: {e}"))
    })?;

    let (_, output_value) = outputs
        .iter()
        .next()
        .ok_or_else(|| MoodMirrorError::OnnxRuntime("No output from model".to_string()))?;

    let (_, data) = output_value.try_extract_tensor::<f32>().map_err(|e| {
        MoodMirrorError::OnnxRuntime(format!("Failed to extract output tensor: {e}"))
    })?;

    Ok(data.to_vec())
}

/// 68-point landmark regressor (outputs coordinates relative to the crop)
pub struct LandmarkPredictor {
    session: Mutex<Session>,
}

impl LandmarkPredictor {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(load_session(model_path)?),
        })
    }

    /// Predicts landmarks for one face, in frame coordinates
    pub fn predict(&self, gray: &Mat, rect: Rect) -> Result<Vec<Point>> {
        let input = face_tensor(gray, rect, LANDMARK_INPUT)?;
        let raw = run_first_output(&self.session, input)?;
        Ok(landmarks_from_output(&raw, rect))
    }
}

/// Maps crop-relative `[x0, y0, x1, y1, ...]` into frame coordinates
fn landmarks_from_output(raw: &[f32], rect: Rect) -> Vec<Point> {
    if raw.len() < LANDMARK_POINTS * 2 {
        warn!(
            "Landmark model returned {} values, expected {}",
            raw.len(),
            LANDMARK_POINTS * 2
        );
    }
    raw.chunks_exact(2)
        .take(LANDMARK_POINTS)
        .map(|xy| {
            Point::new(
                rect.x as f32 + xy[0] * rect.width as f32,
                rect.y as f32 + xy[1] * rect.height as f32,
            )
        })
        .collect()
}

/// Expression classifier using ONNX Runtime
pub struct ExpressionClassifier {
    session: Mutex<Session>,
}

impl ExpressionClassifier {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(load_session(model_path)?),
        })
    }

    /// Full probability distribution for one face
    pub fn classify(&self, gray: &Mat, rect: Rect) -> Result<ExpressionScores> {
        let input = face_tensor(gray, rect, EXPRESSION_INPUT)?;
        let logits = run_first_output(&self.session, input)?;
        Ok(scores_from_logits(&logits))
    }
}

/// Softmax over the logits, labelled in classifier order
fn scores_from_logits(logits: &[f32]) -> ExpressionScores {
    if logits.len() != EXPRESSION_LABELS.len() {
        warn!(
            "Expression model returned {} logits, expected {}",
            logits.len(),
            EXPRESSION_LABELS.len()
        );
    }
    let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();

    EXPRESSION_LABELS
        .iter()
        .zip(logits)
        .map(|(label, &x)| (*label, (x - max_logit).exp() / exp_sum))
        .collect()
}

/// Detector, landmark predictor and expression classifier together
pub struct OnnxFaceModel {
    detector: FaceDetector,
    landmarks: LandmarkPredictor,
    classifier: ExpressionClassifier,
}

impl OnnxFaceModel {
    /// Loads all three artifacts named in the models configuration
    pub fn load(config: &ModelsConfig) -> Result<Self> {
        let detector_path = require_artifact(&config.detector_path())?;
        let landmarks_path = require_artifact(&config.landmarks_path())?;
        let expressions_path = require_artifact(&config.expressions_path())?;

        Ok(Self {
            detector: FaceDetector::new(&detector_path)?,
            landmarks: LandmarkPredictor::new(&landmarks_path)?,
            classifier: ExpressionClassifier::new(&expressions_path)?,
        })
    }
}

fn require_artifact(path: &Path) -> Result<std::path::PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(MoodMirrorError::ModelLoad(format!(
            "Model artifact not found: {}",
            path.display()
        )))
    }
}

impl FaceModel for OnnxFaceModel {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let (gray, faces) = self.detector.detect_faces(frame)?;
        debug!("Detected {} face(s)", faces.len());

        let mut detections = Vec::with_capacity(faces.len());
        for rect in faces {
            let landmarks = match self.landmarks.predict(&gray, rect) {
                Ok(points) => points,
                Err(e) => {
                    warn!("Landmark prediction failed: {}", e);
                    Vec::new()
                }
            };
            let expressions = self.classifier.classify(&gray, rect)?;
            detections.push(Detection::new(
                BoundingBox::new(
                    rect.x as f32,
                    rect.y as f32,
                    rect.width as f32,
                    rect.height as f32,
                ),
                landmarks,
                expressions,
            ));
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_keeps_label_order() {
        let scores = scores_from_logits(&[0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0]);
        let labels: Vec<_> = scores.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, EXPRESSION_LABELS);
        assert_eq!(scores.dominant().map(|(l, _)| l), Some("happy"));

        let total: f32 = scores.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn landmarks_map_into_frame() {
        let rect = Rect::new(100, 50, 200, 100);
        let raw: Vec<f32> = (0..LANDMARK_POINTS).flat_map(|_| [0.5, 1.0]).collect();
        let points = landmarks_from_output(&raw, rect);
        assert_eq!(points.len(), LANDMARK_POINTS);
        assert_eq!(points[0], Point::new(200.0, 150.0));
    }

    #[test]
    fn missing_artifact_names_the_file() {
        let config = ModelsConfig {
            dir: std::path::PathBuf::from("/definitely/not/here"),
            ..ModelsConfig::default()
        };
        let err = match OnnxFaceModel::load(&config) {
            Err(e) => e,
            Ok(_) => panic!("load should fail"),
        };
        assert!(err.to_string().contains("haarcascade_frontalface_default.xml"));
    }
}
