//! Face engine seam: locate faces in an image and encode one of them.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and encoding provider.
///
/// `locate` returns faces ordered most confident first. Callers that only
/// handle one subject take the first entry.
pub trait FaceEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;
    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, EngineError>;
}

/// SCRFD detection plus ArcFace encoding.
pub struct OnnxFaceEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEngine {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path, confidence_threshold: f32) -> Result<Self, EngineError> {
        let scrfd = model_dir.join("det_10g.onnx");
        let arcface = model_dir.join("w600k_r50.onnx");

        let detector = FaceDetector::load(&scrfd.to_string_lossy(), confidence_threshold)?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;
        tracing::info!(dir = %model_dir.display(), "face engine ready");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, EngineError> {
        Ok(self.recognizer.encode(image, face)?)
    }
}
