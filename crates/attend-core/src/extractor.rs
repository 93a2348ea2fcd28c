//! Embedding extraction: image bytes in, one face encoding out.
//!
//! Detection failures keep their reason as an [`ExtractFailure`]; callers
//! that only need "face or no face" use [`Extractor::extract_encoding`].

use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
}

/// Why an image produced no encoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractFailure {
    #[error("no face detected")]
    NoFace,
    #[error("found {count} faces, expected exactly one")]
    MultipleFaces { count: usize },
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("face model failed: {0}")]
    Model(String),
}

/// Detection + encoding backend.
///
/// Images handed to the backend are always packed 8-bit RGB.
pub trait FaceEmbedder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedderError>;
    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, EmbedderError>;
}

/// SCRFD detector (ONNX Runtime) + dlib face encoder.
pub struct ModelEmbedder {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl ModelEmbedder {
    /// Load the detector and encoder models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let encoder = FaceEncoder::load(model_dir)?;
        Ok(Self { detector, encoder })
    }
}

impl FaceEmbedder for ModelEmbedder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedderError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, EmbedderError> {
        Ok(self.encoder.encode(image, face)?)
    }
}

/// Turns encoded image bytes into a single face encoding.
pub struct Extractor<E> {
    embedder: E,
}

impl<E: FaceEmbedder> Extractor<E> {
    pub fn new(embedder: E) -> Self {
        Self { embedder }
    }

    /// Decode `image_bytes` (JPEG, PNG, ...) and encode its only face.
    pub fn extract(&mut self, image_bytes: &[u8]) -> Result<Encoding, ExtractFailure> {
        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractFailure::Decode(e.to_string()))?;
        // The models consume RGB planes; normalize whatever the container held.
        let rgb = decoded.to_rgb8();
        self.extract_rgb(&rgb)
    }

    /// Encode the only face of an already-decoded RGB image.
    pub fn extract_rgb(&mut self, image: &RgbImage) -> Result<Encoding, ExtractFailure> {
        let faces = self
            .embedder
            .detect(image)
            .map_err(|e| ExtractFailure::Model(e.to_string()))?;

        let face = match faces.as_slice() {
            [face] => face,
            [] => return Err(ExtractFailure::NoFace),
            many => return Err(ExtractFailure::MultipleFaces { count: many.len() }),
        };

        tracing::debug!(
            confidence = face.confidence,
            width = image.width(),
            height = image.height(),
            "single face detected"
        );

        self.embedder
            .embed(image, face)
            .map_err(|e| ExtractFailure::Model(e.to_string()))
    }

    /// Simplified signal: the encoding, or `None` for any failure.
    pub fn extract_encoding(&mut self, image_bytes: &[u8]) -> Option<Encoding> {
        match self.extract(image_bytes) {
            Ok(encoding) => Some(encoding),
            Err(reason) => {
                tracing::info!(%reason, "no usable face encoding");
                None
            }
        }
    }

    /// Run detection only (used for preview overlays).
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedderError> {
        self.embedder.detect(image)
    }
}
