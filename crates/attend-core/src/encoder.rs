//! Face encoder backed by dlib's ResNet face recognition network.
//!
//! `dlib_face_recognition_resnet_model_v1.dat` (dlib.net/files) maps a face
//! to a 128-d descriptor trained so that two faces of the same person lie
//! less than 0.6 apart in Euclidean distance; dlib reports 99.38% on LFW at
//! that operating point. Descriptors are used as produced, without
//! renormalization, so [`MATCH_THRESHOLD`] applies to them directly.
//!
//! The detector box is handed to dlib's 5-point shape predictor, which places
//! the landmarks the network's face chip is cut from.

use crate::types::{BoundingBox, Encoding};
use dlib_face_recognition::{
    FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix, LandmarkPredictor, LandmarkPredictorTrait,
    Rectangle,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of elements in every descriptor the network produces.
pub const ENCODING_DIM: usize = 128;

/// Euclidean distance below which two descriptors are the same person.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// 5-point landmark predictor inside the model directory.
pub const LANDMARK_MODEL_FILE: &str = "shape_predictor_5_face_landmarks.dat";
/// ResNet descriptor network inside the model directory.
pub const ENCODER_MODEL_FILE: &str = "dlib_face_recognition_resnet_model_v1.dat";

/// Each face is encoded once, without resampled jitter copies.
const ENCODING_JITTERS: u32 = 1;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },
    #[error("face box ({x:.1}, {y:.1}, {width:.1}x{height:.1}) lies outside the image")]
    DegenerateFace {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    #[error("image buffer does not match {width}x{height} RGB")]
    ImageLayout { width: u32, height: u32 },
    #[error("network returned no descriptor")]
    NoDescriptor,
    #[error("expected {ENCODING_DIM}-dim descriptor, got {0}")]
    WrongDimension(usize),
}

/// dlib landmark predictor + descriptor network.
pub struct FaceEncoder {
    predictor: LandmarkPredictor,
    network: FaceEncoderNetwork,
}

impl FaceEncoder {
    /// Load both dlib models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let landmark_path = existing(model_dir.join(LANDMARK_MODEL_FILE))?;
        let encoder_path = existing(model_dir.join(ENCODER_MODEL_FILE))?;

        let predictor =
            LandmarkPredictor::open(&landmark_path).map_err(|message| EncoderError::ModelLoad {
                path: landmark_path.clone(),
                message,
            })?;
        let network =
            FaceEncoderNetwork::open(&encoder_path).map_err(|message| EncoderError::ModelLoad {
                path: encoder_path.clone(),
                message,
            })?;

        tracing::info!(
            landmarks = %landmark_path.display(),
            network = %encoder_path.display(),
            "loaded dlib face encoder"
        );

        Ok(Self { predictor, network })
    }

    /// Encode one detected face of an RGB image.
    pub fn encode(&self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, EncoderError> {
        let rect = face_rect(face, image.width(), image.height()).ok_or(
            EncoderError::DegenerateFace {
                x: face.x,
                y: face.y,
                width: face.width,
                height: face.height,
            },
        )?;
        let matrix = image_matrix(image)?;

        let landmarks = self.predictor.face_landmarks(&matrix, &rect);
        let encodings = self
            .network
            .get_face_encodings(&matrix, &[landmarks], ENCODING_JITTERS);
        let descriptor = encodings.iter().next().ok_or(EncoderError::NoDescriptor)?;

        to_encoding(descriptor.as_ref())
    }
}

fn existing(path: PathBuf) -> Result<PathBuf, EncoderError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(EncoderError::ModelNotFound(path.display().to_string()))
    }
}

/// dlib builds its matrix from its own `image` release; copy the pixels over.
fn image_matrix(image: &RgbImage) -> Result<ImageMatrix, EncoderError> {
    let (width, height) = image.dimensions();
    let pixels = dlib_image::RgbImage::from_raw(width, height, image.as_raw().clone())
        .ok_or(EncoderError::ImageLayout { width, height })?;
    Ok(ImageMatrix::from_image(&pixels))
}

/// Clamp a detector box to the image as an inclusive dlib rectangle.
///
/// `None` when the box is not finite or nothing of it is left inside.
fn face_rect(face: &BoundingBox, width: u32, height: u32) -> Option<Rectangle> {
    let corners = [face.x, face.y, face.x + face.width, face.y + face.height];
    if corners.iter().any(|v| !v.is_finite()) || width == 0 || height == 0 {
        return None;
    }

    let left = face.x.max(0.0).floor() as i64;
    let top = face.y.max(0.0).floor() as i64;
    let right = (face.x + face.width).min(width as f32).ceil() as i64 - 1;
    let bottom = (face.y + face.height).min(height as f32).ceil() as i64 - 1;

    (right > left && bottom > top).then_some(Rectangle {
        left,
        top,
        right,
        bottom,
    })
}

fn to_encoding(descriptor: &[f64]) -> Result<Encoding, EncoderError> {
    if descriptor.len() != ENCODING_DIM {
        return Err(EncoderError::WrongDimension(descriptor.len()));
    }
    Ok(Encoding::new(descriptor.iter().map(|&v| v as f32).collect()))
}
