//! attend-core: face encoding and presence verification.
//!
//! Faces are found by SCRFD running on ONNX Runtime and encoded by dlib's
//! 128-d ResNet descriptor network. Encodings are compared by Euclidean
//! distance against the network's fixed same-person threshold.

pub mod detector;
pub mod encoder;
pub mod extractor;
pub mod types;
pub mod verifier;

use std::path::PathBuf;

pub use detector::FaceDetector;
pub use encoder::{EncoderError, FaceEncoder, ENCODING_DIM, MATCH_THRESHOLD};
pub use extractor::{EmbedderError, ExtractFailure, Extractor, FaceEmbedder, ModelEmbedder};
pub use types::{BoundingBox, Encoding, EncodingParseError};
pub use verifier::{NewPresence, VerificationOutcome, VerifyError};

/// Default directory for the detector and encoder model files.
///
/// `$XDG_DATA_HOME/attend/models`, falling back to `~/.local/share/attend/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
        .join("models")
}
