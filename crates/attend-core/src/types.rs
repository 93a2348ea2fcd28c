use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::encoder::ENCODING_DIM;

/// Separator used by the stored encoding format.
const ENCODING_SEPARATOR: char = ',';

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face encoding vector (`ENCODING_DIM` elements from the dlib encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
}

#[derive(Error, Debug, PartialEq)]
pub enum EncodingParseError {
    #[error("encoding string is empty")]
    Empty,
    #[error("invalid component {index}: {value:?}")]
    InvalidComponent { index: usize, value: String },
    #[error("expected {expected} components, got {actual}")]
    WrongDimension { expected: usize, actual: usize },
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two encodings.
    ///
    /// Callers compare encodings of equal dimensionality; extra trailing
    /// components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Parse the stored representation and require `ENCODING_DIM` components.
    pub fn parse_stored(s: &str) -> Result<Self, EncodingParseError> {
        let encoding: Encoding = s.parse()?;
        if encoding.dim() != ENCODING_DIM {
            return Err(EncodingParseError::WrongDimension {
                expected: ENCODING_DIM,
                actual: encoding.dim(),
            });
        }
        Ok(encoding)
    }
}

/// Comma-separated decimals. `f32`'s `Display` prints the shortest string
/// that parses back to the same bits, so the format round-trips exactly.
impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, "{ENCODING_SEPARATOR}")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl FromStr for Encoding {
    type Err = EncodingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EncodingParseError::Empty);
        }
        let values = s
            .split(ENCODING_SEPARATOR)
            .enumerate()
            .map(|(index, part)| {
                let part = part.trim();
                part.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| EncodingParseError::InvalidComponent {
                        index,
                        value: part.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }
}
