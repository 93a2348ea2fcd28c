//! Presence verification: compare a live capture against a stored encoding.

use crate::encoder::MATCH_THRESHOLD;
use crate::extractor::{ExtractFailure, Extractor, FaceEmbedder};
use crate::types::Encoding;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("no face in capture: {0}")]
    NoFaceInCapture(#[source] ExtractFailure),
    #[error("stored encoding has {stored} components, capture has {captured}")]
    DimensionMismatch { stored: usize, captured: usize },
}

/// Result of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub matched: bool,
    pub distance: f32,
}

impl VerificationOutcome {
    pub fn label(&self) -> &'static str {
        if self.matched {
            "Verified"
        } else {
            "Unverified"
        }
    }

    /// Status line stored with the presence record, e.g. `Verified (Distance: 0.31)`.
    pub fn status(&self) -> String {
        format!("{} (Distance: {:.2})", self.label(), self.distance)
    }

    /// Build the record to persist for `user_id`, timestamped now.
    pub fn into_presence(
        self,
        user_id: i64,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> NewPresence {
        NewPresence {
            user_id,
            recorded_at: Utc::now(),
            latitude,
            longitude,
            status: self.status(),
        }
    }
}

/// A presence record that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPresence {
    pub user_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
}

/// Compare two encodings against [`MATCH_THRESHOLD`].
pub fn compare(stored: &Encoding, captured: &Encoding) -> Result<VerificationOutcome, VerifyError> {
    if stored.dim() != captured.dim() {
        return Err(VerifyError::DimensionMismatch {
            stored: stored.dim(),
            captured: captured.dim(),
        });
    }
    let distance = stored.euclidean_distance(captured);
    Ok(VerificationOutcome {
        matched: distance < MATCH_THRESHOLD,
        distance,
    })
}

/// Encode `capture` and compare it against `stored`.
pub fn verify<E: FaceEmbedder>(
    extractor: &mut Extractor<E>,
    stored: &Encoding,
    capture: &[u8],
) -> Result<VerificationOutcome, VerifyError> {
    let captured = extractor.extract(capture).map_err(|reason| {
        tracing::info!(%reason, "capture rejected");
        VerifyError::NoFaceInCapture(reason)
    })?;
    let outcome = compare(stored, &captured)?;
    tracing::debug!(matched = outcome.matched, distance = outcome.distance, "capture compared");
    Ok(outcome)
}
