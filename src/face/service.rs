//! High-level face search orchestration.
//!
//! Owns the one process-wide extraction adapter and runs the
//! extract → scan → rank pipeline over a store snapshot. Errors carry the
//! full outcome taxonomy up to the HTTP boundary so status mapping happens
//! exactly once.

use super::extractor::{DescriptorExtractor, ExtractionError};
use super::records::PhotoFaceRecord;
use super::similarity::{search_faces, FaceMatch};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no reference image supplied")]
    MissingImage,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no face detected in the reference image")]
    NoFaceDetected,

    #[error("face search is currently unavailable")]
    ModelUnavailable,

    /// Opaque merge of "missing", "deleted", "inactive", "disabled" and
    /// "not authorized"; an unauthorized caller can't tell them apart.
    #[error("event not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("face search timed out")]
    Timeout,

    #[error("unexpected error: {0:?}")]
    Internal(#[from] anyhow::Error),
}

impl From<ExtractionError> for SearchError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::InvalidImage(reason) => {
                SearchError::InvalidInput(format!("invalid reference image: {reason}"))
            }
            ExtractionError::TooLarge(limit) => {
                SearchError::InvalidInput(format!("image exceeds the {limit} byte limit"))
            }
            ExtractionError::NoFaceDetected => SearchError::NoFaceDetected,
            ExtractionError::ModelUnavailable(_) => SearchError::ModelUnavailable,
            ExtractionError::Engine(reason) => {
                SearchError::Internal(anyhow::anyhow!("face engine error: {reason}"))
            }
        }
    }
}

pub struct FaceSearchService {
    extractor: DescriptorExtractor,
    default_min_similarity: f32,
}

impl FaceSearchService {
    pub fn new(extractor: DescriptorExtractor, default_min_similarity: f32) -> Self {
        Self {
            extractor,
            default_min_similarity: default_min_similarity.clamp(0.0, 1.0),
        }
    }

    /// The shared extraction adapter, also used by the photo ingest path.
    pub fn extractor(&self) -> &DescriptorExtractor {
        &self.extractor
    }

    /// Run a search: extract the reference descriptor, scan the candidate
    /// records, return ranked matches.
    ///
    /// The reference descriptor lives only for the duration of this call.
    pub fn search(
        &self,
        reference_image: &[u8],
        candidates: &[PhotoFaceRecord],
        min_similarity: Option<f32>,
    ) -> Result<Vec<FaceMatch>, SearchError> {
        let reference = self.extractor.extract_reference(reference_image)?;
        log::debug!(
            "reference face extracted (confidence {:.2}, {} dims)",
            reference.confidence,
            reference.vector.len()
        );

        let threshold = min_similarity
            .unwrap_or(self.default_min_similarity)
            .clamp(0.0, 1.0);

        let matches = search_faces(&reference.vector, candidates, threshold);
        log::debug!(
            "face search: {} candidate photos, threshold {threshold}, {} matches",
            candidates.len(),
            matches.len()
        );

        Ok(matches)
    }
}
